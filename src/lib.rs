pub mod cli;
pub mod config;
pub mod delivery;
pub mod event;
pub mod instrument;
pub mod lifecycle;
pub mod pipeline;
pub mod quota;
pub mod sampler;
pub mod stats;

pub use config::{PipelineConfig, PipelinePolicy};
pub use delivery::{ServerInfo, Transport};
pub use event::{ClientInfo, EventKind, EventStatus, RawEvent};
pub use instrument::Instrumentation;
pub use lifecycle::{LifecycleError, Pipeline};
pub use pipeline::{SchedulerState, ShutdownReport};
pub use quota::{QuotaDetail, QuotaLevel};
pub use stats::StatsSnapshot;
