pub mod batch;
pub mod batcher;
pub mod queue;
pub mod scheduler;

pub use batch::Batch;
pub use batcher::Batcher;
pub use queue::IngestionQueue;
pub use scheduler::{FlushScheduler, FlushTrigger, SchedulerState, ShutdownReport};
