pub mod monitor;
pub mod state;

pub use monitor::{classify, QuotaCallback, QuotaMonitor, QuotaSignal, QuotaTransition};
pub use state::{QuotaDetail, QuotaLevel, QuotaSnapshot, QuotaState};
