pub mod capture;
pub mod record;

pub use capture::{capture, CaptureError, CaptureLimits, RawEvent};
pub use record::{
    Attributes, ClientInfo, EventKind, EventRecord, EventStatus, DEFAULT_PROTOCOL_VERSION,
};
