pub mod backoff;
pub mod client;
pub mod transport;
pub mod wire;

pub use backoff::Backoff;
pub use client::{AttemptOutcome, DeliveryClient, DeliveryOutcome, DeliveryReport};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
pub use wire::{EncodedBatch, IngestResponse, SdkInfo, ServerInfo};
