// src/lib.rs
mod batch;
pub mod batcher;
pub mod cli;
pub mod clock;
pub mod event;
pub mod impression;
pub mod route;
pub mod transport;

pub use batcher::{Batcher, BatcherBuilder, BatcherSettings, FlushReport, SentBatch};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{Event, EventContext, FeatureId, FieldValue, LogRequest};
pub use impression::PageInfo;
pub use route::{Endpoint, RouteKey};
pub use transport::{
    http_chain, FallbackChain, HttpSettings, OutboundRequest, SendError, Transport, TransportKind,
};

// Re-export tracing for use in other modules
pub use tracing;
