//! HTTP playback and inspection server, optionally over TLS

pub mod routes;
pub mod serving;
pub mod tls;

pub use routes::{router, AppState, StreamSummary};
pub use serving::ServingBridge;
