//! Ingest sessions
//!
//! One [`IngestSession`] per accepted connection. The phase machine lives in
//! [`state`], the write path into the segmenter in [`output`].

pub mod context;
pub mod ingest;
pub mod output;
pub mod state;

pub use context::SessionContext;
pub use ingest::{IngestSession, SessionReport};
pub use output::{OutputBridge, OutputLayout, WriteOutcome};
pub use state::{SessionPhase, SessionState};
