//! Live stream registry
//!
//! ```text
//!              Arc<StreamRegistry>
//!        RwLock<HashMap<StreamKey, Arc<Stream>>>
//!                       |
//!      +----------------+----------------+
//!      |                                 |
//! IngestSession                      HTTP layer
//! get_or_create / remove          get / all_active / count
//! writes through OutputBridge     ServingBridge -> Segmenter::handle
//! ```
//!
//! Per-stream state lives inside [`Stream`] behind its own atomics and
//! locks, so the registry lock is only held for map operations.

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{Stream, StreamInfo};
pub use key::{extract_stream_key, StreamKey, DEFAULT_STREAM_KEY};
pub use store::StreamRegistry;
