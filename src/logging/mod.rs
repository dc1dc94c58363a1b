//! Process log history
//!
//! [`LogBuffer`] is created by the binary and shared with the HTTP layer;
//! [`LogBufferLayer`] is installed next to the fmt layer so every event is
//! also kept in memory.

pub mod buffer;
pub mod layer;

pub use buffer::{LogBuffer, LogEntry, LogLevel, DEFAULT_CAPACITY};
pub use layer::LogBufferLayer;
