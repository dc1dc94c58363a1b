//! Metrics: per-stream throughput and process-level counters

pub mod bitrate;
pub mod format;
pub mod monitor;

pub use bitrate::BitrateMeter;
pub use format::{format_bitrate, format_duration, format_uptime};
pub use monitor::{ResourceMonitor, ServerStats};
