//! Process-level resource sampling
//!
//! The monitor is created once by the binary and handed to the acceptor,
//! the sessions and the HTTP layer instead of living in a global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters shared by every connection task
#[derive(Debug)]
pub struct ResourceMonitor {
    started_at: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    bytes_ingested: AtomicU64,
}

/// Point-in-time copy of the monitor counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub active_streams: usize,
    pub bytes_ingested: u64,
    /// Resident set size, where the platform exposes it
    pub rss_bytes: Option<u64>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            bytes_ingested: AtomicU64::new(0),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record an accepted connection
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished connection
    pub fn connection_closed(&self) {
        // Saturate instead of wrapping if open/close calls ever get unbalanced
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn add_ingested(&self, bytes: u64) {
        self.bytes_ingested.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Take a snapshot; `active_streams` comes from the registry
    pub fn snapshot(&self, active_streams: usize) -> ServerStats {
        ServerStats {
            uptime_secs: self.uptime().as_secs(),
            total_connections: self.total_connections(),
            active_connections: self.active_connections(),
            active_streams,
            bytes_ingested: self.bytes_ingested.load(Ordering::Relaxed),
            rss_bytes: resident_set_size(),
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn resident_set_size() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn resident_set_size() -> Option<u64> {
    None
}
