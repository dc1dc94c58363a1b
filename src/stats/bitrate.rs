//! Rolling throughput estimate for a single stream

use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
struct MeterState {
    /// Bytes accumulated since the last recompute
    bytes_total: u64,
    /// When the rate was last recomputed
    last_update: Instant,
    /// Last computed rate in bytes per second
    bitrate: u64,
}

/// Bytes-per-second meter recomputed at most once per second
///
/// The meter owns its own lock so packet writes on one stream never contend
/// with registry readers or with the meters of other streams.
#[derive(Debug)]
pub struct BitrateMeter {
    state: Mutex<MeterState>,
}

impl BitrateMeter {
    /// Minimum window between two rate recomputations, in seconds
    pub const WINDOW_SECS: f64 = 1.0;

    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a meter whose first window opens at `start`
    pub fn starting_at(start: Instant) -> Self {
        Self {
            state: Mutex::new(MeterState {
                bytes_total: 0,
                last_update: start,
                bitrate: 0,
            }),
        }
    }

    /// Account for `bytes` received now
    pub fn update(&self, bytes: u64) {
        self.update_at(bytes, Instant::now());
    }

    /// Account for `bytes` received at `now`
    pub fn update_at(&self, bytes: u64, now: Instant) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        state.bytes_total += bytes;
        let elapsed = now.saturating_duration_since(state.last_update).as_secs_f64();

        if elapsed >= Self::WINDOW_SECS {
            state.bitrate = (state.bytes_total as f64 / elapsed) as u64;
            state.bytes_total = 0;
            state.last_update = now;
        }
    }

    /// Most recently computed rate in bytes per second
    pub fn current_rate(&self) -> u64 {
        match self.state.lock() {
            Ok(guard) => guard.bitrate,
            Err(poisoned) => poisoned.into_inner().bitrate,
        }
    }

    /// Bytes accumulated in the currently open window
    pub fn pending_bytes(&self) -> u64 {
        match self.state.lock() {
            Ok(guard) => guard.bytes_total,
            Err(poisoned) => poisoned.into_inner().bytes_total,
        }
    }
}

impl Default for BitrateMeter {
    fn default() -> Self {
        Self::new()
    }
}
