//! Codec parameters captured from an ingest track
//!
//! These are the only per-stream codec facts the output side needs; they are
//! written once during track discovery and read when the segmenter starts.

use bytes::Bytes;

/// AAC sample rate used when the source does not announce one
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Channel count used when the source does not announce one
pub const DEFAULT_CHANNEL_COUNT: u8 = 2;

/// H.264 parameter sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoParams {
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
}

impl VideoParams {
    pub fn new(sps: Bytes, pps: Bytes) -> Self {
        Self {
            sps: Some(sps),
            pps: Some(pps),
        }
    }

    /// Both parameter sets are known
    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }
}

/// AAC stream configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    /// Sample rate in Hz, 0 when unknown
    pub sample_rate: u32,
    /// Channel count, 0 when unknown
    pub channel_count: u8,
}

impl AudioParams {
    pub fn new(sample_rate: u32, channel_count: u8) -> Self {
        Self {
            sample_rate,
            channel_count,
        }
    }

    /// Replace unknown fields with 48 kHz stereo
    ///
    /// Returns the resolved parameters and whether the rate and the channel
    /// count respectively had to be defaulted.
    pub fn with_defaults(self) -> (Self, bool, bool) {
        let rate_defaulted = self.sample_rate == 0;
        let channels_defaulted = self.channel_count == 0;
        let resolved = Self {
            sample_rate: if rate_defaulted {
                DEFAULT_SAMPLE_RATE
            } else {
                self.sample_rate
            },
            channel_count: if channels_defaulted {
                DEFAULT_CHANNEL_COUNT
            } else {
                self.channel_count
            },
        };
        (resolved, rate_defaulted, channels_defaulted)
    }
}

impl Default for AudioParams {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNEL_COUNT)
    }
}
