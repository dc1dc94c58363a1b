//! Output segmenter interface
//!
//! A segmenter packages access units into time-bounded segments plus an index
//! and answers HTTP requests for them. The ingest side talks to it only
//! through [`Segmenter`], so the packaging format stays swappable; the crate
//! ships an in-memory HLS/MPEG-TS implementation in [`hls`].

pub mod hls;
pub mod playlist;
pub mod ts;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::SegmenterError;
use crate::media::{AudioParams, VideoParams};

pub use hls::{HlsSegmenter, HlsSegmenterFactory};

/// Tracks the segmenter is created with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackDescriptors {
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
}

impl TrackDescriptors {
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Segment window configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterSettings {
    /// Completed segments kept in the live window
    pub segment_count: usize,
    /// Target duration of one segment
    pub segment_duration: Duration,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            segment_count: 5,
            segment_duration: Duration::from_secs(2),
        }
    }
}

/// A running output packager for one stream
///
/// Writes for a given stream come from a single ingest task, but the HTTP layer
/// calls [`Segmenter::handle`] concurrently, so implementations synchronize
/// internally.
pub trait Segmenter: Send + Sync {
    /// Begin accepting writes
    fn start(&self) -> Result<(), SegmenterError>;

    /// Stop and release resources; calling it again is a no-op
    fn close(&self);

    /// Write one H.264 access unit (NAL units without start codes)
    ///
    /// `ntp` is the wall-clock time of the unit, `pts`/`dts` are relative to
    /// the start of the stream.
    fn write_video(
        &self,
        ntp: DateTime<Utc>,
        pts: Duration,
        dts: Duration,
        au: &[Bytes],
    ) -> Result<(), SegmenterError>;

    /// Write one or more raw AAC frames
    fn write_audio(
        &self,
        ntp: DateTime<Utc>,
        pts: Duration,
        aus: &[Bytes],
    ) -> Result<(), SegmenterError>;

    /// Serve a playlist or segment request
    fn handle(&self, request: Request<Body>) -> Response;
}

/// Builds segmenters for newly started streams
pub trait SegmenterFactory: Send + Sync {
    fn create(
        &self,
        tracks: TrackDescriptors,
        settings: SegmenterSettings,
    ) -> Result<Arc<dyn Segmenter>, SegmenterError>;
}
