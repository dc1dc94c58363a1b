//! Registry entry for one live stream

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::key::StreamKey;
use crate::media::{AudioParams, VideoParams};
use crate::segmenter::Segmenter;
use crate::stats::BitrateMeter;

/// One live stream
///
/// Codec parameters, the segmenter handle and the wall-clock anchor are
/// written once by the owning session and read lock-free afterwards. The
/// ready flag is raised only after all three are in place.
pub struct Stream {
    key: StreamKey,
    created_at: DateTime<Utc>,
    active: AtomicBool,
    closed: AtomicBool,
    ready: AtomicBool,
    segmenter: OnceLock<Arc<dyn Segmenter>>,
    anchor: OnceLock<DateTime<Utc>>,
    video: OnceLock<VideoParams>,
    audio: OnceLock<AudioParams>,
    bitrate: BitrateMeter,
}

impl Stream {
    pub(crate) fn new(key: StreamKey) -> Self {
        Self {
            key,
            created_at: Utc::now(),
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            segmenter: OnceLock::new(),
            anchor: OnceLock::new(),
            video: OnceLock::new(),
            audio: OnceLock::new(),
            bitrate: BitrateMeter::new(),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Segmenter started and accepting writes
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Record the first video track's parameters; later calls are ignored
    pub fn set_video_params(&self, params: VideoParams) -> bool {
        self.video.set(params).is_ok()
    }

    pub fn video_params(&self) -> Option<&VideoParams> {
        self.video.get()
    }

    /// Record the first audio track's parameters; later calls are ignored
    pub fn set_audio_params(&self, params: AudioParams) -> bool {
        self.audio.set(params).is_ok()
    }

    pub fn audio_params(&self) -> Option<AudioParams> {
        self.audio.get().copied()
    }

    /// Attach a started segmenter and the time its timeline starts at
    ///
    /// Returns false if a segmenter was already attached or the stream was
    /// removed meanwhile; in the latter case `segmenter` is closed.
    pub fn install_segmenter(&self, segmenter: Arc<dyn Segmenter>, anchor: DateTime<Utc>) -> bool {
        if self.segmenter.set(Arc::clone(&segmenter)).is_err() {
            return false;
        }
        let _ = self.anchor.set(anchor);

        if self.closed.load(Ordering::Acquire) {
            segmenter.close();
            return false;
        }
        self.ready.store(true, Ordering::Release);
        true
    }

    pub fn segmenter(&self) -> Option<&Arc<dyn Segmenter>> {
        self.segmenter.get()
    }

    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.anchor.get().copied()
    }

    pub fn bitrate(&self) -> &BitrateMeter {
        &self.bitrate
    }

    /// Mark inactive and close the segmenter; idempotent
    pub(crate) fn close(&self) {
        self.active.store(false, Ordering::Release);
        self.ready.store(false, Ordering::Release);
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(segmenter) = self.segmenter.get() {
            segmenter.close();
        }
    }

    /// Value snapshot for listings
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            key: self.key.to_string(),
            started_at: self.created_at,
            bitrate: self.bitrate.current_rate(),
            active: self.is_active(),
            ready: self.is_ready(),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .field("active", &self.is_active())
            .field("ready", &self.is_ready())
            .field("video", &self.video.get())
            .field("audio", &self.audio.get())
            .finish_non_exhaustive()
    }
}

/// Read-only projection of a [`Stream`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub key: String,
    pub started_at: DateTime<Utc>,
    /// Bytes per second over the last completed window
    pub bitrate: u64,
    pub active: bool,
    pub ready: bool,
}
