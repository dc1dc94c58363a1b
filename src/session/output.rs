//! Output bridge
//!
//! Moves access units from an ingest session into the stream's segmenter:
//! anchors relative timestamps to wall-clock time, feeds the bitrate meter
//! and classifies write failures so a single bad unit never ends a session.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::SegmenterError;
use crate::media::AudioParams;
use crate::registry::Stream;
use crate::segmenter::{SegmenterFactory, SegmenterSettings, TrackDescriptors};

/// Result of forwarding one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Segmenter not ready; the unit was discarded silently
    Dropped,
    /// Failed with an error common encoders trigger routinely
    Benign,
    /// Failed and was logged
    Failed,
}

/// Which tracks the segmenter is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// Video plus audio, audio parameters defaulted when unknown
    AudioVideo,
    /// Audio only, for publishes without video
    AudioOnly,
}

pub struct OutputBridge {
    factory: Arc<dyn SegmenterFactory>,
    settings: SegmenterSettings,
}

impl OutputBridge {
    pub fn new(factory: Arc<dyn SegmenterFactory>, settings: SegmenterSettings) -> Self {
        Self { factory, settings }
    }

    pub fn settings(&self) -> SegmenterSettings {
        self.settings
    }

    /// Build segmenter tracks from the stream's captured parameters
    pub fn track_descriptors(stream: &Stream, layout: OutputLayout) -> TrackDescriptors {
        let captured = stream.audio_params().unwrap_or(AudioParams::new(0, 0));
        let (audio, rate_defaulted, channels_defaulted) = captured.with_defaults();
        if rate_defaulted {
            tracing::warn!(stream = %stream.key(), "Using default audio sample rate: 48kHz");
        }
        if channels_defaulted {
            tracing::warn!(stream = %stream.key(), "Using default audio channels: stereo");
        }

        TrackDescriptors {
            video: match layout {
                OutputLayout::AudioVideo => Some(stream.video_params().cloned().unwrap_or_default()),
                OutputLayout::AudioOnly => None,
            },
            audio: Some(audio),
        }
    }

    /// Create, start and attach the stream's segmenter
    ///
    /// A stream that is already ready is left alone.
    pub fn start_segmenter(&self, stream: &Stream, layout: OutputLayout) -> Result<(), SegmenterError> {
        if stream.is_ready() {
            return Ok(());
        }

        let tracks = Self::track_descriptors(stream, layout);
        let segmenter = self.factory.create(tracks, self.settings)?;
        if let Err(e) = segmenter.start() {
            segmenter.close();
            return Err(e);
        }

        let anchor = Utc::now();
        if !stream.install_segmenter(Arc::clone(&segmenter), anchor) {
            // Lost to a concurrent start, or the stream went away
            segmenter.close();
            return if stream.is_ready() {
                Ok(())
            } else {
                Err(SegmenterError::Closed)
            };
        }

        tracing::info!(
            stream = %stream.key(),
            ?layout,
            segment_count = self.settings.segment_count,
            segment_duration = ?self.settings.segment_duration,
            "Segmenter started"
        );
        Ok(())
    }

    pub fn write_video(&self, stream: &Stream, pts: Duration, dts: Duration, parts: &[Bytes]) -> WriteOutcome {
        let Some((segmenter, anchor)) = ready_output(stream) else {
            return WriteOutcome::Dropped;
        };

        let bytes: usize = parts.iter().map(Bytes::len).sum();
        stream.bitrate().update(bytes as u64);

        let result = segmenter.write_video(anchored(anchor, pts), pts, dts, parts);
        classify(stream, "video", result)
    }

    pub fn write_audio(&self, stream: &Stream, pts: Duration, payload: &Bytes) -> WriteOutcome {
        let Some((segmenter, anchor)) = ready_output(stream) else {
            return WriteOutcome::Dropped;
        };

        stream.bitrate().update(payload.len() as u64);

        let result = segmenter.write_audio(anchored(anchor, pts), pts, std::slice::from_ref(payload));
        classify(stream, "audio", result)
    }
}

fn ready_output(stream: &Stream) -> Option<(&Arc<dyn crate::segmenter::Segmenter>, DateTime<Utc>)> {
    if !stream.is_ready() {
        return None;
    }
    Some((stream.segmenter()?, stream.anchor()?))
}

/// `anchor + pts`, saturating at the anchor for out-of-range offsets
pub fn anchored(anchor: DateTime<Utc>, pts: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(pts)
        .ok()
        .and_then(|offset| anchor.checked_add_signed(offset))
        .unwrap_or(anchor)
}

fn classify(stream: &Stream, track: &'static str, result: Result<(), SegmenterError>) -> WriteOutcome {
    match result {
        Ok(()) => WriteOutcome::Written,
        Err(e) if e.is_benign() => {
            tracing::trace!(stream = %stream.key(), track, error = %e, "Suppressed benign write error");
            WriteOutcome::Benign
        }
        Err(e) => {
            tracing::error!(stream = %stream.key(), track, error = %e, "Segmenter write failed");
            WriteOutcome::Failed
        }
    }
}
