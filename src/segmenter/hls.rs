//! In-memory HLS segmenter
//!
//! Keeps a sliding window of MPEG-TS segments per stream and serves them with
//! a live playlist. Segments open on an IDR frame once the previous one
//! reached the target duration; audio-only streams rotate on duration alone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::playlist::{self, PlaylistEntry};
use super::ts::{self, PesPacket, TsWriter};
use super::{Segmenter, SegmenterFactory, SegmenterSettings, TrackDescriptors};
use crate::error::SegmenterError;
use crate::media::aac;
use crate::media::h264::{self, NaluType};

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Completed segment
#[derive(Debug, Clone)]
struct Segment {
    entry: PlaylistEntry,
    data: Bytes,
}

/// Segment currently being filled
#[derive(Debug)]
struct OpenSegment {
    sequence: u64,
    start_ts: u64,
    start_ntp: DateTime<Utc>,
    data: BytesMut,
}

#[derive(Debug, Default)]
struct HlsState {
    writer: TsWriter,
    current: Option<OpenSegment>,
    segments: VecDeque<Segment>,
    next_sequence: u64,
    last_video_dts: Option<u64>,
    last_audio_pts: Option<u64>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl HlsState {
    /// Open a new segment at `ts` if none is open or the open one is full
    fn rotate_if_due(
        &mut self,
        ts: u64,
        ntp: DateTime<Utc>,
        tracks: &TrackDescriptors,
        settings: &SegmenterSettings,
    ) {
        let due = match &self.current {
            None => true,
            Some(open) => ts.saturating_sub(open.start_ts) >= ts::to_90khz(settings.segment_duration),
        };
        if !due {
            return;
        }

        if let Some(open) = self.current.take() {
            self.finish(open, ts, settings.segment_count);
        }

        let mut data = BytesMut::with_capacity(256 * 1024);
        self.writer
            .write_tables(&mut data, tracks.has_video(), tracks.has_audio());

        self.current = Some(OpenSegment {
            sequence: self.next_sequence,
            start_ts: ts,
            start_ntp: ntp,
            data,
        });
        self.next_sequence += 1;
    }

    fn finish(&mut self, open: OpenSegment, end_ts: u64, keep: usize) {
        let duration_secs = end_ts.saturating_sub(open.start_ts) as f64 / 90_000.0;
        self.segments.push_back(Segment {
            entry: PlaylistEntry {
                sequence: open.sequence,
                duration_secs,
                program_date_time: open.start_ntp,
            },
            data: open.data.freeze(),
        });

        while self.segments.len() > keep.max(1) {
            self.segments.pop_front();
        }
    }

    fn write_pes(&mut self, pes: &PesPacket<'_>) {
        if let Some(open) = self.current.as_mut() {
            self.writer.write_pes(&mut open.data, pes);
        }
    }
}

/// HLS output for one stream
pub struct HlsSegmenter {
    tracks: TrackDescriptors,
    settings: SegmenterSettings,
    started: AtomicBool,
    closed: AtomicBool,
    state: Mutex<HlsState>,
}

impl HlsSegmenter {
    pub fn new(tracks: TrackDescriptors, settings: SegmenterSettings) -> Self {
        let mut state = HlsState::default();
        if let Some(video) = &tracks.video {
            state.sps = video.sps.clone();
            state.pps = video.pps.clone();
        }

        Self {
            tracks,
            settings,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: Mutex::new(state),
        }
    }

    pub fn tracks(&self) -> &TrackDescriptors {
        &self.tracks
    }

    /// Number of completed segments in the window
    pub fn segment_count(&self) -> usize {
        self.lock_state().segments.len()
    }

    /// Current playlist, `None` before the first segment completes
    pub fn playlist(&self) -> Option<String> {
        let state = self.lock_state();
        if state.segments.is_empty() {
            return None;
        }
        let entries: Vec<PlaylistEntry> = state.segments.iter().map(|s| s.entry.clone()).collect();
        let target = self.settings.segment_duration.as_secs_f64().ceil() as u64;
        Some(playlist::render_live(&entries, target))
    }

    /// Bytes of segment `sequence`, if still in the window
    pub fn segment(&self, sequence: u64) -> Option<Bytes> {
        self.lock_state()
            .segments
            .iter()
            .find(|s| s.entry.sequence == sequence)
            .map(|s| s.data.clone())
    }

    fn lock_state(&self) -> MutexGuard<'_, HlsState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_writable(&self) -> Result<(), SegmenterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SegmenterError::Closed);
        }
        if !self.started.load(Ordering::Acquire) {
            return Err(SegmenterError::NotStarted);
        }
        Ok(())
    }
}

impl Segmenter for HlsSegmenter {
    fn start(&self) -> Result<(), SegmenterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SegmenterError::Closed);
        }
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.lock_state();
        state.current = None;
        state.segments.clear();
    }

    fn write_video(
        &self,
        ntp: DateTime<Utc>,
        pts: Duration,
        dts: Duration,
        au: &[Bytes],
    ) -> Result<(), SegmenterError> {
        self.check_writable()?;
        if !self.tracks.has_video() {
            return Err(SegmenterError::NoSuchTrack("video"));
        }
        if au.iter().all(|nalu| nalu.is_empty()) {
            return Err(SegmenterError::InvalidAccessUnit("empty video access unit".into()));
        }

        let pts90 = ts::to_90khz(pts);
        let dts90 = ts::to_90khz(dts);
        let mut state = self.lock_state();

        if let Some(last) = state.last_video_dts {
            if dts90 < last {
                return Err(SegmenterError::NonMonotonicDts { last, got: dts90 });
            }
        }
        state.last_video_dts = Some(dts90);

        for nalu in au {
            match NaluType::of(nalu) {
                Some(NaluType::Sps) => state.sps = Some(nalu.clone()),
                Some(NaluType::Pps) => state.pps = Some(nalu.clone()),
                _ => {}
            }
        }

        let idr = h264::is_idr_access_unit(au);
        if idr {
            state.rotate_if_due(dts90, ntp, &self.tracks, &self.settings);
        }
        if state.current.is_none() {
            // Nothing is decodable before the first IDR
            return Ok(());
        }

        let payload = h264::to_annex_b(au, state.sps.as_ref(), state.pps.as_ref());
        state.write_pes(&PesPacket {
            pid: ts::VIDEO_PID,
            stream_id: ts::STREAM_ID_VIDEO,
            pts: pts90.max(dts90),
            dts: Some(dts90),
            pcr: Some(dts90),
            random_access: idr,
            payload: &payload,
        });

        Ok(())
    }

    fn write_audio(
        &self,
        ntp: DateTime<Utc>,
        pts: Duration,
        aus: &[Bytes],
    ) -> Result<(), SegmenterError> {
        self.check_writable()?;
        let params = self
            .tracks
            .audio
            .ok_or(SegmenterError::NoSuchTrack("audio"))?;
        if aus.iter().all(|frame| frame.is_empty()) {
            return Err(SegmenterError::InvalidAccessUnit("empty audio access unit".into()));
        }

        let pts90 = ts::to_90khz(pts);
        let mut state = self.lock_state();

        if let Some(last) = state.last_audio_pts {
            if pts90 < last {
                return Err(SegmenterError::NonMonotonicDts { last, got: pts90 });
            }
        }
        state.last_audio_pts = Some(pts90);

        let audio_only = !self.tracks.has_video();
        if audio_only {
            state.rotate_if_due(pts90, ntp, &self.tracks, &self.settings);
        }
        if state.current.is_none() {
            return Ok(());
        }

        let mut payload = Vec::with_capacity(aus.iter().map(|f| f.len() + 7).sum());
        for frame in aus.iter().filter(|f| !f.is_empty()) {
            payload.extend_from_slice(&aac::adts_header(&params, frame.len()));
            payload.extend_from_slice(frame);
        }

        state.write_pes(&PesPacket {
            pid: ts::AUDIO_PID,
            stream_id: ts::STREAM_ID_AUDIO,
            pts: pts90,
            dts: None,
            pcr: audio_only.then_some(pts90),
            random_access: audio_only,
            payload: &payload,
        });

        Ok(())
    }

    fn handle(&self, request: Request<Body>) -> Response {
        if request.method() != Method::GET && request.method() != Method::HEAD {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
        if self.closed.load(Ordering::Acquire) {
            return StatusCode::NOT_FOUND.into_response();
        }

        let name = request.uri().path().rsplit('/').next().unwrap_or_default();

        if name == "index.m3u8" {
            return match self.playlist() {
                Some(body) => (
                    [
                        (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
                        (header::CACHE_CONTROL, "no-cache"),
                    ],
                    body,
                )
                    .into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            };
        }

        match playlist::parse_segment_name(name).and_then(|seq| self.segment(seq)) {
            Some(data) => (
                [
                    (header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE),
                    (header::CACHE_CONTROL, "max-age=60"),
                ],
                data,
            )
                .into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

/// Factory producing [`HlsSegmenter`]s
#[derive(Debug, Clone, Default)]
pub struct HlsSegmenterFactory;

impl HlsSegmenterFactory {
    pub fn new() -> Self {
        Self
    }
}

impl SegmenterFactory for HlsSegmenterFactory {
    fn create(
        &self,
        tracks: TrackDescriptors,
        settings: SegmenterSettings,
    ) -> Result<Arc<dyn Segmenter>, SegmenterError> {
        if !tracks.has_video() && !tracks.has_audio() {
            return Err(SegmenterError::Start("no tracks to segment".into()));
        }
        Ok(Arc::new(HlsSegmenter::new(tracks, settings)))
    }
}
