//! Scripted transport and recording segmenter shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use rtmp_hls::error::{Error, Result, SegmenterError};
use rtmp_hls::media::{AudioParams, VideoParams};
use rtmp_hls::registry::StreamRegistry;
use rtmp_hls::segmenter::{Segmenter, SegmenterFactory, SegmenterSettings, TrackDescriptors};
use rtmp_hls::server::ServerConfig;
use rtmp_hls::session::{OutputBridge, SessionContext};
use rtmp_hls::stats::ResourceMonitor;
use rtmp_hls::transport::{
    IngestTransport, Intent, MediaUnit, Negotiation, Track, TrackCodec,
};

pub const VIDEO: u32 = 0;
pub const AUDIO: u32 = 1;

/// Transport fed from a channel; dropping the sender ends the connection
pub struct ChannelTransport {
    target: Option<String>,
    tracks: Vec<Track>,
    units: mpsc::UnboundedReceiver<MediaUnit>,
    pub closed: Arc<std::sync::atomic::AtomicBool>,
}

impl ChannelTransport {
    pub fn new(target: &str, tracks: Vec<Track>) -> (Self, mpsc::UnboundedSender<MediaUnit>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            target: Some(target.to_string()),
            tracks,
            units: rx,
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        (transport, tx)
    }
}

#[async_trait]
impl IngestTransport for ChannelTransport {
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn accept(&mut self) -> Result<Negotiation> {
        Ok(Negotiation {
            intent: Intent::Publish,
            target: self.target.clone(),
        })
    }

    async fn tracks(&mut self) -> Result<Vec<Track>> {
        Ok(self.tracks.clone())
    }

    async fn read(&mut self) -> Result<MediaUnit> {
        self.units.recv().await.ok_or(Error::ConnectionClosed)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub ntp: DateTime<Utc>,
    pub pts: Duration,
    pub bytes: usize,
}

#[derive(Default)]
pub struct Recording {
    pub video: Mutex<Vec<RecordedWrite>>,
    pub audio: Mutex<Vec<RecordedWrite>>,
    pub requests: AtomicUsize,
    pub closes: AtomicUsize,
}

pub struct RecordingSegmenter {
    record: Arc<Recording>,
}

impl Segmenter for RecordingSegmenter {
    fn start(&self) -> std::result::Result<(), SegmenterError> {
        Ok(())
    }

    fn close(&self) {
        self.record.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn write_video(
        &self,
        ntp: DateTime<Utc>,
        pts: Duration,
        _dts: Duration,
        au: &[Bytes],
    ) -> std::result::Result<(), SegmenterError> {
        self.record.video.lock().unwrap().push(RecordedWrite {
            ntp,
            pts,
            bytes: au.iter().map(Bytes::len).sum(),
        });
        Ok(())
    }

    fn write_audio(
        &self,
        ntp: DateTime<Utc>,
        pts: Duration,
        aus: &[Bytes],
    ) -> std::result::Result<(), SegmenterError> {
        self.record.audio.lock().unwrap().push(RecordedWrite {
            ntp,
            pts,
            bytes: aus.iter().map(Bytes::len).sum(),
        });
        Ok(())
    }

    fn handle(&self, _request: Request<Body>) -> Response {
        self.record.requests.fetch_add(1, Ordering::SeqCst);
        (StatusCode::OK, "recorded").into_response()
    }
}

/// Factory handing out segmenters that share one [`Recording`]
#[derive(Default)]
pub struct RecordingFactory {
    pub record: Arc<Recording>,
    pub created: AtomicUsize,
    pub last_tracks: Mutex<Option<TrackDescriptors>>,
}

impl SegmenterFactory for RecordingFactory {
    fn create(
        &self,
        tracks: TrackDescriptors,
        _settings: SegmenterSettings,
    ) -> std::result::Result<Arc<dyn Segmenter>, SegmenterError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_tracks.lock().unwrap() = Some(tracks);
        Ok(Arc::new(RecordingSegmenter {
            record: Arc::clone(&self.record),
        }))
    }
}

/// Stage at which [`FailingFactory`] refuses to produce a segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Create,
    Start,
}

struct UnstartableSegmenter {
    closes: Arc<AtomicUsize>,
}

impl Segmenter for UnstartableSegmenter {
    fn start(&self) -> std::result::Result<(), SegmenterError> {
        Err(SegmenterError::Start("muxer refused tracks".into()))
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn write_video(
        &self,
        _ntp: DateTime<Utc>,
        _pts: Duration,
        _dts: Duration,
        _au: &[Bytes],
    ) -> std::result::Result<(), SegmenterError> {
        Err(SegmenterError::NotStarted)
    }

    fn write_audio(
        &self,
        _ntp: DateTime<Utc>,
        _pts: Duration,
        _aus: &[Bytes],
    ) -> std::result::Result<(), SegmenterError> {
        Err(SegmenterError::NotStarted)
    }

    fn handle(&self, _request: Request<Body>) -> Response {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// Factory whose segmenters never get running
pub struct FailingFactory {
    pub fail_at: FailAt,
    pub attempts: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
}

impl FailingFactory {
    pub fn new(fail_at: FailAt) -> Self {
        Self {
            fail_at,
            attempts: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SegmenterFactory for FailingFactory {
    fn create(
        &self,
        _tracks: TrackDescriptors,
        _settings: SegmenterSettings,
    ) -> std::result::Result<Arc<dyn Segmenter>, SegmenterError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.fail_at {
            FailAt::Create => Err(SegmenterError::Start("no muxer available".into())),
            FailAt::Start => Ok(Arc::new(UnstartableSegmenter {
                closes: Arc::clone(&self.closes),
            })),
        }
    }
}

pub fn context(factory: Arc<dyn SegmenterFactory>, config: ServerConfig) -> SessionContext {
    let bridge = OutputBridge::new(factory, config.segmenter_settings());
    SessionContext::new(
        Arc::new(config),
        Arc::new(StreamRegistry::new()),
        Arc::new(bridge),
        Arc::new(ResourceMonitor::new()),
    )
}

pub fn video_track() -> Track {
    Track {
        id: VIDEO,
        codec: TrackCodec::H264(VideoParams::new(
            Bytes::from_static(&[0x67, 0x42, 0x00, 0x1f]),
            Bytes::from_static(&[0x68, 0xce, 0x3c, 0x80]),
        )),
    }
}

pub fn audio_track() -> Track {
    Track {
        id: AUDIO,
        codec: TrackCodec::Aac(AudioParams::new(44_100, 2)),
    }
}

pub fn video_unit(ms: u64, idr: bool) -> MediaUnit {
    let header = if idr { 0x65 } else { 0x41 };
    MediaUnit::Video {
        track: VIDEO,
        pts: Duration::from_millis(ms),
        dts: Duration::from_millis(ms),
        parts: vec![Bytes::from(vec![header, 0x88, 0x84, 0x00])],
    }
}

pub fn audio_unit(ms: u64) -> MediaUnit {
    MediaUnit::Audio {
        track: AUDIO,
        pts: Duration::from_millis(ms),
        payload: Bytes::from_static(&[0x21, 0x10, 0x05]),
    }
}

/// Poll `check` until it holds or a second elapses
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
