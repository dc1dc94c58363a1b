//! Ingest session driver
//!
//! Owns one inbound connection from handshake to teardown. Every exit path,
//! panics included, ends in [`IngestSession::teardown`], which closes the
//! transport and releases the registry entry exactly once.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::error::{Error, Result};
use crate::registry::{Stream, StreamKey, DEFAULT_STREAM_KEY};
use crate::session::context::SessionContext;
use crate::session::output::{OutputLayout, WriteOutcome};
use crate::session::state::{SessionPhase, SessionState};
use crate::transport::{IngestTransport, Intent, MediaUnit, Track, TrackCodec, TrackId};

/// Where units of a discovered track are forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackSink {
    Video,
    Audio,
}

/// Summary of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: u64,
    pub stream_key: Option<StreamKey>,
    pub intent: Option<Intent>,
    pub units_relayed: u64,
    pub segmenter_started: bool,
    /// Phase the session was in when it stopped driving
    pub last_phase: SessionPhase,
}

pub struct IngestSession<T> {
    state: SessionState,
    transport: T,
    ctx: SessionContext,
    sinks: HashMap<TrackId, TrackSink>,
    segmenter_started: bool,
    /// Entry this session joined or created
    stream: Option<Arc<Stream>>,
}

impl<T: IngestTransport> IngestSession<T> {
    pub fn new(id: u64, transport: T, ctx: SessionContext) -> Self {
        Self {
            state: SessionState::new(id, None),
            transport,
            ctx,
            sinks: HashMap::new(),
            segmenter_started: false,
            stream: None,
        }
    }

    pub fn with_peer(mut self, peer: std::net::SocketAddr) -> Self {
        self.state.peer_addr = Some(peer);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the connection to completion
    pub async fn run(mut self) -> SessionReport {
        let outcome = AssertUnwindSafe(self.drive()).catch_unwind().await;
        let last_phase = self.state.phase();

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_disconnect() => {
                tracing::info!(
                    session_id = self.state.id,
                    phase = ?last_phase,
                    error = %e,
                    "Peer disconnected"
                );
            }
            Ok(Err(e)) => match last_phase {
                SessionPhase::Handshaking | SessionPhase::Negotiating => {
                    tracing::warn!(
                        session_id = self.state.id,
                        peer = ?self.state.peer_addr,
                        error = %e,
                        "Connection failed before publish"
                    );
                }
                _ => {
                    tracing::error!(
                        session_id = self.state.id,
                        stream = ?self.state.stream_key,
                        error = %e,
                        "Session failed"
                    );
                }
            },
            Err(panic) => {
                tracing::error!(
                    session_id = self.state.id,
                    stream = ?self.state.stream_key,
                    panic = %panic_message(&*panic),
                    "Session panicked"
                );
            }
        }

        let stream_key = self.state.stream_key.clone();
        self.teardown().await;

        SessionReport {
            id: self.state.id,
            stream_key,
            intent: self.state.intent,
            units_relayed: self.state.units_relayed,
            segmenter_started: self.segmenter_started,
            last_phase,
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let handshake_timeout = self.ctx.config.handshake_timeout;
        let read_timeout = self.ctx.config.read_timeout;

        within(handshake_timeout, self.transport.initialize()).await?;
        self.state.transition(SessionPhase::Negotiating);

        let negotiation = within(handshake_timeout, self.transport.accept()).await?;
        self.state.intent = Some(negotiation.intent);
        if negotiation.intent != Intent::Publish {
            tracing::warn!(
                session_id = self.state.id,
                peer = ?self.state.peer_addr,
                intent = ?negotiation.intent,
                target = ?negotiation.target,
                "Rejected connection: only publishing is accepted"
            );
            return Ok(());
        }

        let key = match negotiation.target.as_deref() {
            Some(target) => StreamKey::from_path(target),
            None => {
                tracing::warn!(
                    session_id = self.state.id,
                    "Publish without a target, using stream key {}",
                    DEFAULT_STREAM_KEY
                );
                StreamKey::new(DEFAULT_STREAM_KEY)
            }
        };

        let stream = self.ctx.registry.get_or_create(&key).await;
        self.stream = Some(Arc::clone(&stream));
        self.state.stream_key = Some(key);
        self.state.transition(SessionPhase::TrackDiscovery);

        let tracks = within(read_timeout, self.transport.tracks()).await?;
        match self.discover(&stream, &tracks) {
            Some(layout) => {
                if let Err(e) = self.ctx.bridge.start_segmenter(&stream, layout) {
                    tracing::error!(stream = %stream.key(), error = %e, "Failed to start segmenter");
                    return Err(e.into());
                }
                self.segmenter_started = true;
            }
            None => {
                tracing::warn!(
                    stream = %stream.key(),
                    "No video track, segmenter not started; stream will not be playable"
                );
            }
        }

        self.state.transition(SessionPhase::Streaming);
        tracing::info!(
            session_id = self.state.id,
            stream = %stream.key(),
            peer = ?self.state.peer_addr,
            "Publishing started"
        );

        self.relay(&stream, read_timeout).await
    }

    /// Capture codec parameters and register sinks; returns the output
    /// layout to start, if any
    fn discover(&mut self, stream: &Stream, tracks: &[Track]) -> Option<OutputLayout> {
        let mut has_video = false;
        let mut has_audio = false;

        for track in tracks {
            match &track.codec {
                TrackCodec::H264(params) if !has_video => {
                    has_video = true;
                    if !params.is_complete() {
                        tracing::debug!(stream = %stream.key(), "Video track without parameter sets");
                    }
                    stream.set_video_params(params.clone());
                    self.sinks.insert(track.id, TrackSink::Video);
                }
                TrackCodec::Aac(params) if !has_audio => {
                    has_audio = true;
                    let (resolved, rate_defaulted, channels_defaulted) = params.with_defaults();
                    if rate_defaulted || channels_defaulted {
                        tracing::warn!(
                            stream = %stream.key(),
                            sample_rate = resolved.sample_rate,
                            channels = resolved.channel_count,
                            "Audio parameters not announced, using defaults"
                        );
                    }
                    stream.set_audio_params(resolved);
                    self.sinks.insert(track.id, TrackSink::Audio);
                }
                TrackCodec::H264(_) | TrackCodec::Aac(_) => {
                    tracing::debug!(stream = %stream.key(), track = track.id, "Ignoring additional track");
                }
                TrackCodec::Other(codec) => {
                    tracing::warn!(stream = %stream.key(), track = track.id, codec = %codec, "Unsupported codec");
                }
            }
        }

        tracing::debug!(stream = %stream.key(), has_video, has_audio, "Tracks discovered");

        if has_video {
            Some(OutputLayout::AudioVideo)
        } else if has_audio && self.ctx.config.audio_only_output {
            Some(OutputLayout::AudioOnly)
        } else {
            None
        }
    }

    async fn relay(&mut self, stream: &Stream, read_timeout: Duration) -> Result<()> {
        loop {
            if self.ctx.shutdown.is_cancelled() {
                tracing::info!(stream = %stream.key(), "Server stopping, ending stream");
                return Ok(());
            }

            let unit = tokio::select! {
                biased;
                _ = self.ctx.shutdown.cancelled() => continue,
                read = tokio::time::timeout(read_timeout, self.transport.read()) => match read {
                    Ok(Ok(unit)) => unit,
                    Ok(Err(e)) if e.is_disconnect() => {
                        tracing::info!(stream = %stream.key(), reason = %e, "Publisher disconnected");
                        return Ok(());
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        tracing::info!(stream = %stream.key(), timeout = ?read_timeout, "Publisher idle, ending stream");
                        return Ok(());
                    }
                },
            };

            self.dispatch(stream, unit);
        }
    }

    fn dispatch(&mut self, stream: &Stream, unit: MediaUnit) {
        self.ctx.monitor.add_ingested(unit.byte_len() as u64);

        let outcome = match (self.sinks.get(&unit.track()), unit) {
            (Some(TrackSink::Video), MediaUnit::Video { pts, dts, parts, .. }) => {
                self.ctx.bridge.write_video(stream, pts, dts, &parts)
            }
            (Some(TrackSink::Audio), MediaUnit::Audio { pts, payload, .. }) => {
                self.ctx.bridge.write_audio(stream, pts, &payload)
            }
            (_, unit) => {
                tracing::trace!(stream = %stream.key(), track = unit.track(), "No sink for unit");
                return;
            }
        };

        if outcome == WriteOutcome::Written {
            self.state.units_relayed += 1;
        }
    }

    async fn teardown(&mut self) {
        if self.state.is_closed() {
            return;
        }

        self.transport.close().await;

        if matches!(
            self.state.phase(),
            SessionPhase::TrackDiscovery | SessionPhase::Streaming
        ) {
            self.state.transition(SessionPhase::Draining);
        }
        // Only the joined entry is released: once it is gone, a newer
        // publisher's entry under the same key belongs to that publisher.
        if let Some(stream) = self.stream.take() {
            self.ctx.registry.remove_entry(&stream).await;
        }
        self.state.transition(SessionPhase::Closed);

        tracing::debug!(
            session_id = self.state.id,
            duration = ?self.state.duration(),
            units = self.state.units_relayed,
            bytes = self.transport.bytes_received(),
            "Session closed"
        );
    }
}

async fn within<F, R>(limit: Duration, fut: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(limit))?
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::registry::StreamRegistry;
    use crate::segmenter::{HlsSegmenterFactory, SegmenterSettings};
    use crate::server::config::ServerConfig;
    use crate::session::output::OutputBridge;
    use crate::stats::ResourceMonitor;
    use crate::transport::Negotiation;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Scripted {
        fail_handshake: bool,
        intent: Option<Intent>,
        target: Option<String>,
        tracks: Vec<Track>,
        units: std::collections::VecDeque<MediaUnit>,
        panic_on_read: bool,
        closed: bool,
    }

    #[async_trait]
    impl IngestTransport for Scripted {
        async fn initialize(&mut self) -> Result<()> {
            if self.fail_handshake {
                return Err(crate::error::HandshakeError::InvalidVersion(0).into());
            }
            Ok(())
        }

        async fn accept(&mut self) -> Result<Negotiation> {
            Ok(Negotiation {
                intent: self.intent.unwrap_or(Intent::Publish),
                target: self.target.clone(),
            })
        }

        async fn tracks(&mut self) -> Result<Vec<Track>> {
            Ok(self.tracks.clone())
        }

        async fn read(&mut self) -> Result<MediaUnit> {
            if self.panic_on_read {
                panic!("demuxer bug");
            }
            self.units.pop_front().ok_or(Error::ConnectionClosed)
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn context() -> SessionContext {
        let config = ServerConfig::default();
        let bridge = OutputBridge::new(
            Arc::new(HlsSegmenterFactory::new()),
            SegmenterSettings::default(),
        );
        SessionContext::new(
            Arc::new(config),
            Arc::new(StreamRegistry::new()),
            Arc::new(bridge),
            Arc::new(ResourceMonitor::new()),
        )
    }

    fn video_track() -> Track {
        Track {
            id: 0,
            codec: TrackCodec::H264(crate::media::VideoParams::default()),
        }
    }

    #[tokio::test]
    async fn test_handshake_failure_never_touches_registry() {
        let ctx = context();
        let transport = Scripted {
            fail_handshake: true,
            ..Default::default()
        };
        let report = IngestSession::new(1, transport, ctx.clone()).run().await;

        assert_eq!(report.last_phase, SessionPhase::Handshaking);
        assert!(report.stream_key.is_none());
        assert_eq!(ctx.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_consumer_rejected() {
        let ctx = context();
        let transport = Scripted {
            intent: Some(Intent::Consume),
            target: Some("/live/abc".into()),
            ..Default::default()
        };
        let report = IngestSession::new(1, transport, ctx.clone()).run().await;

        assert_eq!(report.intent, Some(Intent::Consume));
        assert_eq!(report.last_phase, SessionPhase::Negotiating);
        assert!(ctx.registry.get("abc").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_target_uses_default_key() {
        let ctx = context();
        let transport = Scripted {
            tracks: vec![video_track()],
            ..Default::default()
        };
        let report = IngestSession::new(1, transport, ctx.clone()).run().await;

        assert_eq!(report.stream_key, Some(StreamKey::new("default")));
        assert!(report.segmenter_started);
        assert!(ctx.registry.get("default").await.is_none());
    }

    #[tokio::test]
    async fn test_panic_still_releases_stream() {
        let ctx = context();
        let transport = Scripted {
            target: Some("/live/boom".into()),
            tracks: vec![video_track()],
            panic_on_read: true,
            ..Default::default()
        };
        let report = IngestSession::new(7, transport, ctx.clone()).run().await;

        assert_eq!(report.last_phase, SessionPhase::Streaming);
        assert!(ctx.registry.get("boom").await.is_none());
        assert_eq!(ctx.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_unsupported_tracks_get_no_sink() {
        let ctx = context();
        let transport = Scripted {
            target: Some("/live/vp6".into()),
            tracks: vec![Track {
                id: 0,
                codec: TrackCodec::Other("flv video codec 4".into()),
            }],
            units: [MediaUnit::Audio {
                track: 0,
                pts: Duration::ZERO,
                payload: bytes::Bytes::from_static(&[1, 2, 3]),
            }]
            .into(),
            ..Default::default()
        };
        let report = IngestSession::new(1, transport, ctx.clone()).run().await;

        assert!(!report.segmenter_started);
        assert_eq!(report.units_relayed, 0);
        assert_eq!(ctx.monitor.snapshot(0).bytes_ingested, 3);
    }

    #[tokio::test]
    async fn test_cancelled_session_exits() {
        let ctx = context();
        ctx.shutdown.cancel();
        let transport = Scripted {
            target: Some("/live/stop".into()),
            tracks: vec![video_track()],
            units: [MediaUnit::Video {
                track: 0,
                pts: Duration::ZERO,
                dts: Duration::ZERO,
                parts: vec![bytes::Bytes::from_static(&[0x65, 0x00])],
            }]
            .into(),
            ..Default::default()
        };
        let report = IngestSession::new(1, transport, ctx.clone()).run().await;

        assert_eq!(report.units_relayed, 0);
        assert!(ctx.registry.get("stop").await.is_none());
    }
}
