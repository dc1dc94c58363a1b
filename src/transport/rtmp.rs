//! RTMP publish transport
//!
//! Server side of one RTMP connection, implementing [`IngestTransport`].
//! Only the publish path is served: a `play` is reported as
//! [`Intent::Consume`] and left for the session to reject.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{
    IngestTransport, Intent, MediaUnit, Negotiation, Track, TrackCodec, TrackId,
    TransportFactory,
};
use crate::amf::{object, AmfValue};
use crate::error::{Error, Result};
use crate::media::aac::{AacPacket, AudioSpecificConfig};
use crate::media::flv::{AudioTagHeader, VideoTagHeader};
use crate::media::h264::{self, AvcConfig, AvcPacket};
use crate::media::{AudioParams, VideoParams};
use crate::protocol::constants::*;
use crate::protocol::message::{self, Command, DataMessage, RtmpMessage};
use crate::protocol::{ChunkDecoder, ChunkEncoder, Handshake, HandshakeRole};

pub const VIDEO_TRACK: TrackId = 0;
pub const AUDIO_TRACK: TrackId = 1;

/// Media messages inspected before track discovery gives up waiting
const DISCOVERY_MESSAGE_LIMIT: usize = 30;

/// Maps 32-bit wrapping RTMP timestamps onto a monotonic timeline that
/// starts at the first media message
#[derive(Debug, Default)]
struct MediaClock {
    base: Option<u64>,
    last: u32,
    epoch: u64,
}

impl MediaClock {
    fn relative(&mut self, ts: u32) -> u64 {
        let half = 1u32 << 31;
        let mut epoch = self.epoch;
        if self.base.is_some() {
            if ts < self.last && self.last - ts > half {
                self.epoch += 1 << 32;
                epoch = self.epoch;
                self.last = ts;
            } else if ts > self.last && ts - self.last > half {
                // Late message from before the wrap
                epoch = self.epoch.saturating_sub(1 << 32);
            } else {
                self.last = self.last.max(ts);
            }
        } else {
            self.last = ts;
        }

        let absolute = epoch + ts as u64;
        let base = *self.base.get_or_insert(absolute);
        absolute.saturating_sub(base)
    }
}

/// What `onMetaData` says the publisher will send
#[derive(Debug, Clone, Copy)]
struct Expected {
    video: bool,
    audio: bool,
}

impl Expected {
    fn from_metadata(meta: &AmfValue) -> Option<Self> {
        let announced = |key: &str| match meta.get(key) {
            Some(AmfValue::Number(id)) => Some(*id != 0.0),
            Some(AmfValue::String(s)) => Some(!s.is_empty()),
            _ => None,
        };
        let video = announced("videocodecid");
        let audio = announced("audiocodecid");
        if video.is_none() && audio.is_none() {
            return None;
        }
        Some(Self {
            video: video.unwrap_or(false),
            audio: audio.unwrap_or(false),
        })
    }
}

/// Server side of an RTMP connection over any byte stream
pub struct RtmpTransport<S> {
    io: S,
    peer: Option<SocketAddr>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,

    app: String,
    stream_name: Option<String>,
    metadata: Option<AmfValue>,

    avc: Option<AvcConfig>,
    aac: Option<AudioSpecificConfig>,
    /// AVC seen without a sequence header
    raw_video: bool,
    /// AAC seen without a sequence header
    raw_audio: bool,
    other_video: Option<u8>,
    other_audio: Option<u8>,

    pending: VecDeque<RtmpMessage>,
    clock: MediaClock,

    bytes_received: u64,
    peer_window: Option<u32>,
    last_ack: u64,
}

impl<S> RtmpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S, peer: Option<SocketAddr>) -> Self {
        Self {
            io,
            peer,
            read_buf: BytesMut::with_capacity(64 * 1024),
            write_buf: BytesMut::with_capacity(4 * 1024),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            app: String::new(),
            stream_name: None,
            metadata: None,
            avc: None,
            aac: None,
            raw_video: false,
            raw_audio: false,
            other_video: None,
            other_audio: None,
            pending: VecDeque::new(),
            clock: MediaClock::default(),
            bytes_received: 0,
            peer_window: None,
            last_ack: 0,
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// Last `onMetaData` received
    pub fn metadata(&self) -> Option<&AmfValue> {
        self.metadata.as_ref()
    }

    async fn fill(&mut self) -> Result<()> {
        let n = self.io.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.bytes_received += n as u64;

        if let Some(window) = self.peer_window.filter(|w| *w > 0) {
            if self.bytes_received - self.last_ack >= window as u64 {
                self.last_ack = self.bytes_received;
                let ack = message::acknowledgement(self.bytes_received as u32);
                self.send(CSID_PROTOCOL_CONTROL, &ack).await?;
            }
        }
        Ok(())
    }

    async fn send(&mut self, csid: u32, msg: &RtmpMessage) -> Result<()> {
        self.encoder.encode(csid, msg, &mut self.write_buf);
        let out = self.write_buf.split();
        self.io.write_all(&out).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn send_command(&mut self, stream_id: u32, cmd: Command) -> Result<()> {
        let msg = cmd.to_message(stream_id);
        self.send(CSID_COMMAND, &msg).await
    }

    /// Next message that is not protocol control
    async fn next_message(&mut self) -> Result<RtmpMessage> {
        loop {
            while let Some(msg) = self.decoder.decode(&mut self.read_buf)? {
                if !self.handle_control(&msg).await? {
                    return Ok(msg);
                }
            }
            self.fill().await?;
        }
    }

    /// Returns true if `msg` was a control message and has been consumed
    async fn handle_control(&mut self, msg: &RtmpMessage) -> Result<bool> {
        match msg.type_id {
            MSG_SET_CHUNK_SIZE => {
                let size = message::read_u32_body(msg, "set chunk size")?;
                self.decoder.set_chunk_size(size & 0x7FFF_FFFF)?;
                tracing::debug!(size, "Peer chunk size changed");
            }
            MSG_ABORT => {
                let csid = message::read_u32_body(msg, "abort")?;
                self.decoder.abort(csid);
            }
            MSG_WINDOW_ACK_SIZE => {
                let window = message::read_u32_body(msg, "window ack size")?;
                self.peer_window = Some(window);
            }
            MSG_ACKNOWLEDGEMENT | MSG_SET_PEER_BANDWIDTH => {}
            MSG_USER_CONTROL => {
                let (event, value) = message::read_user_control(msg)?;
                if event == UC_PING_REQUEST {
                    self.send(CSID_PROTOCOL_CONTROL, &message::ping_response(value))
                        .await?;
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    async fn on_connect(&mut self, cmd: &Command) -> Result<()> {
        self.app = cmd
            .object
            .get_str("app")
            .unwrap_or_default()
            .trim_matches('/')
            .to_string();

        self.send(CSID_PROTOCOL_CONTROL, &message::window_ack_size(WINDOW_ACK_SIZE))
            .await?;
        self.send(CSID_PROTOCOL_CONTROL, &message::set_peer_bandwidth(PEER_BANDWIDTH))
            .await?;
        self.send(CSID_PROTOCOL_CONTROL, &message::set_chunk_size(SERVER_CHUNK_SIZE))
            .await?;
        self.encoder.set_chunk_size(SERVER_CHUNK_SIZE);

        let properties = object([
            ("fmsVer", AmfValue::from("FMS/3,0,1,123")),
            ("capabilities", 31u32.into()),
        ]);
        let info = object([
            ("level", AmfValue::from("status")),
            ("code", "NetConnection.Connect.Success".into()),
            ("description", "Connection succeeded.".into()),
            ("objectEncoding", 0u32.into()),
        ]);
        self.send_command(
            0,
            Command::new(CMD_RESULT, cmd.transaction_id, properties, vec![info]),
        )
        .await
    }

    async fn reply_result(&mut self, cmd: &Command, value: AmfValue) -> Result<()> {
        if cmd.transaction_id == 0.0 {
            return Ok(());
        }
        self.send_command(
            0,
            Command::new(CMD_RESULT, cmd.transaction_id, AmfValue::Null, vec![value]),
        )
        .await
    }

    async fn on_publish(&mut self, cmd: &Command, stream_id: u32) -> Result<()> {
        self.send(CSID_PROTOCOL_CONTROL, &message::stream_begin(stream_id))
            .await?;
        let name = self.stream_name.clone().unwrap_or_default();
        let status = object([
            ("level", AmfValue::from("status")),
            ("code", "NetStream.Publish.Start".into()),
            ("description", format!("{} is now published.", name).into()),
        ]);
        self.send_command(
            stream_id,
            Command::new(CMD_ON_STATUS, cmd.transaction_id, AmfValue::Null, vec![status]),
        )
        .await
    }

    fn target(&self) -> Option<String> {
        let name = self.stream_name.as_deref().unwrap_or_default();
        let parts: Vec<&str> = [self.app.as_str(), name]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(format!("/{}", parts.join("/")))
        }
    }

    fn on_data(&mut self, msg: &RtmpMessage) {
        match DataMessage::parse(msg.type_id, msg.payload.clone()) {
            Ok(data) => {
                if let Some(meta) = data.metadata() {
                    tracing::debug!(
                        width = meta.get_number("width"),
                        height = meta.get_number("height"),
                        videocodecid = ?meta.get("videocodecid"),
                        audiocodecid = ?meta.get("audiocodecid"),
                        "Received stream metadata"
                    );
                    self.metadata = Some(meta.clone());
                }
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring malformed data message"),
        }
    }

    /// Capture sequence headers; returns the message back if it carries media
    fn inspect_media(&mut self, msg: RtmpMessage) -> Option<RtmpMessage> {
        match msg.type_id {
            MSG_VIDEO => {
                let header = VideoTagHeader::parse(&msg.payload)?;
                if !header.is_avc() {
                    self.other_video = Some(header.codec_id);
                    return None;
                }
                match AvcPacket::parse(msg.payload.slice(1..)) {
                    Ok(AvcPacket::SequenceHeader(config)) => {
                        tracing::debug!(
                            profile = config.profile,
                            level = %config.level_string(),
                            "AVC sequence header"
                        );
                        self.avc = Some(config);
                        None
                    }
                    Ok(AvcPacket::Nalus { .. }) => {
                        self.raw_video = true;
                        Some(msg)
                    }
                    Ok(AvcPacket::EndOfSequence) => None,
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping malformed video message");
                        None
                    }
                }
            }
            MSG_AUDIO => {
                let header = AudioTagHeader::parse(&msg.payload)?;
                if !header.is_aac() {
                    self.other_audio = Some(header.sound_format);
                    return None;
                }
                match AacPacket::parse(msg.payload.slice(1..)) {
                    Ok(AacPacket::SequenceHeader(config)) => {
                        tracing::debug!(
                            sample_rate = config.sample_rate,
                            channels = config.channels(),
                            "AAC sequence header"
                        );
                        self.aac = Some(config);
                        None
                    }
                    Ok(AacPacket::Frame(_)) => {
                        self.raw_audio = true;
                        Some(msg)
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping malformed audio message");
                        None
                    }
                }
            }
            _ => None,
        }
    }

    fn discovery_complete(&self) -> bool {
        let expected = self
            .metadata
            .as_ref()
            .and_then(Expected::from_metadata)
            .unwrap_or(Expected {
                video: true,
                audio: true,
            });
        (!expected.video || self.avc.is_some()) && (!expected.audio || self.aac.is_some())
    }

    fn discovered_tracks(&self) -> Vec<Track> {
        let mut tracks = Vec::with_capacity(2);

        if let Some(config) = &self.avc {
            tracks.push(Track {
                id: VIDEO_TRACK,
                codec: TrackCodec::H264(VideoParams {
                    sps: config.first_sps().cloned(),
                    pps: config.first_pps().cloned(),
                }),
            });
        } else if self.raw_video {
            tracks.push(Track {
                id: VIDEO_TRACK,
                codec: TrackCodec::H264(VideoParams::default()),
            });
        } else if let Some(codec_id) = self.other_video {
            tracks.push(Track {
                id: VIDEO_TRACK,
                codec: TrackCodec::Other(format!("flv video codec {}", codec_id)),
            });
        }

        if let Some(config) = &self.aac {
            tracks.push(Track {
                id: AUDIO_TRACK,
                codec: TrackCodec::Aac(config.params()),
            });
        } else if self.raw_audio {
            tracks.push(Track {
                id: AUDIO_TRACK,
                codec: TrackCodec::Aac(AudioParams::new(0, 0)),
            });
        } else if let Some(format) = self.other_audio {
            tracks.push(Track {
                id: AUDIO_TRACK,
                codec: TrackCodec::Other(format!("flv sound format {}", format)),
            });
        }

        tracks
    }

    /// Turn a media message into a unit; `None` for non-payload messages
    fn demux(&mut self, msg: RtmpMessage) -> Option<MediaUnit> {
        let msg = self.inspect_media(msg)?;
        let dts_ms = self.clock.relative(msg.timestamp);

        match msg.type_id {
            MSG_VIDEO => {
                let AvcPacket::Nalus {
                    composition_time,
                    data,
                } = AvcPacket::parse(msg.payload.slice(1..)).ok()?
                else {
                    return None;
                };
                let length_size = self.avc.as_ref().map(|c| c.nalu_length_size).unwrap_or(4);
                let parts = h264::split_avcc(&data, length_size);
                if parts.is_empty() {
                    return None;
                }
                let pts_ms = (dts_ms as i64 + composition_time as i64).max(0) as u64;
                Some(MediaUnit::Video {
                    track: VIDEO_TRACK,
                    pts: Duration::from_millis(pts_ms),
                    dts: Duration::from_millis(dts_ms),
                    parts,
                })
            }
            MSG_AUDIO => {
                let AacPacket::Frame(payload) = AacPacket::parse(msg.payload.slice(1..)).ok()?
                else {
                    return None;
                };
                if !payload.has_remaining() {
                    return None;
                }
                Some(MediaUnit::Audio {
                    track: AUDIO_TRACK,
                    pts: Duration::from_millis(dts_ms),
                    payload,
                })
            }
            _ => None,
        }
    }
}

#[async_trait]
impl<S> IngestTransport for RtmpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn initialize(&mut self) -> Result<()> {
        let mut handshake = Handshake::new(HandshakeRole::Server);
        while !handshake.is_done() {
            match handshake.process(&mut self.read_buf)? {
                Some(response) => {
                    self.io.write_all(&response).await?;
                    self.io.flush().await?;
                }
                None if self.read_buf.len() < handshake.bytes_needed() => self.fill().await?,
                None => {}
            }
        }
        tracing::debug!(peer = ?self.peer, "Handshake complete");
        Ok(())
    }

    async fn accept(&mut self) -> Result<Negotiation> {
        loop {
            let msg = self.next_message().await?;
            match msg.type_id {
                MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {}
                MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                    self.on_data(&msg);
                    continue;
                }
                _ => continue,
            }

            let cmd = Command::parse(msg.type_id, msg.payload)?;
            tracing::trace!(command = %cmd.name, "Command received");

            match cmd.name.as_str() {
                CMD_CONNECT => self.on_connect(&cmd).await?,
                CMD_RELEASE_STREAM | CMD_FC_PUBLISH => {
                    self.reply_result(&cmd, AmfValue::Undefined).await?
                }
                CMD_CREATE_STREAM => {
                    self.reply_result(&cmd, AmfValue::from(PUBLISH_STREAM_ID)).await?
                }
                CMD_PUBLISH | CMD_PLAY => {
                    let name = cmd.stream_name().unwrap_or_default();
                    let name = name.split('?').next().unwrap_or_default();
                    self.stream_name = (!name.is_empty()).then(|| name.to_string());

                    let stream_id = if msg.stream_id == 0 {
                        PUBLISH_STREAM_ID
                    } else {
                        msg.stream_id
                    };

                    if cmd.name == CMD_PUBLISH {
                        self.on_publish(&cmd, stream_id).await?;
                        return Ok(Negotiation {
                            intent: Intent::Publish,
                            target: self.target(),
                        });
                    }
                    return Ok(Negotiation {
                        intent: Intent::Consume,
                        target: self.target(),
                    });
                }
                other => tracing::trace!(command = other, "Ignoring command"),
            }
        }
    }

    async fn tracks(&mut self) -> Result<Vec<Track>> {
        let mut media_seen = 0;

        while !self.discovery_complete() && media_seen < DISCOVERY_MESSAGE_LIMIT {
            let msg = self.next_message().await?;
            match msg.type_id {
                MSG_DATA_AMF0 | MSG_DATA_AMF3 => self.on_data(&msg),
                MSG_VIDEO | MSG_AUDIO => {
                    media_seen += 1;
                    if let Some(media) = self.inspect_media(msg) {
                        self.pending.push_back(media);
                    }
                }
                _ => {}
            }
        }

        Ok(self.discovered_tracks())
    }

    async fn read(&mut self) -> Result<MediaUnit> {
        loop {
            let msg = match self.pending.pop_front() {
                Some(msg) => msg,
                None => self.next_message().await?,
            };

            match msg.type_id {
                MSG_VIDEO | MSG_AUDIO => {
                    if let Some(unit) = self.demux(msg) {
                        return Ok(unit);
                    }
                }
                MSG_DATA_AMF0 | MSG_DATA_AMF3 => self.on_data(&msg),
                MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                    let cmd = Command::parse(msg.type_id, msg.payload)?;
                    if matches!(cmd.name.as_str(), CMD_FC_UNPUBLISH | CMD_DELETE_STREAM) {
                        tracing::debug!(command = %cmd.name, "Publisher finished");
                        return Err(Error::ConnectionClosed);
                    }
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.io.shutdown().await {
            tracing::trace!(error = %e, "Shutdown of closed connection");
        }
    }

    fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

/// Builds [`RtmpTransport`]s for accepted TCP connections
#[derive(Debug, Clone, Default)]
pub struct RtmpTransportFactory;

impl TransportFactory for RtmpTransportFactory {
    type Transport = RtmpTransport<TcpStream>;

    fn create(&self, stream: TcpStream, peer: SocketAddr) -> Self::Transport {
        RtmpTransport::new(stream, Some(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_first_timestamp() {
        let mut clock = MediaClock::default();
        assert_eq!(clock.relative(5_000), 0);
        assert_eq!(clock.relative(5_040), 40);
        // Audio slightly behind video stays on the same timeline
        assert_eq!(clock.relative(5_020), 20);
    }

    #[test]
    fn test_clock_handles_wraparound() {
        let mut clock = MediaClock::default();
        assert_eq!(clock.relative(u32::MAX - 10), 0);
        assert_eq!(clock.relative(5), 16);
        assert_eq!(clock.relative(u32::MAX - 5), 5);
        assert_eq!(clock.relative(45), 56);
    }

    #[test]
    fn test_expected_tracks_from_metadata() {
        let meta = AmfValue::EcmaArray(vec![
            ("videocodecid".into(), AmfValue::Number(7.0)),
            ("audiocodecid".into(), AmfValue::Number(0.0)),
        ]);
        let expected = Expected::from_metadata(&meta).unwrap();
        assert!(expected.video);
        assert!(!expected.audio);

        let meta = AmfValue::EcmaArray(vec![("audiocodecid".into(), "mp4a".into())]);
        let expected = Expected::from_metadata(&meta).unwrap();
        assert!(!expected.video);
        assert!(expected.audio);

        assert!(Expected::from_metadata(&AmfValue::EcmaArray(vec![])).is_none());
    }

    #[test]
    fn test_target_locator() {
        let (a, _b) = tokio::io::duplex(64);
        let mut transport = RtmpTransport::new(a, None);
        assert_eq!(transport.target(), None);

        transport.app = "live".into();
        transport.stream_name = Some("key".into());
        assert_eq!(transport.target().as_deref(), Some("/live/key"));

        transport.app.clear();
        assert_eq!(transport.target().as_deref(), Some("/key"));
    }

    #[tokio::test]
    async fn test_initialize_rejects_old_version() {
        let io = tokio_test::io::Builder::new().read(&[2u8; 1537]).build();
        let mut transport = RtmpTransport::new(io, None);
        let err = transport.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Handshake(crate::error::HandshakeError::InvalidVersion(2))
        ));
    }

    #[tokio::test]
    async fn test_initialize_eof_is_disconnect() {
        let io = tokio_test::io::Builder::new().read(&[3u8; 100]).build();
        let mut transport = RtmpTransport::new(io, None);
        let err = transport.initialize().await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
