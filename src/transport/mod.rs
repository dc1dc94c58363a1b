//! Inbound transport interface
//!
//! The ingest session drives a transport through four steps: handshake,
//! negotiation of what the peer wants, track discovery, then a read loop that
//! yields one demultiplexed media unit per call. [`rtmp`] provides the RTMP
//! implementation; tests substitute scripted transports.

pub mod rtmp;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;

use crate::error::Result;
use crate::media::{AudioParams, VideoParams};

pub use rtmp::{RtmpTransport, RtmpTransportFactory};

/// What the remote side asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Publish,
    Consume,
}

/// Outcome of [`IngestTransport::accept`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub intent: Intent,
    /// Path-like locator of the stream, e.g. `/live/mystream`
    pub target: Option<String>,
}

pub type TrackId = u32;

/// Codec identity of a discovered track
#[derive(Debug, Clone, PartialEq)]
pub enum TrackCodec {
    H264(VideoParams),
    Aac(AudioParams),
    /// Anything the output side cannot package
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub codec: TrackCodec,
}

/// One demultiplexed unit, timestamps relative to the start of the stream
#[derive(Debug, Clone, PartialEq)]
pub enum MediaUnit {
    Video {
        track: TrackId,
        pts: Duration,
        dts: Duration,
        /// NAL units without start codes or length prefixes
        parts: Vec<Bytes>,
    },
    Audio {
        track: TrackId,
        pts: Duration,
        payload: Bytes,
    },
}

impl MediaUnit {
    pub fn track(&self) -> TrackId {
        match self {
            MediaUnit::Video { track, .. } | MediaUnit::Audio { track, .. } => *track,
        }
    }

    /// Payload bytes carried by the unit
    pub fn byte_len(&self) -> usize {
        match self {
            MediaUnit::Video { parts, .. } => parts.iter().map(Bytes::len).sum(),
            MediaUnit::Audio { payload, .. } => payload.len(),
        }
    }
}

/// Server side of one inbound media connection
#[async_trait]
pub trait IngestTransport: Send {
    /// Run the transport handshake
    async fn initialize(&mut self) -> Result<()>;

    /// Process signalling until the peer's intent is known
    async fn accept(&mut self) -> Result<Negotiation>;

    /// Discover the elementary tracks of a publish
    async fn tracks(&mut self) -> Result<Vec<Track>>;

    /// Next media unit; fails once the connection ends
    async fn read(&mut self) -> Result<MediaUnit>;

    /// Close the underlying connection
    async fn close(&mut self);

    /// Bytes received so far, protocol overhead included
    fn bytes_received(&self) -> u64 {
        0
    }
}

/// Wraps accepted sockets into transports
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: IngestTransport + 'static;

    fn create(&self, stream: TcpStream, peer: SocketAddr) -> Self::Transport;
}
