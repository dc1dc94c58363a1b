//! Error types
//!
//! One crate-wide [`Error`] wraps the per-layer errors so `?` works across
//! the transport, protocol and segmenter boundaries.

use std::io;

use thiserror::Error;

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("segmenter error: {0}")]
    Segmenter(#[from] SegmenterError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("server already running")]
    AlreadyRunning,

    #[error("server has been stopped")]
    Stopped,

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

impl Error {
    /// Whether the error means the peer went away rather than misbehaved
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed | Error::Timeout(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("unsupported RTMP version {0}")]
    InvalidVersion(u8),

    #[error("handshake already completed")]
    AlreadyDone,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AmfError {
    #[error("unexpected end of AMF data")]
    UnexpectedEof,

    #[error("unknown AMF0 marker 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("invalid UTF-8 in AMF string")]
    InvalidUtf8,

    #[error("AMF nesting too deep")]
    NestingTooDeep,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),

    #[error("message of {0} bytes exceeds limit")]
    MessageTooLarge(u32),

    #[error("chunk stream {0} continued without a header")]
    MissingChunkHeader(u32),

    #[error("malformed {0} message")]
    Malformed(&'static str),

    #[error("unexpected command before connect: {0}")]
    UnexpectedCommand(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MediaError {
    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    #[error("invalid AAC packet")]
    InvalidAacPacket,

    #[error("unsupported codec id {0}")]
    UnsupportedCodec(u8),
}

/// Errors raised by an output segmenter
///
/// The variants split into benign ones, which common encoders trigger all
/// the time and which only cost one access unit, and hard failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SegmenterError {
    #[error("DTS is not monotonically increasing (last {last}, got {got})")]
    NonMonotonicDts { last: u64, got: u64 },

    #[error("unable to extract DTS")]
    MissingDts,

    #[error("segmenter not started")]
    NotStarted,

    #[error("segmenter closed")]
    Closed,

    #[error("no track configured for {0}")]
    NoSuchTrack(&'static str),

    #[error("invalid access unit: {0}")]
    InvalidAccessUnit(String),

    #[error("failed to start segmenter: {0}")]
    Start(String),
}

impl SegmenterError {
    /// Whether the failure is expected noise that must not reach the logs
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SegmenterError::NonMonotonicDts { .. } | SegmenterError::MissingDts
        )
    }
}
