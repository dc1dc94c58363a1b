//! Multi-stream RTMP ingest server republishing live streams as HLS
//!
//! ```text
//! encoder --RTMP--> Acceptor --> IngestSession --> OutputBridge --> Segmenter
//!                                     |                                 ^
//!                                StreamRegistry <---- ServingBridge <-- HTTP
//! ```
//!
//! Each accepted connection runs an [`IngestSession`](session::IngestSession)
//! on its own task. A publish claims a [`Stream`](registry::Stream) under its
//! key, starts the stream's segmenter and relays access units into it; HTTP
//! players fetch `/live/{key}/index.m3u8` and its segments from the same
//! entry.
//!
//! The transport and the segmenter sit behind traits
//! ([`IngestTransport`](transport::IngestTransport),
//! [`Segmenter`](segmenter::Segmenter)); the crate ships RTMP and in-memory
//! HLS/MPEG-TS implementations.

pub mod amf;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod segmenter;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
pub use registry::{StreamKey, StreamRegistry};
pub use server::{Acceptor, ServerConfig};
