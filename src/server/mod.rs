//! Ingest server: configuration and the connection acceptor

pub mod config;
pub mod listener;

pub use config::{ServerConfig, DEFAULT_RTMP_PORT};
pub use listener::Acceptor;
