//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::segmenter::SegmenterSettings;

pub const DEFAULT_RTMP_PORT: u16 = 1935;

/// Ingest server options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Handshake and negotiation must complete within this time
    pub handshake_timeout: Duration,

    /// A publisher silent for this long is considered gone
    pub read_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Completed segments kept per stream
    pub segment_count: usize,

    /// Target segment duration
    pub segment_duration: Duration,

    /// Start an audio-only segmenter when a publish carries no video
    pub audio_only_output: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_RTMP_PORT)),
            max_connections: 0,
            handshake_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
            segment_count: 5,
            segment_duration: Duration::from_secs(2),
            audio_only_output: false,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// At least one segment is always kept
    pub fn segment_count(mut self, count: usize) -> Self {
        self.segment_count = count.max(1);
        self
    }

    pub fn segment_duration(mut self, duration: Duration) -> Self {
        self.segment_duration = duration;
        self
    }

    pub fn audio_only_output(mut self, enabled: bool) -> Self {
        self.audio_only_output = enabled;
        self
    }

    pub fn segmenter_settings(&self) -> SegmenterSettings {
        SegmenterSettings {
            segment_count: self.segment_count,
            segment_duration: self.segment_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 1935);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert!(config.tcp_nodelay);
        assert!(!config.audio_only_output);
        assert_eq!(config.segmenter_settings(), SegmenterSettings::default());
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:1936".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 1936);
    }

    #[test]
    fn test_segment_count_floor() {
        let config = ServerConfig::default().segment_count(0);
        assert_eq!(config.segment_count, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:1935".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .handshake_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(30))
            .tcp_nodelay(false)
            .segment_count(3)
            .segment_duration(Duration::from_secs(4))
            .audio_only_output(true);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert!(!config.tcp_nodelay);
        assert!(config.audio_only_output);

        let settings = config.segmenter_settings();
        assert_eq!(settings.segment_count, 3);
        assert_eq!(settings.segment_duration, Duration::from_secs(4));
    }
}
