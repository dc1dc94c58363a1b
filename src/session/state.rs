//! Session state machine
//!
//! ```text
//! Handshaking -> Negotiating -> TrackDiscovery -> Streaming -> Draining -> Closed
//!      |              |               |                            ^
//!      +--------------+---------------+------> Closed    (errors)  |
//!                                     +----------------------------+
//! ```
//!
//! `Closed` is terminal. Once a stream key has been claimed the session must
//! pass through `Draining`, which is where the registry entry is removed.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::registry::StreamKey;
use crate::transport::Intent;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport handshake in progress
    Handshaking,
    /// Waiting to learn whether the peer publishes or consumes
    Negotiating,
    /// Publish accepted, enumerating tracks
    TrackDiscovery,
    /// Relaying media
    Streaming,
    /// Read loop ended, releasing the stream
    Draining,
    /// Terminal
    Closed,
}

impl SessionPhase {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Handshaking, Negotiating)
                | (Negotiating, TrackDiscovery)
                | (TrackDiscovery, Streaming)
                | (TrackDiscovery, Draining)
                | (Streaming, Draining)
                | (Handshaking | Negotiating | Draining, Closed)
        )
    }
}

/// Mutable per-connection state
#[derive(Debug)]
pub struct SessionState {
    pub id: u64,
    pub peer_addr: Option<SocketAddr>,
    phase: SessionPhase,
    connected_at: Instant,
    /// Intent reported by negotiation
    pub intent: Option<Intent>,
    /// Key claimed in the registry, set during track discovery
    pub stream_key: Option<StreamKey>,
    pub units_relayed: u64,
}

impl SessionState {
    pub fn new(id: u64, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Handshaking,
            connected_at: Instant::now(),
            intent: None,
            stream_key: None,
            units_relayed: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move to `next`; illegal transitions are refused and reported
    pub fn transition(&mut self, next: SessionPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            tracing::debug!(
                session_id = self.id,
                from = ?self.phase,
                to = ?next,
                "Refused session transition"
            );
            return false;
        }
        self.phase = next;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
