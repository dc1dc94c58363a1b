//! RTMP simple handshake
//!
//! ```text
//! Client                         Server
//!   |------ C0 + C1 ------------->|
//!   |<----- S0 + S1 + S2 ---------|
//!   |------ C2 ------------------>|
//! ```
//!
//! No HMAC digest: every mainstream encoder falls back to the simple variant
//! when the server answers with a zero version field in S1.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Client has not sent C0C1 yet
    Start,
    /// Waiting for C0C1 (server) or S0S1S2 (client)
    AwaitPeer,
    /// Server waiting for C2
    AwaitAck,
    Done,
}

/// Sans-IO handshake state machine
///
/// Feed it whatever bytes arrived; it consumes only complete packets and
/// returns the bytes to send back.
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    stage: Stage,
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        let stage = match role {
            HandshakeRole::Client => Stage::Start,
            HandshakeRole::Server => Stage::AwaitPeer,
        };
        Self { role, stage }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Bytes that must be buffered before [`Handshake::process`] can progress
    pub fn bytes_needed(&self) -> usize {
        match (self.role, self.stage) {
            (HandshakeRole::Server, Stage::AwaitPeer) => 1 + HANDSHAKE_SIZE,
            (HandshakeRole::Client, Stage::AwaitPeer) => 1 + 2 * HANDSHAKE_SIZE,
            (_, Stage::AwaitAck) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// C0C1 for a client; servers speak only after hearing from the peer
    pub fn initial(&mut self) -> Option<Bytes> {
        if self.role != HandshakeRole::Client || self.stage != Stage::Start {
            return None;
        }
        let mut out = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        out.put_u8(RTMP_VERSION);
        out.put_slice(&own_packet());
        self.stage = Stage::AwaitPeer;
        Some(out.freeze())
    }

    /// Consume a complete peer packet from `data`
    ///
    /// Returns `Ok(None)` when more data is needed or nothing must be sent.
    pub fn process(&mut self, data: &mut BytesMut) -> Result<Option<Bytes>> {
        if self.stage == Stage::Done {
            return Err(HandshakeError::AlreadyDone.into());
        }
        let needed = self.bytes_needed();
        if needed == 0 || data.len() < needed {
            return Ok(None);
        }

        match (self.role, self.stage) {
            (HandshakeRole::Server, Stage::AwaitPeer) => {
                check_version(data.get_u8())?;
                let c1 = data.split_to(HANDSHAKE_SIZE);

                let mut out = BytesMut::with_capacity(1 + 2 * HANDSHAKE_SIZE);
                out.put_u8(RTMP_VERSION);
                out.put_slice(&own_packet());
                out.put_slice(&echo(&c1));
                self.stage = Stage::AwaitAck;
                Ok(Some(out.freeze()))
            }
            (HandshakeRole::Server, Stage::AwaitAck) => {
                // C2 content is not verified
                data.advance(HANDSHAKE_SIZE);
                self.stage = Stage::Done;
                Ok(None)
            }
            (HandshakeRole::Client, Stage::AwaitPeer) => {
                check_version(data.get_u8())?;
                let s1 = data.split_to(HANDSHAKE_SIZE);
                data.advance(HANDSHAKE_SIZE);
                self.stage = Stage::Done;
                Ok(Some(Bytes::copy_from_slice(&echo(&s1))))
            }
            _ => Ok(None),
        }
    }
}

/// Versions above 3 come from encoders with broken C0; they still speak v3
fn check_version(version: u8) -> Result<()> {
    if version < RTMP_VERSION {
        return Err(HandshakeError::InvalidVersion(version).into());
    }
    Ok(())
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1/S1: time, zero, filler
fn own_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let time = now_millis();
    packet[0..4].copy_from_slice(&time.to_be_bytes());

    let mut state = u64::from(time) | 1;
    for chunk in packet[8..].chunks_mut(8) {
        // xorshift64
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    packet
}

/// C2/S2: the peer's packet with our read time in bytes 4..8
fn echo(peer: &[u8]) -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out.copy_from_slice(&peer[..HANDSHAKE_SIZE]);
    out[4..8].copy_from_slice(&now_millis().to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_client_server_exchange() {
        let mut client = Handshake::new(HandshakeRole::Client);
        let mut server = Handshake::new(HandshakeRole::Server);

        let c0c1 = client.initial().unwrap();
        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);

        let mut inbound = BytesMut::from(&c0c1[..]);
        let s0s1s2 = server.process(&mut inbound).unwrap().unwrap();
        assert_eq!(s0s1s2.len(), 1 + 2 * HANDSHAKE_SIZE);
        assert!(inbound.is_empty());
        // S2 echoes C1's random section
        assert_eq!(&s0s1s2[1 + HANDSHAKE_SIZE + 8..], &c0c1[9..]);

        let mut inbound = BytesMut::from(&s0s1s2[..]);
        let c2 = client.process(&mut inbound).unwrap().unwrap();
        assert!(client.is_done());

        let mut inbound = BytesMut::from(&c2[..]);
        assert!(server.process(&mut inbound).unwrap().is_none());
        assert!(server.is_done());
    }

    #[test]
    fn test_partial_input_waits() {
        let mut server = Handshake::new(HandshakeRole::Server);
        let mut inbound = BytesMut::from(&[RTMP_VERSION; 100][..]);
        assert!(server.process(&mut inbound).unwrap().is_none());
        assert_eq!(inbound.len(), 100);
        assert!(server.initial().is_none());
    }

    #[test]
    fn test_rejects_old_version() {
        let mut server = Handshake::new(HandshakeRole::Server);
        let mut inbound = BytesMut::from(&[0u8; 1 + HANDSHAKE_SIZE][..]);
        let err = server.process(&mut inbound).unwrap_err();
        assert!(matches!(
            err,
            Error::Handshake(HandshakeError::InvalidVersion(0))
        ));
    }

    #[test]
    fn test_process_after_done_fails() {
        let mut server = Handshake::new(HandshakeRole::Server);
        let mut inbound = BytesMut::from(&[RTMP_VERSION; 1 + 2 * HANDSHAKE_SIZE][..]);
        server.process(&mut inbound).unwrap();
        server.process(&mut inbound).unwrap();
        assert!(server.is_done());
        assert!(matches!(
            server.process(&mut inbound),
            Err(Error::Handshake(HandshakeError::AlreadyDone))
        ));
    }
}
