//! RTMP chunk stream layer
//!
//! ```text
//! +-------------+----------------+-------------------+--------------+
//! | Basic (1-3) | Message (0-11) | Extended ts (0/4) | Chunk data   |
//! +-------------+----------------+-------------------+--------------+
//! fmt 0: timestamp, length, type id, stream id (LE)
//! fmt 1: timestamp delta, length, type id
//! fmt 2: timestamp delta
//! fmt 3: nothing, inherits everything from the previous chunk
//! ```

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::{
    DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE,
};
use crate::protocol::message::RtmpMessage;

#[derive(Debug, Default)]
struct ChunkStreamState {
    timestamp: u32,
    /// Timestamp field of the last header, reapplied by fmt 3 message starts
    delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
    has_header: bool,
    buffer: BytesMut,
}

/// Reassembles messages from interleaved chunks
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Apply a peer Set Chunk Size
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Drop the partial message on `csid`
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.buffer.clear();
        }
    }

    /// Consume complete chunks from `buf` until a message completes
    ///
    /// Returns `Ok(None)` when `buf` holds no complete chunk; partial input is
    /// left in place.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpMessage>> {
        loop {
            let Some(header) = self.peek_header(buf)? else {
                return Ok(None);
            };

            let state = self.streams.entry(header.csid).or_default();
            let starting = state.buffer.is_empty();
            let length = header.length.unwrap_or(state.length);
            if length > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::MessageTooLarge(length).into());
            }

            let remaining = (length as usize).saturating_sub(state.buffer.len());
            let data_len = remaining.min(self.chunk_size as usize);
            if buf.len() < header.size + data_len {
                return Ok(None);
            }
            buf.advance(header.size);

            if let Some(length) = header.length {
                state.length = length;
            }
            if let Some(type_id) = header.type_id {
                state.type_id = type_id;
            }
            if let Some(stream_id) = header.stream_id {
                state.stream_id = stream_id;
            }
            if header.fmt != 3 {
                state.extended = header.extended;
            }
            state.has_header = true;

            match (header.fmt, header.timestamp) {
                (0, Some(ts)) => {
                    state.timestamp = ts;
                    state.delta = ts;
                }
                (_, Some(delta)) => {
                    state.delta = delta;
                    state.timestamp = state.timestamp.wrapping_add(delta);
                }
                (_, None) if starting => {
                    state.timestamp = state.timestamp.wrapping_add(state.delta);
                }
                _ => {}
            }

            state.buffer.extend_from_slice(&buf.split_to(data_len));

            if state.buffer.len() >= state.length as usize {
                let payload = state.buffer.split().freeze();
                return Ok(Some(RtmpMessage::new(
                    state.type_id,
                    state.stream_id,
                    state.timestamp,
                    payload,
                )));
            }
        }
    }

    fn peek_header(&self, buf: &BytesMut) -> Result<Option<ParsedHeader>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        let fmt = first >> 6;
        let (csid, basic_len) = match first & 0x3F {
            0 if buf.len() >= 2 => (64 + buf[1] as u32, 2),
            1 if buf.len() >= 3 => (64 + buf[1] as u32 + ((buf[2] as u32) << 8), 3),
            0 | 1 => return Ok(None),
            id => (id as u32, 1),
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + header_len {
            return Ok(None);
        }

        let previous = self.streams.get(&csid);
        if fmt != 0 && !previous.map(|s| s.has_header).unwrap_or(false) {
            return Err(ProtocolError::MissingChunkHeader(csid).into());
        }

        let h = &buf[basic_len..basic_len + header_len];
        let mut parsed = ParsedHeader {
            fmt,
            csid,
            size: basic_len + header_len,
            timestamp: None,
            length: None,
            type_id: None,
            stream_id: None,
            extended: false,
        };

        let ts_field = if fmt <= 2 {
            Some(read_u24(&h[0..3]))
        } else {
            None
        };
        if fmt <= 1 {
            parsed.length = Some(read_u24(&h[3..6]));
            parsed.type_id = Some(h[6]);
        }
        if fmt == 0 {
            parsed.stream_id = Some(u32::from_le_bytes([h[7], h[8], h[9], h[10]]));
        }

        let extended = match ts_field {
            Some(ts) => ts == EXTENDED_TIMESTAMP,
            None => previous.map(|s| s.extended).unwrap_or(false),
        };
        parsed.extended = extended;
        parsed.timestamp = ts_field;

        if extended {
            if buf.len() < parsed.size + 4 {
                return Ok(None);
            }
            let e = &buf[parsed.size..parsed.size + 4];
            let value = u32::from_be_bytes([e[0], e[1], e[2], e[3]]);
            parsed.size += 4;
            // fmt 3 repeats the extended field; only a message start applies it
            if fmt != 3 {
                parsed.timestamp = Some(value);
            }
        }

        Ok(Some(parsed))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ParsedHeader {
    fmt: u8,
    csid: u32,
    /// Header bytes to consume, extended timestamp included
    size: usize,
    timestamp: Option<u32>,
    length: Option<u32>,
    type_id: Option<u8>,
    stream_id: Option<u32>,
    extended: bool,
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

/// Splits outgoing messages into chunks
///
/// Always emits a full fmt 0 header followed by fmt 3 continuations.
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Takes effect for messages encoded after the Set Chunk Size is sent
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn encode(&self, csid: u32, msg: &RtmpMessage, out: &mut BytesMut) {
        let extended = msg.timestamp >= EXTENDED_TIMESTAMP;
        let ts_field = if extended {
            EXTENDED_TIMESTAMP
        } else {
            msg.timestamp
        };

        write_basic_header(out, 0, csid);
        put_u24(out, ts_field);
        put_u24(out, msg.payload.len() as u32);
        out.put_u8(msg.type_id);
        out.put_u32_le(msg.stream_id);
        if extended {
            out.put_u32(msg.timestamp);
        }

        let mut chunks = msg.payload.chunks(self.chunk_size as usize);
        if let Some(first) = chunks.next() {
            out.put_slice(first);
        }
        for chunk in chunks {
            write_basic_header(out, 3, csid);
            if extended {
                out.put_u32(msg.timestamp);
            }
            out.put_slice(chunk);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(out: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        2..=63 => out.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            out.put_u8(fmt << 6);
            out.put_u8((csid - 64) as u8);
        }
        _ => {
            let id = csid.saturating_sub(64).min(0xFFFF);
            out.put_u8((fmt << 6) | 1);
            out.put_u8((id & 0xFF) as u8);
            out.put_u8((id >> 8) as u8);
        }
    }
}

fn put_u24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}
