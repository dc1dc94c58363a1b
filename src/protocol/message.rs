//! RTMP messages
//!
//! A message is the unit the chunk layer reassembles. Commands and data
//! messages carry AMF0 bodies; control messages are small binary records.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// One reassembled RTMP message
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpMessage {
    pub type_id: u8,
    pub stream_id: u32,
    /// Milliseconds, 32-bit wrapping
    pub timestamp: u32,
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(type_id: u8, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            type_id,
            stream_id,
            timestamp,
            payload,
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self.type_id, MSG_AUDIO | MSG_VIDEO)
    }
}

/// AMF command: name, transaction id, command object, arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub object: AmfValue,
    pub args: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: &str, transaction_id: f64, object: AmfValue, args: Vec<AmfValue>) -> Self {
        Self {
            name: name.to_string(),
            transaction_id,
            object,
            args,
        }
    }

    /// Parse an AMF0 command body; AMF3 bodies carry one leading format byte
    pub fn parse(type_id: u8, mut payload: Bytes) -> Result<Self> {
        if type_id == MSG_COMMAND_AMF3 && payload.has_remaining() {
            payload.advance(1);
        }
        let mut values = amf0::decode_all(&mut payload)?.into_iter();

        let name = values
            .next()
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or(ProtocolError::Malformed("command"))?;
        let transaction_id = values.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let object = values.next().unwrap_or_default();

        Ok(Self {
            name,
            transaction_id,
            object,
            args: values.collect(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(128);
        amf0::encode(&mut out, &AmfValue::String(self.name.clone()));
        amf0::encode(&mut out, &AmfValue::Number(self.transaction_id));
        amf0::encode(&mut out, &self.object);
        for arg in &self.args {
            amf0::encode(&mut out, arg);
        }
        out.freeze()
    }

    pub fn to_message(&self, stream_id: u32) -> RtmpMessage {
        RtmpMessage::new(MSG_COMMAND_AMF0, stream_id, 0, self.encode())
    }

    /// First string argument, the stream name of `publish`/`play`/`releaseStream`
    pub fn stream_name(&self) -> Option<&str> {
        self.args.first().and_then(AmfValue::as_str)
    }
}

/// AMF data message such as `@setDataFrame onMetaData {..}`
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<AmfValue>,
}

impl DataMessage {
    pub fn parse(type_id: u8, mut payload: Bytes) -> Result<Self> {
        if type_id == MSG_DATA_AMF3 && payload.has_remaining() {
            payload.advance(1);
        }
        let mut values = amf0::decode_all(&mut payload)?;
        if values.is_empty() {
            return Err(ProtocolError::Malformed("data").into());
        }
        let name = match values.remove(0) {
            AmfValue::String(s) => s,
            _ => return Err(ProtocolError::Malformed("data").into()),
        };

        // `@setDataFrame` wraps the real name
        if name == DATA_SET_DATA_FRAME && values.first().and_then(AmfValue::as_str).is_some() {
            let inner = values.remove(0);
            return Ok(Self {
                name: inner.as_str().unwrap_or_default().to_string(),
                values,
            });
        }

        Ok(Self { name, values })
    }

    /// Properties of `onMetaData`
    pub fn metadata(&self) -> Option<&AmfValue> {
        if self.name != DATA_ON_METADATA {
            return None;
        }
        self.values.iter().find(|v| v.properties().is_some())
    }
}

/// Protocol control messages the server sends
pub fn set_chunk_size(size: u32) -> RtmpMessage {
    control(MSG_SET_CHUNK_SIZE, size & 0x7FFF_FFFF)
}

pub fn window_ack_size(size: u32) -> RtmpMessage {
    control(MSG_WINDOW_ACK_SIZE, size)
}

pub fn acknowledgement(sequence: u32) -> RtmpMessage {
    control(MSG_ACKNOWLEDGEMENT, sequence)
}

/// Set Peer Bandwidth with the dynamic limit type
pub fn set_peer_bandwidth(size: u32) -> RtmpMessage {
    let mut payload = BytesMut::with_capacity(5);
    payload.put_u32(size);
    payload.put_u8(2);
    RtmpMessage::new(MSG_SET_PEER_BANDWIDTH, 0, 0, payload.freeze())
}

pub fn stream_begin(stream_id: u32) -> RtmpMessage {
    user_control(UC_STREAM_BEGIN, stream_id)
}

pub fn ping_response(timestamp: u32) -> RtmpMessage {
    user_control(UC_PING_RESPONSE, timestamp)
}

fn control(type_id: u8, value: u32) -> RtmpMessage {
    RtmpMessage::new(type_id, 0, 0, Bytes::copy_from_slice(&value.to_be_bytes()))
}

fn user_control(event: u16, value: u32) -> RtmpMessage {
    let mut payload = BytesMut::with_capacity(6);
    payload.put_u16(event);
    payload.put_u32(value);
    RtmpMessage::new(MSG_USER_CONTROL, 0, 0, payload.freeze())
}

/// Read the 32-bit body of Set Chunk Size, Window Ack Size or Acknowledgement
pub fn read_u32_body(msg: &RtmpMessage, what: &'static str) -> Result<u32> {
    let mut body = msg.payload.clone();
    if body.remaining() < 4 {
        return Err(ProtocolError::Malformed(what).into());
    }
    Ok(body.get_u32())
}

/// Decoded user control event: `(event type, value)`
pub fn read_user_control(msg: &RtmpMessage) -> Result<(u16, u32)> {
    let mut body = msg.payload.clone();
    if body.remaining() < 6 {
        return Err(ProtocolError::Malformed("user control").into());
    }
    Ok((body.get_u16(), body.get_u32()))
}
