//! H.264/AVC helpers
//!
//! RTMP carries H.264 as AVCC (length-prefixed NAL units) behind a small
//! packet header:
//!
//! ```text
//! +-----------------+-----------------------------+------
//! | AVCPacketType(1)| CompositionTime (SI24, ms)  | Data
//! +-----------------+-----------------------------+------
//! ```
//!
//! Packet type 0 carries an AVCDecoderConfigurationRecord, type 1 one access
//! unit, type 2 an end-of-sequence marker. The HLS side wants Annex-B, so this
//! module also converts a list of NAL units into start-code form.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// Annex-B four byte start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Access unit delimiter NAL (primary_pic_type = any)
pub const AUD_NALU: [u8; 2] = [0x09, 0xF0];

/// NAL unit type (low five bits of the NAL header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl NaluType {
    pub fn from_header(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            other => NaluType::Other(other),
        }
    }

    /// Type of the first byte of `nalu`, if any
    pub fn of(nalu: &[u8]) -> Option<Self> {
        nalu.first().map(|b| Self::from_header(*b))
    }
}

/// Whether any NAL unit of the access unit is an IDR slice
pub fn is_idr_access_unit(nalus: &[Bytes]) -> bool {
    nalus.iter().any(|n| NaluType::of(n) == Some(NaluType::Idr))
}

/// AVCDecoderConfigurationRecord
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// 66 = Baseline, 77 = Main, 100 = High, ...
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
    /// Bytes per NAL length prefix (1, 2 or 4)
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 7 || data[0] != 1 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        data.advance(1);
        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let sps_count = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, sps_count)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let pps_count = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, pps_count)?;

        Ok(Self {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
        })
    }

    pub fn first_sps(&self) -> Option<&Bytes> {
        self.sps.first()
    }

    pub fn first_pps(&self) -> Option<&Bytes> {
        self.pps.first()
    }

    /// e.g. "3.1"
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        sets.push(data.split_to(len));
    }
    Ok(sets)
}

/// One parsed AVC video packet
#[derive(Debug, Clone)]
pub enum AvcPacket {
    SequenceHeader(AvcConfig),
    /// Access unit in AVCC framing
    Nalus {
        composition_time: i32,
        data: Bytes,
    },
    EndOfSequence,
}

impl AvcPacket {
    /// Parse the bytes following the FLV video tag header byte
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let packet_type = data.get_u8();
        let raw = ((data.get_u8() as i32) << 16) | ((data.get_u8() as i32) << 8) | data.get_u8() as i32;
        // Sign extend the 24 bit offset
        let composition_time = (raw << 8) >> 8;

        match packet_type {
            0 => Ok(AvcPacket::SequenceHeader(AvcConfig::parse(data)?)),
            1 => Ok(AvcPacket::Nalus {
                composition_time,
                data,
            }),
            2 => Ok(AvcPacket::EndOfSequence),
            _ => Err(MediaError::InvalidAvcPacket.into()),
        }
    }
}

/// Split an AVCC payload into its NAL units
///
/// Truncated trailing units are dropped.
pub fn split_avcc(data: &Bytes, length_size: u8) -> Vec<Bytes> {
    let length_size = length_size.clamp(1, 4) as usize;
    let mut nalus = Vec::new();
    let mut offset = 0;

    while offset + length_size <= data.len() {
        let len = data[offset..offset + length_size]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        offset += length_size;

        if len == 0 {
            continue;
        }
        if offset + len > data.len() {
            break;
        }
        nalus.push(data.slice(offset..offset + len));
        offset += len;
    }

    nalus
}

/// Build an Annex-B access unit
///
/// Prepends an access unit delimiter and, for IDR access units that do not
/// carry their own parameter sets, the given SPS/PPS.
pub fn to_annex_b(nalus: &[Bytes], sps: Option<&Bytes>, pps: Option<&Bytes>) -> Bytes {
    let idr = is_idr_access_unit(nalus);
    let has_sps = nalus.iter().any(|n| NaluType::of(n) == Some(NaluType::Sps));
    let size: usize = nalus.iter().map(|n| n.len() + 4).sum::<usize>() + 64;

    let mut out = BytesMut::with_capacity(size);
    out.put_slice(&START_CODE);
    out.put_slice(&AUD_NALU);

    if idr && !has_sps {
        for ps in [sps, pps].into_iter().flatten() {
            out.put_slice(&START_CODE);
            out.put_slice(ps);
        }
    }

    for nalu in nalus {
        if NaluType::of(nalu) == Some(NaluType::Aud) {
            continue;
        }
        out.put_slice(&START_CODE);
        out.put_slice(nalu);
    }

    out.freeze()
}
