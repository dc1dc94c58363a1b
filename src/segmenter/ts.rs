//! MPEG-TS packetizer
//!
//! Writes the minimum a HLS client needs: PAT, PMT and PES packets for one
//! H.264 and one AAC elementary stream.
//!
//! ```text
//! PID 0x0000  PAT  -> program 1 at PMT_PID
//! PID 0x1000  PMT  -> VIDEO_PID (stream type 0x1B), AUDIO_PID (0x0F)
//! PID 0x0100  H.264 PES (stream id 0xE0), carries PCR when present
//! PID 0x0101  AAC ADTS PES (stream id 0xC0)
//! ```

use bytes::{BufMut, BytesMut};

pub const PACKET_SIZE: usize = 188;
const PAYLOAD_SIZE: usize = PACKET_SIZE - 4;
const SYNC_BYTE: u8 = 0x47;

pub const PAT_PID: u16 = 0x0000;
pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0100;
pub const AUDIO_PID: u16 = 0x0101;

const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_AAC: u8 = 0x0F;

pub const STREAM_ID_VIDEO: u8 = 0xE0;
pub const STREAM_ID_AUDIO: u8 = 0xC0;

/// Timestamps are 33 bit on the wire
const TIMESTAMP_MASK: u64 = (1 << 33) - 1;

/// 90 kHz MPEG clock ticks for a duration
pub fn to_90khz(d: std::time::Duration) -> u64 {
    (d.as_micros() as u64).saturating_mul(9) / 100
}

/// CRC-32/MPEG-2 as used by PSI sections
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in data {
        crc ^= (*byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// One PES payload to packetize
pub struct PesPacket<'a> {
    pub pid: u16,
    pub stream_id: u8,
    pub pts: u64,
    /// Only written when it differs from `pts`
    pub dts: Option<u64>,
    /// PCR to place in the first TS packet
    pub pcr: Option<u64>,
    pub random_access: bool,
    pub payload: &'a [u8],
}

/// Stateful writer holding per-PID continuity counters
#[derive(Debug, Default)]
pub struct TsWriter {
    pat_cc: u8,
    pmt_cc: u8,
    video_cc: u8,
    audio_cc: u8,
}

impl TsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = match pid {
            PAT_PID => &mut self.pat_cc,
            PMT_PID => &mut self.pmt_cc,
            VIDEO_PID => &mut self.video_cc,
            _ => &mut self.audio_cc,
        };
        let current = *cc;
        *cc = (*cc + 1) & 0x0F;
        current
    }

    /// Write PAT and PMT for the given track layout
    pub fn write_tables(&mut self, out: &mut BytesMut, has_video: bool, has_audio: bool) {
        let mut pat = Vec::with_capacity(16);
        pat.extend_from_slice(&[0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00]);
        pat.extend_from_slice(&[0x00, 0x01]);
        pat.extend_from_slice(&[0xE0 | (PMT_PID >> 8) as u8, PMT_PID as u8]);
        self.write_section(out, PAT_PID, pat);

        let pcr_pid = if has_video { VIDEO_PID } else { AUDIO_PID };
        let mut streams = Vec::new();
        if has_video {
            streams.push((STREAM_TYPE_H264, VIDEO_PID));
        }
        if has_audio {
            streams.push((STREAM_TYPE_AAC, AUDIO_PID));
        }

        let section_length = 9 + 5 * streams.len() + 4;
        let mut pmt = Vec::with_capacity(3 + section_length);
        pmt.extend_from_slice(&[
            0x02,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            0x00,
            0x01,
            0xC1,
            0x00,
            0x00,
            0xE0 | (pcr_pid >> 8) as u8,
            pcr_pid as u8,
            0xF0,
            0x00,
        ]);
        for (stream_type, pid) in streams {
            pmt.extend_from_slice(&[stream_type, 0xE0 | (pid >> 8) as u8, pid as u8, 0xF0, 0x00]);
        }
        self.write_section(out, PMT_PID, pmt);
    }

    fn write_section(&mut self, out: &mut BytesMut, pid: u16, mut section: Vec<u8>) {
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        let cc = self.next_cc(pid);
        let mut packet = [0xFFu8; PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x40 | ((pid >> 8) as u8 & 0x1F);
        packet[2] = pid as u8;
        packet[3] = 0x10 | cc;
        packet[4] = 0x00; // pointer field
        packet[5..5 + section.len()].copy_from_slice(&section);
        out.put_slice(&packet);
    }

    /// Packetize one PES into as many TS packets as needed
    pub fn write_pes(&mut self, out: &mut BytesMut, pes: &PesPacket<'_>) {
        let header = pes_header(pes);
        let mut data = Vec::with_capacity(header.len() + pes.payload.len());
        data.extend_from_slice(&header);
        data.extend_from_slice(pes.payload);

        let mut offset = 0;
        let mut first = true;

        while offset < data.len() {
            let remaining = data.len() - offset;
            let with_pcr = first && pes.pcr.is_some();
            let with_flags = with_pcr || (first && pes.random_access);

            // Adaptation field bytes that must be present, length byte included
            let min_adaptation = if with_pcr {
                8
            } else if with_flags {
                2
            } else {
                0
            };
            let payload_len = remaining.min(PAYLOAD_SIZE - min_adaptation);
            let adaptation_len = PAYLOAD_SIZE - payload_len;

            let cc = self.next_cc(pes.pid);
            let mut packet = [0xFFu8; PACKET_SIZE];
            packet[0] = SYNC_BYTE;
            let pusi = if first { 0x40 } else { 0x00 };
            packet[1] = pusi | ((pes.pid >> 8) as u8 & 0x1F);
            packet[2] = pes.pid as u8;

            if adaptation_len > 0 {
                packet[3] = 0x30 | cc;
                packet[4] = (adaptation_len - 1) as u8;
                if adaptation_len > 1 {
                    let mut flags = 0u8;
                    if first && pes.random_access {
                        flags |= 0x40;
                    }
                    if with_pcr {
                        flags |= 0x10;
                    }
                    packet[5] = flags;
                    if let Some(pcr) = pes.pcr.filter(|_| with_pcr) {
                        packet[6..12].copy_from_slice(&encode_pcr(pcr));
                    }
                }
            } else {
                packet[3] = 0x10 | cc;
            }

            let start = 4 + adaptation_len;
            packet[start..].copy_from_slice(&data[offset..offset + payload_len]);
            out.put_slice(&packet);

            offset += payload_len;
            first = false;
        }
    }
}

fn pes_header(pes: &PesPacket<'_>) -> Vec<u8> {
    let dts = pes.dts.filter(|d| *d != pes.pts);
    let header_data_len: usize = if dts.is_some() { 10 } else { 5 };

    // Video PES may exceed the 16 bit length field; 0 means unbounded
    let pes_len = 3 + header_data_len + pes.payload.len();
    let length_field = if pes.stream_id == STREAM_ID_VIDEO || pes_len > 0xFFFF {
        0
    } else {
        pes_len as u16
    };

    let mut header = Vec::with_capacity(9 + header_data_len);
    header.extend_from_slice(&[0x00, 0x00, 0x01, pes.stream_id]);
    header.extend_from_slice(&length_field.to_be_bytes());
    header.push(0x80);
    match dts {
        Some(dts) => {
            header.push(0xC0);
            header.push(header_data_len as u8);
            header.extend_from_slice(&encode_timestamp(0x3, pes.pts));
            header.extend_from_slice(&encode_timestamp(0x1, dts));
        }
        None => {
            header.push(0x80);
            header.push(header_data_len as u8);
            header.extend_from_slice(&encode_timestamp(0x2, pes.pts));
        }
    }
    header
}

fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    let ts = ts & TIMESTAMP_MASK;
    [
        (prefix << 4) | (((ts >> 29) as u8) & 0x0E) | 0x01,
        (ts >> 22) as u8,
        (((ts >> 14) as u8) & 0xFE) | 0x01,
        (ts >> 7) as u8,
        (((ts << 1) as u8) & 0xFE) | 0x01,
    ]
}

fn encode_pcr(pcr: u64) -> [u8; 6] {
    let base = pcr & TIMESTAMP_MASK;
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 0x01) as u8) << 7) | 0x7E,
        0x00,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_crc32_mpeg2_check_value() {
        assert_eq!(crc32_mpeg2(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn test_to_90khz() {
        assert_eq!(to_90khz(Duration::from_secs(1)), 90_000);
        assert_eq!(to_90khz(Duration::from_millis(40)), 3_600);
    }

    #[test]
    fn test_tables_are_two_packets() {
        let mut writer = TsWriter::new();
        let mut out = BytesMut::new();
        writer.write_tables(&mut out, true, true);

        assert_eq!(out.len(), 2 * PACKET_SIZE);
        assert_eq!(out[0], SYNC_BYTE);
        assert_eq!(out[PACKET_SIZE], SYNC_BYTE);
        // PMT PID in second packet header
        assert_eq!(((out[PACKET_SIZE + 1] as u16 & 0x1F) << 8) | out[PACKET_SIZE + 2] as u16, PMT_PID);
    }

    #[test]
    fn test_pes_spans_packets_with_continuity() {
        let mut writer = TsWriter::new();
        let mut out = BytesMut::new();
        let payload = vec![0xAB; 500];

        writer.write_pes(
            &mut out,
            &PesPacket {
                pid: VIDEO_PID,
                stream_id: STREAM_ID_VIDEO,
                pts: 93_600,
                dts: Some(90_000),
                pcr: Some(90_000),
                random_access: true,
                payload: &payload,
            },
        );

        assert_eq!(out.len() % PACKET_SIZE, 0);
        let packets: Vec<&[u8]> = out.chunks(PACKET_SIZE).collect();
        assert!(packets.len() >= 3);

        // First packet: PUSI, adaptation field with PCR and random access
        assert_eq!(packets[0][1] & 0x40, 0x40);
        assert_eq!(packets[0][3] & 0x30, 0x30);
        assert_eq!(packets[0][5], 0x50);

        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet[0], SYNC_BYTE);
            assert_eq!(packet[3] & 0x0F, i as u8);
            if i > 0 {
                assert_eq!(packet[1] & 0x40, 0);
            }
        }
    }

    #[test]
    fn test_timestamp_encoding_marker_bits() {
        let encoded = encode_timestamp(0x2, 90_000);
        assert_eq!(encoded[0] & 0xF1, 0x21);
        assert_eq!(encoded[2] & 0x01, 0x01);
        assert_eq!(encoded[4] & 0x01, 0x01);

        let decoded = (((encoded[0] as u64 >> 1) & 0x07) << 30)
            | ((encoded[1] as u64) << 22)
            | ((encoded[2] as u64 >> 1) << 15)
            | ((encoded[3] as u64) << 7)
            | (encoded[4] as u64 >> 1);
        assert_eq!(decoded, 90_000);
    }
}
