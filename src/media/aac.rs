//! AAC helpers
//!
//! RTMP carries raw AAC (no ADTS) after a one byte packet type:
//! 0 = AudioSpecificConfig, 1 = raw frame. MPEG-TS wants ADTS framing, so the
//! segmenter re-frames every access unit with [`adts_header`].

use bytes::{Buf, Bytes};

use super::params::AudioParams;
use crate::error::{MediaError, Result};

/// Sampling frequencies by sampling_frequency_index
pub const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC audio object type
pub const OBJECT_TYPE_AAC_LC: u8 = 2;

/// Index of `rate` in the sampling frequency table
pub fn sampling_frequency_index(rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|f| *f == rate)
        .map(|i| i as u8)
}

/// Decoded AudioSpecificConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sample_rate: u32,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket.into());
        }

        let audio_object_type = data[0] >> 3;
        let freq_index = ((data[0] & 0x07) << 1) | (data[1] >> 7);

        let (sample_rate, channel_configuration) = if freq_index == 0x0F {
            // Explicit 24 bit frequency follows the index
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket.into());
            }
            let rate = ((data[1] as u32 & 0x7F) << 17)
                | ((data[2] as u32) << 9)
                | ((data[3] as u32) << 1)
                | (data[4] as u32 >> 7);
            (rate, (data[4] >> 3) & 0x0F)
        } else {
            let rate = *SAMPLING_FREQUENCIES
                .get(freq_index as usize)
                .ok_or(MediaError::InvalidAacPacket)?;
            (rate, (data[1] >> 3) & 0x0F)
        };

        Ok(Self {
            audio_object_type,
            sample_rate,
            channel_configuration,
        })
    }

    /// Channel count implied by the channel configuration, 0 if unspecified
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8,
            _ => 0,
        }
    }

    pub fn params(&self) -> AudioParams {
        AudioParams::new(self.sample_rate, self.channels())
    }
}

/// One parsed AAC audio packet
#[derive(Debug, Clone)]
pub enum AacPacket {
    SequenceHeader(AudioSpecificConfig),
    Frame(Bytes),
}

impl AacPacket {
    /// Parse the bytes following the FLV audio tag header byte
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(MediaError::InvalidAacPacket.into());
        }

        match data.get_u8() {
            0 => Ok(AacPacket::SequenceHeader(AudioSpecificConfig::parse(&data)?)),
            1 => Ok(AacPacket::Frame(data)),
            _ => Err(MediaError::InvalidAacPacket.into()),
        }
    }
}

/// Seven byte ADTS header (no CRC) for an AAC-LC frame of `frame_length` bytes
pub fn adts_header(params: &AudioParams, frame_length: usize) -> [u8; 7] {
    let profile = OBJECT_TYPE_AAC_LC - 1;
    // 44.1 kHz is the safest fallback for an unlisted rate
    let freq_idx = sampling_frequency_index(params.sample_rate).unwrap_or(4);
    let channels = params.channel_count.min(7);
    let len = frame_length + 7;

    [
        0xFF,
        0xF1,
        (profile << 6) | (freq_idx << 2) | ((channels >> 2) & 0x01),
        ((channels & 0x03) << 6) | ((len >> 11) & 0x03) as u8,
        ((len >> 3) & 0xFF) as u8,
        (((len & 0x07) << 5) | 0x1F) as u8,
        0xFC,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lc_44100_stereo() {
        let config = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels(), 2);
        assert_eq!(config.params(), AudioParams::new(44100, 2));
    }

    #[test]
    fn test_parse_lc_48000_mono() {
        // object type 2, index 3, channel config 1
        let config = AudioSpecificConfig::parse(&[0x11, 0x88]).unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels(), 1);
    }

    #[test]
    fn test_parse_rejects_short_config() {
        assert!(AudioSpecificConfig::parse(&[0x12]).is_err());
    }

    #[test]
    fn test_packet_parse() {
        let packet = AacPacket::parse(Bytes::from_static(&[0x01, 0x21, 0x10])).unwrap();
        assert!(matches!(packet, AacPacket::Frame(data) if data.as_ref() == [0x21, 0x10]));

        let packet = AacPacket::parse(Bytes::from_static(&[0x00, 0x12, 0x10])).unwrap();
        assert!(matches!(packet, AacPacket::SequenceHeader(_)));
    }

    #[test]
    fn test_adts_header() {
        let header = adts_header(&AudioParams::new(44100, 2), 100);
        assert_eq!(header[0], 0xFF);
        assert_eq!(header[1], 0xF1);
        // profile LC (1), index 4, channel high bit 0
        assert_eq!(header[2], 0x50);
        let len = (((header[3] & 0x03) as usize) << 11)
            | ((header[4] as usize) << 3)
            | ((header[5] >> 5) as usize);
        assert_eq!(len, 107);
    }
}
