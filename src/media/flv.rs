//! FLV tag headers
//!
//! Every RTMP audio/video message body is an FLV tag body: one header byte
//! describing the codec, then codec specific data.
//!
//! ```text
//! Video: | FrameType (4 bits) | CodecID (4 bits) | ...
//! Audio: | SoundFormat (4) | SoundRate (2) | SoundSize (1) | SoundType (1) | ...
//! ```

/// FLV video codec id for AVC
pub const VIDEO_CODEC_AVC: u8 = 7;

/// FLV sound format for AAC
pub const SOUND_FORMAT_AAC: u8 = 10;

/// Video frame type (upper nibble of the header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe,
    InterFrame,
    DisposableInterFrame,
    GeneratedKeyframe,
    /// Video info/command frame, carries no picture
    InfoFrame,
}

impl VideoFrameType {
    pub fn from_header(b: u8) -> Option<Self> {
        match b >> 4 {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::InfoFrame),
            _ => None,
        }
    }
}

/// Decoded video tag header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTagHeader {
    pub frame_type: Option<VideoFrameType>,
    pub codec_id: u8,
}

impl VideoTagHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let b = *data.first()?;
        Some(Self {
            frame_type: VideoFrameType::from_header(b),
            codec_id: b & 0x0F,
        })
    }

    pub fn is_avc(&self) -> bool {
        self.codec_id == VIDEO_CODEC_AVC
    }

    pub fn is_info_frame(&self) -> bool {
        self.frame_type == Some(VideoFrameType::InfoFrame)
    }
}

/// Decoded audio tag header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTagHeader {
    pub sound_format: u8,
    /// 0 = 5.5 kHz, 1 = 11 kHz, 2 = 22 kHz, 3 = 44 kHz
    pub sound_rate: u8,
    pub stereo: bool,
}

impl AudioTagHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let b = *data.first()?;
        Some(Self {
            sound_format: b >> 4,
            sound_rate: (b >> 2) & 0x03,
            stereo: b & 0x01 != 0,
        })
    }

    pub fn is_aac(&self) -> bool {
        self.sound_format == SOUND_FORMAT_AAC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_header() {
        let header = VideoTagHeader::parse(&[0x17, 0x00]).unwrap();
        assert!(header.is_avc());
        assert_eq!(header.frame_type, Some(VideoFrameType::Keyframe));

        let header = VideoTagHeader::parse(&[0x27]).unwrap();
        assert_eq!(header.frame_type, Some(VideoFrameType::InterFrame));

        assert!(VideoTagHeader::parse(&[]).is_none());
    }

    #[test]
    fn test_audio_header() {
        let header = AudioTagHeader::parse(&[0xAF, 0x01]).unwrap();
        assert!(header.is_aac());
        assert_eq!(header.sound_rate, 3);
        assert!(header.stereo);

        let header = AudioTagHeader::parse(&[0x2E]).unwrap();
        assert!(!header.is_aac());
    }
}
