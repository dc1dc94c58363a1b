//! Media codec handling
//!
//! Only what relaying needs: FLV tag headers, AVC/AAC configuration records,
//! AVCC to Annex-B conversion and ADTS framing. Payloads are never decoded.

pub mod aac;
pub mod flv;
pub mod h264;
pub mod params;

pub use aac::{AacPacket, AudioSpecificConfig};
pub use flv::{AudioTagHeader, VideoTagHeader};
pub use h264::{AvcConfig, AvcPacket, NaluType};
pub use params::{AudioParams, VideoParams};
