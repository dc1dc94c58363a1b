//! Action Message Format
//!
//! RTMP commands and stream metadata are AMF0-encoded.

pub mod amf0;
pub mod value;

pub use value::{object, AmfObject, AmfValue};
