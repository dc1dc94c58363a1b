//! RTMP wire constants

pub const RTMP_VERSION: u8 = 3;
pub const HANDSHAKE_SIZE: usize = 1536;

pub const DEFAULT_CHUNK_SIZE: u32 = 128;
/// Chunk size announced to publishers
pub const SERVER_CHUNK_SIZE: u32 = 4096;
pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;
/// Upper bound on a reassembled message
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

pub const WINDOW_ACK_SIZE: u32 = 2_500_000;
pub const PEER_BANDWIDTH: u32 = 2_500_000;

/// Extended timestamp sentinel in chunk headers
pub const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

// Chunk stream ids used by the server
pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;

// Message type ids
pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF3: u8 = 15;
pub const MSG_COMMAND_AMF3: u8 = 17;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;

// User control event types
pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;

// Commands
pub const CMD_CONNECT: &str = "connect";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_FC_UNPUBLISH: &str = "FCUnpublish";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PLAY: &str = "play";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ON_STATUS: &str = "onStatus";

/// Data message carrying stream metadata
pub const DATA_SET_DATA_FRAME: &str = "@setDataFrame";
pub const DATA_ON_METADATA: &str = "onMetaData";

/// Message stream id handed out by `createStream`
pub const PUBLISH_STREAM_ID: u32 = 1;
