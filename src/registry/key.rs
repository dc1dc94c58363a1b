//! Stream keys

use std::borrow::Borrow;
use std::fmt;

/// Key used when a publish carries no usable target
pub const DEFAULT_STREAM_KEY: &str = "default";

/// Identifier routing both ingest and playback to one live stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key from a target path such as `/live/mystream`
    pub fn from_path(path: &str) -> Self {
        Self(extract_stream_key(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for StreamKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for StreamKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Last segment of `path`, or [`DEFAULT_STREAM_KEY`] for an empty path
///
/// One leading `/` is stripped before splitting, so `app/name` and
/// `/app/name` both yield `name`.
pub fn extract_stream_key(path: &str) -> String {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let segments: Vec<&str> = trimmed.split('/').collect();

    let key = match segments.as_slice() {
        [single] => *single,
        [.., last] => *last,
        [] => "",
    };

    if key.is_empty() {
        DEFAULT_STREAM_KEY.to_string()
    } else {
        key.to_string()
    }
}
