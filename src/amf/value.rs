//! AMF value model
//!
//! Objects keep their property order: encoders such as OBS and FFmpeg send
//! `connect` and `onMetaData` objects whose order some players care about when
//! echoed back.

/// Property list of an AMF object or ECMA array
pub type AmfObject = Vec<(String, AmfValue)>;

/// One decoded AMF0 value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    #[default]
    Null,
    Undefined,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(AmfObject),
    /// Associative array, used by `onMetaData`
    EcmaArray(AmfObject),
    StrictArray(Vec<AmfValue>),
    /// Milliseconds since the Unix epoch
    Date(f64),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Properties of an object or ECMA array
    pub fn properties(&self) -> Option<&[(String, AmfValue)]> {
        match self {
            AmfValue::Object(props) | AmfValue::EcmaArray(props) => Some(props),
            _ => None,
        }
    }

    /// Look up a property by name
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.properties()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

/// Build an [`AmfValue::Object`] from `(key, value)` pairs
pub fn object<K, V, I>(pairs: I) -> AmfValue
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<AmfValue>,
{
    AmfValue::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}
