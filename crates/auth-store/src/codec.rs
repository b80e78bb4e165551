//! Binary-safe JSON codec for credential and key material.
//!
//! Plain JSON has no byte-string type, so binary fields are written as a
//! tagged object:
//!
//! ```json
//! { "type": "Buffer", "data": "q83v" }
//! ```
//!
//! `data` is standard base64 on write.  On read both the base64 form and the
//! numeric-array form (`"data": [171, 205, 239]`) are accepted, so rows
//! written by older tooling decode to the same bytes.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

const BUFFER_TAG: &str = "Buffer";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer data is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("buffer data array holds a non-byte element at index {0}")]
    InvalidByte(usize),
    #[error("buffer data must be a string or an array")]
    InvalidBufferShape,
}

/// A JSON-like value with a first-class byte-string variant.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AuthValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<AuthValue>),
    Object(BTreeMap<String, AuthValue>),
}

impl AuthValue {
    /// Encode into plain JSON, tagging every byte string.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Bytes(bytes) => {
                let mut tagged = Map::with_capacity(2);
                tagged.insert("type".into(), Value::String(BUFFER_TAG.into()));
                tagged.insert("data".into(), Value::String(STANDARD.encode(bytes)));
                Value::Object(tagged)
            }
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Decode plain JSON, reviving tagged buffers into [`AuthValue::Bytes`].
    pub fn from_json(value: Value) -> Result<Self, CodecError> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                if is_buffer_tag(&map) {
                    let data = map.get("data").cloned().unwrap_or(Value::Null);
                    return decode_buffer_data(data).map(Self::Bytes);
                }
                Self::Object(
                    map.into_iter()
                        .map(|(k, v)| Self::from_json(v).map(|v| (k, v)))
                        .collect::<Result<_, _>>()?,
                )
            }
        })
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Field lookup on an object value.
    pub fn get(&self, key: &str) -> Option<&AuthValue> {
        match self {
            Self::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

fn is_buffer_tag(map: &Map<String, Value>) -> bool {
    map.len() == 2
        && map.get("type").and_then(Value::as_str) == Some(BUFFER_TAG)
        && map.contains_key("data")
}

fn decode_buffer_data(data: Value) -> Result<Vec<u8>, CodecError> {
    match data {
        Value::String(s) => STANDARD
            .decode(s.as_bytes())
            .map_err(|e| CodecError::InvalidBase64(e.to_string())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or(CodecError::InvalidByte(i))
            })
            .collect(),
        _ => Err(CodecError::InvalidBufferShape),
    }
}

impl Serialize for AuthValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AuthValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}

// ── Conversions ─────────────────────────────────────────────────────

impl From<Vec<u8>> for AuthValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for AuthValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<String> for AuthValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for AuthValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<bool> for AuthValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u64> for AuthValue {
    fn from(v: u64) -> Self {
        Self::Number(Number::from(v))
    }
}

impl From<u32> for AuthValue {
    fn from(v: u32) -> Self {
        Self::Number(Number::from(v))
    }
}

impl From<BTreeMap<String, AuthValue>> for AuthValue {
    fn from(v: BTreeMap<String, AuthValue>) -> Self {
        Self::Object(v)
    }
}
