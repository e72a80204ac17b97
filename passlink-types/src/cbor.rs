//! Canonical CBOR encoding and decoding.
//!
//! Everything an authenticator signs or hashes must be encoded in the [CTAP2 canonical CBOR
//! encoding form]: definite lengths, the shortest integer encodings and map keys sorted by the
//! length of their encoding and then bytewise. [`ciborium`] takes care of the first two, [`to_vec`]
//! takes care of the ordering.
//!
//! Responses are read through [`MapReader`] which gives typed access to the entries of a map with
//! decoding errors naming the offending key.
//!
//! [CTAP2 canonical CBOR encoding form]: https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-errata-20220621.html#ctap2-canonical-cbor-encoding-form

use std::io::{Cursor, Read};

pub use ciborium::value::{Integer, Value};

/// Errors returned when encoding a structure to its binary form.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A variable length field does not fit in the width its length prefix allows.
    #[error("{field} is {len} bytes long, the maximum is {max}")]
    TooLong {
        /// Name of the field being encoded
        field: &'static str,
        /// Length of the value that was given
        len: usize,
        /// Longest length the encoding supports
        max: usize,
    },
    /// The underlying CBOR serializer failed.
    #[error("CBOR serialization failed: {0}")]
    Cbor(String),
}

/// Errors returned when decoding a structure from its binary form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The input ended before the structure was complete.
    #[error("expected at least {expected} bytes but got {actual}")]
    Truncated {
        /// Minimum number of bytes needed
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },
    /// The input is not well formed CBOR.
    #[error("malformed CBOR: {0}")]
    Malformed(String),
    /// Bytes were left over after decoding a complete item.
    #[error("{0} trailing bytes after the CBOR item")]
    TrailingBytes(usize),
    /// A required map entry was absent.
    #[error("missing required key {0}")]
    MissingKey(String),
    /// A map entry or item did not have the expected CBOR type.
    #[error("expected {key} to be {expected}")]
    UnexpectedType {
        /// Which key or item was being read
        key: String,
        /// The expected CBOR type
        expected: &'static str,
    },
    /// A value has the right type but is not acceptable.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Which value was being read
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Encode `value` in the CTAP2 canonical form.
pub fn to_vec(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let canonical = canonicalize(value.clone())?;
    let mut out = Vec::new();
    ciborium::ser::into_writer(&canonical, &mut out).map_err(|e| EncodeError::Cbor(e.to_string()))?;
    Ok(out)
}

/// Recursively sort the keys of every map in `value`.
pub fn canonicalize(value: Value) -> Result<Value, EncodeError> {
    Ok(match value {
        Value::Map(entries) => {
            let mut keyed = entries
                .into_iter()
                .map(|(k, v)| {
                    let k = canonicalize(k)?;
                    let v = canonicalize(v)?;
                    let mut encoded = Vec::new();
                    ciborium::ser::into_writer(&k, &mut encoded)
                        .map_err(|e| EncodeError::Cbor(e.to_string()))?;
                    Ok((encoded, k, v))
                })
                .collect::<Result<Vec<_>, EncodeError>>()?;
            keyed.sort_by(|(a, _, _), (b, _, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
            Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(canonicalize)
                .collect::<Result<_, _>>()?,
        ),
        Value::Tag(tag, inner) => Value::Tag(tag, Box::new(canonicalize(*inner)?)),
        other => other,
    })
}

/// Decode exactly one CBOR item from `bytes`.
pub fn from_slice(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let value = from_reader(&mut cursor)?;
    let consumed = usize::try_from(cursor.position()).unwrap_or(bytes.len());
    match bytes.len() - consumed.min(bytes.len()) {
        0 => Ok(value),
        left => Err(DecodeError::TrailingBytes(left)),
    }
}

/// Decode one CBOR item from `reader`, leaving whatever follows it unread.
pub fn from_reader<R: Read>(reader: R) -> Result<Value, DecodeError> {
    ciborium::de::from_reader(reader).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Builder for CBOR maps where absent optional members are skipped rather than encoded as null.
#[derive(Debug, Default, Clone)]
pub struct MapBuilder {
    entries: Vec<(Value, Value)>,
}

impl MapBuilder {
    /// Start an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    pub fn insert(mut self, key: impl Into<Value>, value: impl Into<Value>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Add an entry when `value` is present
    pub fn insert_opt<V: Into<Value>>(self, key: impl Into<Value>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.insert(key, value),
            None => self,
        }
    }

    /// Whether no entries were added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finish the map as a [`Value`]
    pub fn build(self) -> Value {
        Value::Map(self.entries)
    }

    /// Finish the map and encode it canonically
    pub fn to_vec(self) -> Result<Vec<u8>, EncodeError> {
        to_vec(&self.build())
    }
}

/// A key that can be looked up in a [`MapReader`].
pub trait MapKey: Copy {
    /// Whether the CBOR `key` is this key
    fn matches(self, key: &Value) -> bool;
    /// Human readable form for error messages
    fn describe(self) -> String;
}

impl MapKey for i64 {
    fn matches(self, key: &Value) -> bool {
        match key {
            Value::Integer(i) => i64::try_from(*i).is_ok_and(|i| i == self),
            _ => false,
        }
    }

    fn describe(self) -> String {
        self.to_string()
    }
}

impl MapKey for &str {
    fn matches(self, key: &Value) -> bool {
        matches!(key, Value::Text(text) if text == self)
    }

    fn describe(self) -> String {
        format!("{self:?}")
    }
}

/// Typed read access to the entries of a decoded CBOR map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapReader {
    entries: Vec<(Value, Value)>,
}

impl MapReader {
    /// Wrap a decoded value, failing if it is not a map.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Map(entries) => Ok(Self { entries }),
            _ => Err(DecodeError::UnexpectedType {
                key: "top level item".into(),
                expected: "a map",
            }),
        }
    }

    /// Decode `bytes` as a single CBOR map.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::from_value(from_slice(bytes)?)
    }

    /// The raw value stored under `key`
    pub fn get(&self, key: impl MapKey) -> Option<&Value> {
        self.entries
            .iter()
            .find_map(|(k, v)| key.matches(k).then_some(v))
    }

    /// Whether the map has an entry for `key`
    pub fn contains(&self, key: impl MapKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries in the map
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn typed<K: MapKey, T>(
        &self,
        key: K,
        expected: &'static str,
        convert: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<Option<T>, DecodeError> {
        self.get(key)
            .map(|value| {
                convert(value).ok_or_else(|| DecodeError::UnexpectedType {
                    key: key.describe(),
                    expected,
                })
            })
            .transpose()
    }

    fn required<K: MapKey, T>(&self, key: K, value: Option<T>) -> Result<T, DecodeError> {
        value.ok_or_else(|| DecodeError::MissingKey(key.describe()))
    }

    /// The byte string stored under `key`, if present.
    pub fn bytes(&self, key: impl MapKey) -> Result<Option<Vec<u8>>, DecodeError> {
        self.typed(key, "a byte string", |v| v.as_bytes().cloned())
    }

    /// The byte string stored under `key`.
    pub fn required_bytes<K: MapKey>(&self, key: K) -> Result<Vec<u8>, DecodeError> {
        let value = self.bytes(key)?;
        self.required(key, value)
    }

    /// The text string stored under `key`, if present.
    pub fn text(&self, key: impl MapKey) -> Result<Option<String>, DecodeError> {
        self.typed(key, "a text string", |v| v.as_text().map(str::to_owned))
    }

    /// The text string stored under `key`.
    pub fn required_text<K: MapKey>(&self, key: K) -> Result<String, DecodeError> {
        let value = self.text(key)?;
        self.required(key, value)
    }

    /// The integer stored under `key`, if present.
    pub fn integer(&self, key: impl MapKey) -> Result<Option<i128>, DecodeError> {
        self.typed(key, "an integer", |v| v.as_integer().map(i128::from))
    }

    /// The integer stored under `key`.
    pub fn required_integer<K: MapKey>(&self, key: K) -> Result<i128, DecodeError> {
        let value = self.integer(key)?;
        self.required(key, value)
    }

    /// The boolean stored under `key`, if present.
    pub fn bool(&self, key: impl MapKey) -> Result<Option<bool>, DecodeError> {
        self.typed(key, "a boolean", Value::as_bool)
    }

    /// The nested map stored under `key`, if present.
    pub fn map(&self, key: impl MapKey) -> Result<Option<MapReader>, DecodeError> {
        self.typed(key, "a map", |v| {
            v.as_map().map(|entries| MapReader {
                entries: entries.clone(),
            })
        })
    }

    /// The nested map stored under `key`.
    pub fn required_map<K: MapKey>(&self, key: K) -> Result<MapReader, DecodeError> {
        let value = self.map(key)?;
        self.required(key, value)
    }

    /// The array stored under `key`, if present.
    pub fn array(&self, key: impl MapKey) -> Result<Option<Vec<Value>>, DecodeError> {
        self.typed(key, "an array", |v| v.as_array().cloned())
    }

    /// The array of text strings stored under `key`, if present.
    pub fn text_array(&self, key: impl MapKey) -> Result<Option<Vec<String>>, DecodeError> {
        self.typed(key, "an array of text strings", |v| {
            v.as_array()?
                .iter()
                .map(|item| item.as_text().map(str::to_owned))
                .collect()
        })
    }

    /// Consume the reader and hand back the map as a [`Value`].
    pub fn into_value(self) -> Value {
        Value::Map(self.entries)
    }
}

#[cfg(test)]
mod tests;
