//! Property value slots and their wire representation.
//!
//! Values carry an explicit type tag on every encoding so a 32-bit integer
//! never comes back as a 64-bit one, and compressed blobs are recognisable
//! without consulting the compression policy. Null is the encoding's own nil.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;
use super::lazy::{CompressedText, LazyCompressedString};

/// One value slot of a property, addressed by culture and segment.
///
/// The invariant culture and segment are the empty string, never absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyData {
    #[serde(rename = "c", default, deserialize_with = "empty_if_null")]
    pub culture: String,
    #[serde(rename = "s", default, deserialize_with = "empty_if_null")]
    pub segment: String,
    #[serde(rename = "v", default)]
    pub value: PropertyValue,
}

impl PropertyData {
    pub fn invariant(value: PropertyValue) -> Self {
        Self {
            culture: String::new(),
            segment: String::new(),
            value,
        }
    }

    pub fn new(culture: impl Into<String>, segment: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            culture: culture.into(),
            segment: segment.into(),
            value,
        }
    }
}

fn empty_if_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default)]
pub enum PropertyValue {
    String(String),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    DateTime(OffsetDateTime),
    Compressed(Arc<CompressedText>),
    #[default]
    Null,
}

impl PropertyValue {
    pub fn compressed(lazy: LazyCompressedString) -> Self {
        Self::Compressed(Arc::new(CompressedText::new(lazy)))
    }

    /// Text of a string or compressed value. A compressed value is
    /// decompressed on first access and served from the slot afterwards.
    pub fn text(&self) -> Result<Option<&str>, DomainError> {
        match self {
            PropertyValue::String(value) => Ok(Some(value)),
            PropertyValue::Compressed(slot) => slot.text().map(Some),
            _ => Ok(None),
        }
    }

    /// NaN and infinities have no representation in the text encoding.
    pub fn is_finite(&self) -> bool {
        match self {
            PropertyValue::Float(value) => value.is_finite(),
            PropertyValue::Double(value) => value.is_finite(),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Int32(_) => "int32",
            PropertyValue::Int64(_) => "int64",
            PropertyValue::Float(_) => "float",
            PropertyValue::Double(_) => "double",
            PropertyValue::DateTime(_) => "datetime",
            PropertyValue::Compressed(_) => "compressed",
            PropertyValue::Null => "null",
        }
    }
}

/// Compressed values compare by identity: two slots are the same value
/// only if they share the same single-use buffer.
impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::String(a), PropertyValue::String(b)) => a == b,
            (PropertyValue::Int32(a), PropertyValue::Int32(b)) => a == b,
            (PropertyValue::Int64(a), PropertyValue::Int64(b)) => a == b,
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a == b,
            (PropertyValue::Double(a), PropertyValue::Double(b)) => a == b,
            (PropertyValue::DateTime(a), PropertyValue::DateTime(b)) => a == b,
            (PropertyValue::Compressed(a), PropertyValue::Compressed(b)) => Arc::ptr_eq(a, b),
            (PropertyValue::Null, PropertyValue::Null) => true,
            _ => false,
        }
    }
}

// ============================================================================
// Wire form
// ============================================================================

#[derive(Serialize)]
enum WireValueRef<'a> {
    #[serde(rename = "s")]
    String(&'a str),
    #[serde(rename = "i")]
    Int32(i32),
    #[serde(rename = "l")]
    Int64(i64),
    #[serde(rename = "f")]
    Float(f32),
    #[serde(rename = "d")]
    Double(f64),
    #[serde(rename = "t", with = "time::serde::rfc3339")]
    DateTime(OffsetDateTime),
    #[serde(rename = "z")]
    Compressed(Blob),
}

#[derive(Deserialize)]
enum WireValue {
    #[serde(rename = "s")]
    String(String),
    #[serde(rename = "i")]
    Int32(i32),
    #[serde(rename = "l")]
    Int64(i64),
    #[serde(rename = "f")]
    Float(f32),
    #[serde(rename = "d")]
    Double(f64),
    #[serde(rename = "t", with = "time::serde::rfc3339")]
    DateTime(OffsetDateTime),
    #[serde(rename = "z")]
    Compressed(Blob),
}

impl Serialize for PropertyValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            PropertyValue::String(value) => WireValueRef::String(value),
            PropertyValue::Int32(value) => WireValueRef::Int32(*value),
            PropertyValue::Int64(value) => WireValueRef::Int64(*value),
            PropertyValue::Float(value) => WireValueRef::Float(*value),
            PropertyValue::Double(value) => WireValueRef::Double(*value),
            PropertyValue::DateTime(value) => WireValueRef::DateTime(*value),
            PropertyValue::Compressed(slot) => {
                let bytes = slot.to_bytes().map_err(ser::Error::custom)?;
                WireValueRef::Compressed(Blob(bytes.to_vec()))
            }
            PropertyValue::Null => return serializer.serialize_none(),
        };
        serializer.serialize_some(&wire)
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = match Option::<WireValue>::deserialize(deserializer)? {
            None => PropertyValue::Null,
            Some(WireValue::String(value)) => PropertyValue::String(value),
            Some(WireValue::Int32(value)) => PropertyValue::Int32(value),
            Some(WireValue::Int64(value)) => PropertyValue::Int64(value),
            Some(WireValue::Float(value)) => PropertyValue::Float(value),
            Some(WireValue::Double(value)) => PropertyValue::Double(value),
            Some(WireValue::DateTime(value)) => PropertyValue::DateTime(value),
            Some(WireValue::Compressed(Blob(bytes))) => {
                PropertyValue::compressed(LazyCompressedString::new(bytes))
            }
        };
        Ok(value)
    }
}

/// Raw bytes on binary encodings, base64 text on human-readable ones.
struct Blob(Vec<u8>);

impl Serialize for Blob {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&STANDARD.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BlobVisitor)
        } else {
            deserializer.deserialize_bytes(BlobVisitor)
        }
    }
}

struct BlobVisitor;

impl<'de> Visitor<'de> for BlobVisitor {
    type Value = Blob;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("compressed bytes or base64 text")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Blob, E> {
        Ok(Blob(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Blob, E> {
        Ok(Blob(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Blob, E> {
        STANDARD.decode(v).map(Blob).map_err(E::custom)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Blob, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Ok(Blob(bytes))
    }
}
