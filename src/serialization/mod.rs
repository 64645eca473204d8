//! Content-data encoders.
//!
//! A node payload is persisted either as self-describing JSON text or as
//! compact MessagePack bytes. The binary encoder compresses the string
//! values of policy-selected properties with LZ4 and tags them, so decoding
//! never needs the policy. Each encoder falls back to the other one when only
//! the other payload column is populated.

mod compression;
mod json;
mod model;
mod msgpack;

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{ContentRef, DomainError, PropertyValue};

pub use compression::{
    CompressionRule, ConfiguredCompressionOptions, NoopCompressionOptions,
    PropertyCacheCompression, PropertyCompressionOptions,
};
pub use json::JsonContentDataSerializer;
pub use model::ContentCacheDataModel;
pub use msgpack::MessagePackContentDataSerializer;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to encode {format} payload for node {id}: {message}")]
    Encode {
        format: &'static str,
        id: i32,
        message: String,
    },
    #[error("failed to decode {format} payload for node {id}: {message}")]
    Decode {
        format: &'static str,
        id: i32,
        message: String,
    },
    #[error("property `{alias}` has more than one value for culture `{culture}` segment `{segment}`")]
    DuplicateVariant {
        alias: String,
        culture: String,
        segment: String,
    },
    #[error("property `{alias}` has a non-finite number for culture `{culture}` segment `{segment}`")]
    NonFiniteNumber {
        alias: String,
        culture: String,
        segment: String,
    },
    #[error("node {id} has neither a text nor a binary payload")]
    MissingPayload { id: i32 },
    #[error("failed to decompress property `{alias}` of node {id}")]
    Decompress {
        id: i32,
        alias: String,
        #[source]
        source: DomainError,
    },
}

/// Payload columns of one persisted row. Exactly one is populated by a given encoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedContent {
    pub string_data: Option<String>,
    pub byte_data: Option<Bytes>,
}

impl SerializedContent {
    pub fn text(data: String) -> Self {
        Self {
            string_data: Some(data),
            byte_data: None,
        }
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            string_data: None,
            byte_data: Some(data.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.string_data.is_none() && self.byte_data.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    Json,
    #[serde(alias = "messagepack")]
    MsgPack,
}

impl SerializerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SerializerKind::Json => "json",
            SerializerKind::MsgPack => "msgpack",
        }
    }
}

impl FromStr for SerializerKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(SerializerKind::Json),
            "msgpack" | "messagepack" => Ok(SerializerKind::MsgPack),
            other => Err(format!("unknown serializer `{other}`, expected json or msgpack")),
        }
    }
}

/// When compressed values are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompressionMode {
    /// Keep values wrapped until first access.
    #[default]
    Lazy,
    /// Decode every compressed value while deserializing.
    Eager,
}

impl FromStr for DecompressionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(DecompressionMode::Lazy),
            "eager" => Ok(DecompressionMode::Eager),
            other => Err(format!("unknown decompression mode `{other}`, expected lazy or eager")),
        }
    }
}

pub trait ContentCacheDataSerializer: Send + Sync {
    fn kind(&self) -> SerializerKind;

    /// Encode `model`. For published payloads every culture is recorded as not draft.
    fn serialize(
        &self,
        content: &ContentRef,
        model: &ContentCacheDataModel,
        published: bool,
    ) -> Result<SerializedContent, SerializationError>;

    /// Decode whichever payload column is available, preferring this encoder's own.
    fn deserialize(
        &self,
        content: &ContentRef,
        string_data: Option<&str>,
        byte_data: Option<&[u8]>,
        published: bool,
    ) -> Result<ContentCacheDataModel, SerializationError>;
}

pub fn create_serializer(
    kind: SerializerKind,
    compression: Arc<PropertyCacheCompression>,
    decompression: DecompressionMode,
) -> Arc<dyn ContentCacheDataSerializer> {
    match kind {
        SerializerKind::Json => Arc::new(JsonContentDataSerializer::new(decompression)),
        SerializerKind::MsgPack => Arc::new(MessagePackContentDataSerializer::new(
            compression,
            decompression,
        )),
    }
}

// ============================================================================
// Shared encode/decode steps
// ============================================================================

fn prepare_for_encode(
    model: &ContentCacheDataModel,
    published: bool,
) -> Result<Option<ContentCacheDataModel>, SerializationError> {
    model.validate_for_encode()?;
    if published && model.culture_data.iter().any(|(_, v)| v.is_draft) {
        let mut normalized = model.clone();
        normalized.clear_draft_flags();
        return Ok(Some(normalized));
    }
    Ok(None)
}

fn finish_decode(
    content: &ContentRef,
    mut model: ContentCacheDataModel,
    published: bool,
    decompression: DecompressionMode,
) -> Result<ContentCacheDataModel, SerializationError> {
    model.validate()?;
    if published {
        model.clear_draft_flags();
    }
    if decompression == DecompressionMode::Eager {
        for (alias, values) in model.property_data.iter_mut() {
            for slot in values.iter_mut() {
                if let PropertyValue::Compressed(compressed) = &slot.value {
                    let text = compressed
                        .text()
                        .map_err(|source| SerializationError::Decompress {
                            id: content.id,
                            alias: alias.clone(),
                            source,
                        })?
                        .to_string();
                    slot.value = PropertyValue::String(text);
                }
            }
        }
    }
    Ok(model)
}

fn decode_either(
    content: &ContentRef,
    string_data: Option<&str>,
    byte_data: Option<&[u8]>,
    prefer_bytes: bool,
) -> Result<ContentCacheDataModel, SerializationError> {
    match (string_data, byte_data) {
        (_, Some(bytes)) if prefer_bytes => msgpack::decode(content, bytes),
        (Some(text), _) => json::decode(content, text),
        (None, Some(bytes)) => msgpack::decode(content, bytes),
        (None, None) => Err(SerializationError::MissingPayload { id: content.id }),
    }
}
