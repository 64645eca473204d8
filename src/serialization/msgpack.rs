use std::sync::Arc;

use tracing::trace;

use crate::domain::{ContentRef, LazyCompressedString, PropertyValue};

use super::{
    ContentCacheDataModel, ContentCacheDataSerializer, DecompressionMode,
    PropertyCacheCompression, SerializationError, SerializedContent, SerializerKind,
    decode_either, finish_decode, prepare_for_encode,
};

const FORMAT: &str = "msgpack";

/// Compact binary encoding with per-property LZ4 compression.
///
/// Maps are written with field names so rows stay readable across model
/// changes; the names are one or two characters.
#[derive(Debug, Clone)]
pub struct MessagePackContentDataSerializer {
    compression: Arc<PropertyCacheCompression>,
    decompression: DecompressionMode,
}

impl MessagePackContentDataSerializer {
    pub fn new(compression: Arc<PropertyCacheCompression>, decompression: DecompressionMode) -> Self {
        Self {
            compression,
            decompression,
        }
    }

    fn compress(&self, content: &ContentRef, model: &mut ContentCacheDataModel) {
        for (alias, values) in model.property_data.iter_mut() {
            if !self.compression.is_compressed(content, alias) {
                continue;
            }
            for slot in values.iter_mut() {
                if let PropertyValue::String(text) = &slot.value {
                    let lazy = LazyCompressedString::compress(text);
                    trace!(
                        id = content.id,
                        alias = alias.as_str(),
                        raw = text.len(),
                        compressed = lazy.compressed_len().unwrap_or_default(),
                        "Compressed property value"
                    );
                    slot.value = PropertyValue::compressed(lazy);
                }
            }
        }
    }
}

impl ContentCacheDataSerializer for MessagePackContentDataSerializer {
    fn kind(&self) -> SerializerKind {
        SerializerKind::MsgPack
    }

    fn serialize(
        &self,
        content: &ContentRef,
        model: &ContentCacheDataModel,
        published: bool,
    ) -> Result<SerializedContent, SerializationError> {
        let mut encoded = prepare_for_encode(model, published)?.unwrap_or_else(|| model.clone());
        self.compress(content, &mut encoded);

        let bytes = rmp_serde::to_vec_named(&encoded).map_err(|err| SerializationError::Encode {
            format: FORMAT,
            id: content.id,
            message: err.to_string(),
        })?;
        Ok(SerializedContent::bytes(bytes))
    }

    fn deserialize(
        &self,
        content: &ContentRef,
        string_data: Option<&str>,
        byte_data: Option<&[u8]>,
        published: bool,
    ) -> Result<ContentCacheDataModel, SerializationError> {
        let model = decode_either(content, string_data, byte_data, true)?;
        finish_decode(content, model, published, self.decompression)
    }
}

pub(super) fn decode(content: &ContentRef, bytes: &[u8]) -> Result<ContentCacheDataModel, SerializationError> {
    rmp_serde::from_slice(bytes).map_err(|err| SerializationError::Decode {
        format: FORMAT,
        id: content.id,
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentKind, PropertyData};
    use crate::serialization::{CompressionRule, ConfiguredCompressionOptions};

    fn serializer(mode: DecompressionMode) -> MessagePackContentDataSerializer {
        let options = ConfiguredCompressionOptions::new(vec![CompressionRule::for_type(7, "body")]);
        MessagePackContentDataSerializer::new(
            Arc::new(PropertyCacheCompression::new(Arc::new(options))),
            mode,
        )
    }

    fn model_with_body(body: &str) -> ContentCacheDataModel {
        let mut model = ContentCacheDataModel::default();
        model.property_data.insert(
            "body".into(),
            vec![PropertyData::invariant(PropertyValue::String(body.into()))],
        );
        model.property_data.insert(
            "count".into(),
            vec![PropertyData::invariant(PropertyValue::Int32(12))],
        );
        model
    }

    #[test]
    fn compressed_property_decodes_lazily() {
        let content = ContentRef::new(1, 7, ContentKind::Content);
        let body = "lorem ipsum ".repeat(50);
        let ser = serializer(DecompressionMode::Lazy);

        let out = ser.serialize(&content, &model_with_body(&body), false).unwrap();
        let bytes = out.byte_data.unwrap();
        let back = ser.deserialize(&content, None, Some(&bytes), false).unwrap();

        let PropertyValue::Compressed(compressed) = &back.property_data["body"][0].value else {
            panic!("body should stay compressed");
        };
        assert!(!compressed.is_decoded());
        assert_eq!(compressed.text().unwrap(), body);
        assert_eq!(back.property_data["count"][0].value, PropertyValue::Int32(12));
    }

    #[test]
    fn eager_mode_returns_plain_strings() {
        let content = ContentRef::new(1, 7, ContentKind::Content);
        let ser = serializer(DecompressionMode::Eager);
        let model = model_with_body("eager body");

        let out = ser.serialize(&content, &model, false).unwrap();
        let back = ser
            .deserialize(&content, None, out.byte_data.as_deref(), false)
            .unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn other_content_types_are_not_compressed() {
        let content = ContentRef::new(1, 8, ContentKind::Content);
        let ser = serializer(DecompressionMode::Lazy);
        let model = model_with_body("plain");

        let out = ser.serialize(&content, &model, false).unwrap();
        let back = ser
            .deserialize(&content, None, out.byte_data.as_deref(), false)
            .unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn falls_back_to_text_column() {
        let content = ContentRef::new(1, 8, ContentKind::Media);
        let ser = serializer(DecompressionMode::Lazy);
        let back = ser
            .deserialize(&content, Some(r#"{"pd":{},"cd":{},"us":"x"}"#), None, true)
            .unwrap();
        assert_eq!(back.url_segment.as_deref(), Some("x"));
    }
}
