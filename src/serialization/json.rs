use crate::domain::ContentRef;

use super::{
    ContentCacheDataModel, ContentCacheDataSerializer, DecompressionMode, SerializationError,
    SerializedContent, SerializerKind, decode_either, finish_decode, prepare_for_encode,
};

const FORMAT: &str = "json";

/// Self-describing text encoding. Never compresses on write.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonContentDataSerializer {
    decompression: DecompressionMode,
}

impl JsonContentDataSerializer {
    pub fn new(decompression: DecompressionMode) -> Self {
        Self { decompression }
    }
}

impl ContentCacheDataSerializer for JsonContentDataSerializer {
    fn kind(&self) -> SerializerKind {
        SerializerKind::Json
    }

    fn serialize(
        &self,
        content: &ContentRef,
        model: &ContentCacheDataModel,
        published: bool,
    ) -> Result<SerializedContent, SerializationError> {
        let normalized = prepare_for_encode(model, published)?;
        let model = normalized.as_ref().unwrap_or(model);
        let text = serde_json::to_string(model).map_err(|err| SerializationError::Encode {
            format: FORMAT,
            id: content.id,
            message: err.to_string(),
        })?;
        Ok(SerializedContent::text(text))
    }

    fn deserialize(
        &self,
        content: &ContentRef,
        string_data: Option<&str>,
        byte_data: Option<&[u8]>,
        published: bool,
    ) -> Result<ContentCacheDataModel, SerializationError> {
        let model = decode_either(content, string_data, byte_data, false)?;
        finish_decode(content, model, published, self.decompression)
    }
}

pub(super) fn decode(content: &ContentRef, text: &str) -> Result<ContentCacheDataModel, SerializationError> {
    serde_json::from_str(text).map_err(|err| SerializationError::Decode {
        format: FORMAT,
        id: content.id,
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentKind, PropertyData, PropertyValue};

    fn content() -> ContentRef {
        ContentRef::new(11, 3, ContentKind::Content)
    }

    #[test]
    fn writes_short_keys() {
        let mut model = ContentCacheDataModel::default();
        model.property_data.insert(
            "count".into(),
            vec![PropertyData::invariant(PropertyValue::Int32(4))],
        );
        model.url_segment = Some("home".into());

        let out = JsonContentDataSerializer::default()
            .serialize(&content(), &model, false)
            .unwrap();
        assert!(out.byte_data.is_none());
        let text = out.string_data.unwrap();
        assert_eq!(
            text,
            r#"{"pd":{"count":[{"c":"","s":"","v":{"i":4}}]},"cd":{},"us":"home"}"#
        );
    }

    #[test]
    fn unknown_value_tag_is_a_decode_error() {
        let err = JsonContentDataSerializer::default()
            .deserialize(
                &content(),
                Some(r#"{"pd":{"x":[{"c":"","s":"","v":{"q":1}}]}}"#),
                None,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, SerializationError::Decode { id: 11, .. }));
    }

    #[test]
    fn missing_payload_is_reported() {
        let err = JsonContentDataSerializer::default()
            .deserialize(&content(), None, None, true)
            .unwrap_err();
        assert!(matches!(err, SerializationError::MissingPayload { id: 11 }));
    }
}
