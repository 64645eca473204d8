//! Assembles [`ContentNodeKit`]s from persisted data source rows.

use std::sync::Arc;

use tracing::warn;

use crate::application::repos::{ContentSourceRecord, VersionRecord};
use crate::domain::{ContentData, ContentKind, ContentNode, ContentNodeKit, ContentRef};
use crate::serialization::{ContentCacheDataModel, ContentCacheDataSerializer, SerializationError};

#[derive(Clone)]
pub struct KitBuilder {
    serializer: Arc<dyn ContentCacheDataSerializer>,
    fail_on_missing_payload: bool,
}

impl KitBuilder {
    pub fn new(serializer: Arc<dyn ContentCacheDataSerializer>, fail_on_missing_payload: bool) -> Self {
        Self {
            serializer,
            fail_on_missing_payload,
        }
    }

    pub fn serializer(&self) -> &Arc<dyn ContentCacheDataSerializer> {
        &self.serializer
    }

    /// Decode one row into a kit.
    ///
    /// Content carries a draft side when it has unpublished edits and a
    /// published side when it is published. Media and members only ever
    /// carry a published side, decoded from their edited row.
    pub fn build(&self, record: ContentSourceRecord) -> Result<ContentNodeKit, SerializationError> {
        let meta = &record.node;
        let content = ContentRef::new(meta.id, meta.content_type_id, meta.kind);

        let (draft_data, published_data) = match meta.kind {
            ContentKind::Content => {
                let draft = if meta.edited {
                    self.side(
                        &content,
                        &meta.edit,
                        record.edit_data.as_deref(),
                        record.edit_raw_data.as_deref(),
                        false,
                    )?
                } else {
                    None
                };
                let published = match (meta.published, meta.publish.as_ref()) {
                    (true, Some(version)) => self.side(
                        &content,
                        version,
                        record.pub_data.as_deref(),
                        record.pub_raw_data.as_deref(),
                        true,
                    )?,
                    (true, None) => self.missing(&content, "published version")?,
                    (false, _) => None,
                };
                (draft, published)
            }
            ContentKind::Media | ContentKind::Member => {
                let version = VersionRecord {
                    writer_id: meta.creator_id,
                    template_id: None,
                    ..meta.edit.clone()
                };
                let published = self
                    .side(
                        &content,
                        &version,
                        record.edit_data.as_deref(),
                        record.edit_raw_data.as_deref(),
                        true,
                    )?
                    .map(|mut data| {
                        data.url_segment = None;
                        data
                    });
                (None, published)
            }
        };

        let node = ContentNode::new(
            meta.id,
            meta.uid,
            meta.content_type_id,
            meta.level,
            meta.path.clone(),
            meta.sort_order,
            meta.parent_id,
            meta.create_date,
            meta.creator_id,
        );

        Ok(ContentNodeKit {
            node,
            content_type_id: meta.content_type_id,
            draft_data,
            published_data,
        })
    }

    fn side(
        &self,
        content: &ContentRef,
        version: &VersionRecord,
        string_data: Option<&str>,
        byte_data: Option<&[u8]>,
        published: bool,
    ) -> Result<Option<ContentData>, SerializationError> {
        if string_data.is_none() && byte_data.is_none() {
            let side = if published { "published" } else { "edited" };
            return self.missing(content, side);
        }

        let model = self
            .serializer
            .deserialize(content, string_data, byte_data, published)?;
        Ok(Some(content_data(version, model, published)))
    }

    fn missing(
        &self,
        content: &ContentRef,
        side: &str,
    ) -> Result<Option<ContentData>, SerializationError> {
        if self.fail_on_missing_payload {
            return Err(SerializationError::MissingPayload { id: content.id });
        }
        warn!(
            node_id = content.id,
            kind = content.kind.as_str(),
            side,
            "Missing persisted payload, consider rebuilding"
        );
        Ok(None)
    }
}

fn content_data(version: &VersionRecord, model: ContentCacheDataModel, published: bool) -> ContentData {
    ContentData {
        name: version.name.clone(),
        url_segment: model.url_segment,
        version_id: version.version_id,
        version_date: version.version_date,
        writer_id: version.writer_id,
        template_id: version.template_id.filter(|id| *id != 0),
        published,
        properties: model.property_data,
        culture_infos: (!model.culture_data.is_empty()).then_some(model.culture_data),
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::application::repos::NodeRecord;
    use crate::domain::{PropertyData, PropertyValue, ROOT_ID};
    use crate::serialization::{DecompressionMode, JsonContentDataSerializer};

    fn version(name: &str, template_id: Option<i32>) -> VersionRecord {
        VersionRecord {
            version_id: 3,
            version_date: OffsetDateTime::UNIX_EPOCH,
            writer_id: 12,
            template_id,
            name: name.to_string(),
        }
    }

    fn record(kind: ContentKind, edited: bool, published: bool) -> ContentSourceRecord {
        ContentSourceRecord {
            node: NodeRecord {
                id: 5,
                uid: Uuid::from_u128(5),
                kind,
                content_type_id: 7,
                level: 1,
                path: "-1,5".into(),
                sort_order: 0,
                parent_id: ROOT_ID,
                trashed: false,
                create_date: OffsetDateTime::UNIX_EPOCH,
                creator_id: 2,
                edited,
                published,
                edit: version("draft", Some(0)),
                publish: published.then(|| version("live", Some(40))),
            },
            edit_data: None,
            edit_raw_data: None,
            pub_data: None,
            pub_raw_data: None,
        }
    }

    fn payload(title: &str) -> String {
        let mut model = ContentCacheDataModel::default();
        model.property_data.insert(
            "title".into(),
            vec![PropertyData::invariant(PropertyValue::String(title.into()))],
        );
        model.url_segment = Some("home".into());
        serde_json::to_string(&model).unwrap()
    }

    fn builder(strict: bool) -> KitBuilder {
        KitBuilder::new(
            Arc::new(JsonContentDataSerializer::new(DecompressionMode::Lazy)),
            strict,
        )
    }

    #[test]
    fn content_gets_both_sides() {
        let mut row = record(ContentKind::Content, true, true);
        row.edit_data = Some(payload("Draft"));
        row.pub_data = Some(payload("Live"));

        let kit = builder(false).build(row).unwrap();
        let draft = kit.draft_data.unwrap();
        let published = kit.published_data.unwrap();
        assert_eq!(draft.name, "draft");
        assert!(!draft.published);
        assert_eq!(draft.template_id, None);
        assert_eq!(published.name, "live");
        assert_eq!(published.template_id, Some(40));
        assert_eq!(published.url_segment.as_deref(), Some("home"));
        assert!(published.culture_infos.is_none());
    }

    #[test]
    fn missing_payload_drops_side_when_lenient() {
        let mut row = record(ContentKind::Content, true, true);
        row.pub_data = Some(payload("Live"));

        let kit = builder(false).build(row).unwrap();
        assert!(kit.draft_data.is_none());
        assert!(kit.published_data.is_some());
    }

    #[test]
    fn missing_payload_fails_when_strict() {
        let row = record(ContentKind::Content, false, true);
        let err = builder(true).build(row).unwrap_err();
        assert!(matches!(err, SerializationError::MissingPayload { id: 5 }));
    }

    #[test]
    fn media_reads_edited_row_as_published() {
        let mut row = record(ContentKind::Media, true, false);
        row.edit_data = Some(payload("Image"));

        let kit = builder(false).build(row).unwrap();
        assert!(kit.draft_data.is_none());
        let published = kit.published_data.unwrap();
        assert!(published.published);
        assert_eq!(published.writer_id, 2);
        assert_eq!(published.url_segment, None);
    }
}
