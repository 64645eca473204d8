//! Data source: maps persisted rows to kits and entities to persisted rows.
//!
//! Holds no cache state. Reads are streamed in tree order; writes go
//! through [`ContentCacheRepo`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::application::kits::KitBuilder;
use crate::application::repos::{
    CacheRow, CacheRowSet, ContentCacheRepo, ContentEntity, ContentEntitySource, ContentSourceRepo,
    RecordStream, RepoError, RowPager,
};
use crate::domain::{ContentKind, ContentNodeKit, ContentRef, PublishedState};
use crate::serialization::{ContentCacheDataModel, ContentCacheDataSerializer};

pub type KitStream<'a> = BoxStream<'a, Result<ContentNodeKit, RepoError>>;

/// Type filters for a rebuild. `None` rebuilds every type of that kind,
/// an empty list skips the kind.
#[derive(Debug, Clone, Default)]
pub struct RebuildScope {
    pub content_type_ids: Option<Vec<i32>>,
    pub media_type_ids: Option<Vec<i32>>,
    pub member_type_ids: Option<Vec<i32>>,
}

impl RebuildScope {
    pub fn all() -> Self {
        Self::default()
    }

    fn for_kind(&self, kind: ContentKind) -> Option<&[i32]> {
        match kind {
            ContentKind::Content => self.content_type_ids.as_deref(),
            ContentKind::Media => self.media_type_ids.as_deref(),
            ContentKind::Member => self.member_type_ids.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub content: usize,
    pub media: usize,
    pub member: usize,
}

/// Whether every live node of a kind has its persisted rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityValidation {
    pub kind: ContentKind,
    pub checked: usize,
    pub missing_edited: Vec<i32>,
    pub missing_published: Vec<i32>,
}

impl EntityValidation {
    pub fn is_valid(&self) -> bool {
        self.missing_edited.is_empty() && self.missing_published.is_empty()
    }
}

pub struct DataSource {
    source: Arc<dyn ContentSourceRepo>,
    writes: Arc<dyn ContentCacheRepo>,
    kits: KitBuilder,
    page_size: usize,
}

impl DataSource {
    pub fn new(
        source: Arc<dyn ContentSourceRepo>,
        writes: Arc<dyn ContentCacheRepo>,
        kits: KitBuilder,
        page_size: usize,
    ) -> Self {
        Self {
            source,
            writes,
            kits,
            page_size: page_size.max(1),
        }
    }

    fn serializer(&self) -> &Arc<dyn ContentCacheDataSerializer> {
        self.kits.serializer()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_one(
        &self,
        kind: ContentKind,
        id: i32,
    ) -> Result<Option<ContentNodeKit>, RepoError> {
        match self.source.get_one(kind, id).await? {
            Some(record) => Ok(Some(self.kits.build(record)?)),
            None => Ok(None),
        }
    }

    pub fn get_all(&self, kind: ContentKind) -> KitStream<'_> {
        self.decode(self.source.stream_all(kind))
    }

    pub fn get_branch(&self, kind: ContentKind, id: i32) -> KitStream<'_> {
        self.decode(self.source.stream_branch(kind, id))
    }

    pub fn get_by_types(&self, kind: ContentKind, content_type_ids: Vec<i32>) -> KitStream<'_> {
        self.decode(self.source.stream_by_types(kind, content_type_ids))
    }

    fn decode<'a>(&'a self, records: RecordStream<'a>) -> KitStream<'a> {
        let stream = records.map(move |record| match record {
            Ok(record) => self.kits.build(record).map_err(RepoError::from),
            Err(err) => Err(err),
        });
        Box::pin(stream)
    }

    /// Collect a kit stream, failing on the first bad row.
    pub async fn collect(stream: KitStream<'_>) -> Result<Vec<ContentNodeKit>, RepoError> {
        stream.try_collect().await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Persist one side of an entity.
    pub async fn upsert(&self, entity: &ContentEntity, published: bool) -> Result<i64, RepoError> {
        let row = self.row(entity, published)?;
        let revision = self.writes.upsert_row(&row).await?;
        debug!(
            node_id = entity.node.id,
            kind = entity.node.kind.as_str(),
            published,
            revision,
            "Persisted cache row"
        );
        Ok(revision)
    }

    /// Persist an edited content entity and follow its publishing transition.
    #[instrument(skip(self, entity), fields(node_id = entity.node.id))]
    pub async fn refresh_content(&self, entity: &ContentEntity) -> Result<(), RepoError> {
        self.writes.upsert_node(&entity.node).await?;
        self.upsert(entity, false).await?;
        match entity.state {
            PublishedState::Unpublishing => {
                self.writes.delete_row(entity.node.id, true).await?;
            }
            PublishedState::Publishing => {
                self.upsert(entity, true).await?;
            }
            PublishedState::Published | PublishedState::Unpublished => {}
        }
        Ok(())
    }

    /// Media and members have a single row.
    #[instrument(skip(self, entity), fields(node_id = entity.node.id))]
    pub async fn refresh_media(&self, entity: &ContentEntity) -> Result<(), RepoError> {
        self.writes.upsert_node(&entity.node).await?;
        self.upsert(entity, false).await.map(|_| ())
    }

    pub async fn refresh_member(&self, entity: &ContentEntity) -> Result<(), RepoError> {
        self.refresh_media(entity).await
    }

    pub async fn remove(&self, id: i32) -> Result<bool, RepoError> {
        self.writes.delete_node(id).await
    }

    pub async fn remove_published(&self, id: i32) -> Result<bool, RepoError> {
        self.writes.delete_row(id, true).await
    }

    fn row(&self, entity: &ContentEntity, published: bool) -> Result<CacheRow, RepoError> {
        let node = &entity.node;
        let content = ContentRef::new(node.id, node.content_type_id, node.kind);
        let model: &ContentCacheDataModel = if published {
            entity.published.as_ref().unwrap_or(&entity.edited)
        } else {
            &entity.edited
        };
        let serialized = self.serializer().serialize(&content, model, published)?;
        Ok(CacheRow {
            node_id: node.id,
            published,
            data: serialized.string_data,
            raw_data: serialized.byte_data.map(|bytes| bytes.to_vec()),
        })
    }

    fn row_set(&self, entity: &ContentEntity) -> Result<CacheRowSet, RepoError> {
        let mut rows = vec![self.row(entity, false)?];
        if entity.node.kind == ContentKind::Content && entity.node.published {
            rows.push(self.row(entity, true)?);
        }
        Ok(CacheRowSet {
            node: entity.node.clone(),
            rows,
        })
    }

    // ========================================================================
    // Rebuild and validation
    // ========================================================================

    /// Delete then repopulate persisted rows from the entity source.
    #[instrument(skip(self, entities, scope))]
    pub async fn rebuild(
        &self,
        entities: &dyn ContentEntitySource,
        scope: &RebuildScope,
    ) -> Result<RebuildReport, RepoError> {
        let mut report = RebuildReport::default();
        for kind in [ContentKind::Content, ContentKind::Media, ContentKind::Member] {
            let type_ids = scope.for_kind(kind);
            if type_ids.is_some_and(<[i32]>::is_empty) {
                continue;
            }
            let started_at = Instant::now();
            let mut pager = EntityPager {
                data_source: self,
                entities,
                kind,
                type_ids,
                after_id: None,
                done: false,
            };
            let written = self.writes.rebuild(kind, type_ids, &mut pager).await?;
            info!(
                kind = kind.as_str(),
                written,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Rebuilt persisted cache rows"
            );
            match kind {
                ContentKind::Content => report.content = written,
                ContentKind::Media => report.media = written,
                ContentKind::Member => report.member = written,
            }
        }
        Ok(report)
    }

    /// Check that every live node of `kind` has its rows. This is a health
    /// check; nothing is repaired.
    pub async fn validate_entities(
        &self,
        entities: &dyn ContentEntitySource,
        kind: ContentKind,
    ) -> Result<EntityValidation, RepoError> {
        let edited: HashSet<i32> = self.writes.row_ids(kind, false).await?.into_iter().collect();
        let published: HashSet<i32> = if kind == ContentKind::Content {
            self.writes.row_ids(kind, true).await?.into_iter().collect()
        } else {
            HashSet::new()
        };

        let mut validation = EntityValidation {
            kind,
            checked: 0,
            missing_edited: Vec::new(),
            missing_published: Vec::new(),
        };
        let mut after_id = None;
        loop {
            let page = entities.page(kind, None, after_id, self.page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = Some(last.node.id);
            for entity in page.iter().filter(|entity| !entity.node.trashed) {
                validation.checked += 1;
                let id = entity.node.id;
                if !edited.contains(&id) {
                    validation.missing_edited.push(id);
                }
                if kind == ContentKind::Content && entity.node.published && !published.contains(&id) {
                    validation.missing_published.push(id);
                }
            }
        }

        if !validation.is_valid() {
            warn!(
                kind = kind.as_str(),
                missing_edited = validation.missing_edited.len(),
                missing_published = validation.missing_published.len(),
                "Persisted cache rows are incomplete, consider rebuilding"
            );
        }
        Ok(validation)
    }
}

struct EntityPager<'a> {
    data_source: &'a DataSource,
    entities: &'a dyn ContentEntitySource,
    kind: ContentKind,
    type_ids: Option<&'a [i32]>,
    after_id: Option<i32>,
    done: bool,
}

#[async_trait]
impl RowPager for EntityPager<'_> {
    async fn next_page(&mut self) -> Result<Option<Vec<CacheRowSet>>, RepoError> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .entities
            .page(
                self.kind,
                self.type_ids,
                self.after_id,
                self.data_source.page_size,
            )
            .await?;
        let Some(last) = page.last() else {
            self.done = true;
            return Ok(None);
        };
        self.after_id = Some(last.node.id);
        if page.len() < self.data_source.page_size {
            self.done = true;
        }

        page.iter()
            .map(|entity| self.data_source.row_set(entity))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}
