//! In-memory repositories for tests and embedding.
//!
//! Behaves like the Postgres adapters: rows are streamed in tree order,
//! trashed nodes are not returned, and a rebuild either fully applies or
//! leaves the tables untouched.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::application::repos::{
    CacheRow, ContentCacheRepo, ContentEntity, ContentEntitySource, ContentSourceRecord,
    ContentSourceRepo, NodeRecord, RecordStream, RepoError, RowPager,
};
use crate::cache::lock::mutex_lock;
use crate::domain::ContentKind;

const SOURCE: &str = "infra::memory";

#[derive(Debug, Clone)]
struct StoredRow {
    data: Option<String>,
    raw_data: Option<Vec<u8>>,
    rv: i64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    nodes: BTreeMap<i32, NodeRecord>,
    rows: BTreeMap<(i32, bool), StoredRow>,
}

impl Tables {
    fn record(&self, node: &NodeRecord) -> ContentSourceRecord {
        let edit = self.rows.get(&(node.id, false));
        let publish = self.rows.get(&(node.id, true));
        ContentSourceRecord {
            node: node.clone(),
            edit_data: edit.and_then(|row| row.data.clone()),
            edit_raw_data: edit.and_then(|row| row.raw_data.clone()),
            pub_data: publish.and_then(|row| row.data.clone()),
            pub_raw_data: publish.and_then(|row| row.raw_data.clone()),
        }
    }

    fn select<F>(&self, kind: ContentKind, filter: F) -> Vec<ContentSourceRecord>
    where
        F: Fn(&NodeRecord) -> bool,
    {
        let mut nodes: Vec<&NodeRecord> = self
            .nodes
            .values()
            .filter(|node| node.kind == kind && !node.trashed && filter(node))
            .collect();
        nodes.sort_by_key(|node| (node.level, node.parent_id, node.sort_order, node.id));
        nodes.into_iter().map(|node| self.record(node)).collect()
    }

    fn matches_scope(node: &NodeRecord, kind: ContentKind, content_type_ids: Option<&[i32]>) -> bool {
        node.kind == kind && content_type_ids.is_none_or(|ids| ids.contains(&node.content_type_id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryContentRepository {
    tables: Mutex<Tables>,
}

impl InMemoryContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision of a persisted row, if present.
    pub fn revision(&self, node_id: i32, published: bool) -> Option<i64> {
        mutex_lock(&self.tables, SOURCE, "revision")
            .rows
            .get(&(node_id, published))
            .map(|row| row.rv)
    }

    pub fn row(&self, node_id: i32, published: bool) -> Option<CacheRow> {
        mutex_lock(&self.tables, SOURCE, "row")
            .rows
            .get(&(node_id, published))
            .map(|row| CacheRow {
                node_id,
                published,
                data: row.data.clone(),
                raw_data: row.raw_data.clone(),
            })
    }

    pub fn row_count(&self) -> usize {
        mutex_lock(&self.tables, SOURCE, "row_count").rows.len()
    }

    /// Blank a row's payload columns, keeping the row itself.
    pub fn clear_payload(&self, node_id: i32, published: bool) -> bool {
        let mut tables = mutex_lock(&self.tables, SOURCE, "clear_payload");
        match tables.rows.get_mut(&(node_id, published)) {
            Some(row) => {
                row.data = None;
                row.raw_data = None;
                true
            }
            None => false,
        }
    }

    fn stream(records: Vec<ContentSourceRecord>) -> RecordStream<'static> {
        Box::pin(stream::iter(records.into_iter().map(Ok)))
    }
}

#[async_trait]
impl ContentSourceRepo for InMemoryContentRepository {
    async fn get_one(
        &self,
        kind: ContentKind,
        id: i32,
    ) -> Result<Option<ContentSourceRecord>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "get_one");
        Ok(tables.select(kind, |node| node.id == id).into_iter().next())
    }

    fn stream_all(&self, kind: ContentKind) -> RecordStream<'_> {
        let records = mutex_lock(&self.tables, SOURCE, "stream_all").select(kind, |_| true);
        Self::stream(records)
    }

    fn stream_branch(&self, kind: ContentKind, id: i32) -> RecordStream<'_> {
        let tables = mutex_lock(&self.tables, SOURCE, "stream_branch");
        let Some(root_path) = tables
            .nodes
            .get(&id)
            .filter(|node| node.kind == kind)
            .map(|node| node.path.clone())
        else {
            return Self::stream(Vec::new());
        };
        let prefix = format!("{root_path},");
        let records = tables.select(kind, |node| {
            node.path == root_path || node.path.starts_with(&prefix)
        });
        Self::stream(records)
    }

    fn stream_by_types(&self, kind: ContentKind, content_type_ids: Vec<i32>) -> RecordStream<'_> {
        let records = mutex_lock(&self.tables, SOURCE, "stream_by_types")
            .select(kind, |node| content_type_ids.contains(&node.content_type_id));
        Self::stream(records)
    }
}

#[async_trait]
impl ContentCacheRepo for InMemoryContentRepository {
    async fn upsert_node(&self, node: &NodeRecord) -> Result<(), RepoError> {
        mutex_lock(&self.tables, SOURCE, "upsert_node")
            .nodes
            .insert(node.id, node.clone());
        Ok(())
    }

    async fn upsert_row(&self, row: &CacheRow) -> Result<i64, RepoError> {
        let mut tables = mutex_lock(&self.tables, SOURCE, "upsert_row");
        if !tables.nodes.contains_key(&row.node_id) {
            return Err(RepoError::InvalidInput {
                message: format!("node {} has no metadata row", row.node_id),
            });
        }
        let rv = tables
            .rows
            .get(&(row.node_id, row.published))
            .map_or(1, |existing| existing.rv + 1);
        tables.rows.insert(
            (row.node_id, row.published),
            StoredRow {
                data: row.data.clone(),
                raw_data: row.raw_data.clone(),
                rv,
            },
        );
        Ok(rv)
    }

    async fn delete_row(&self, node_id: i32, published: bool) -> Result<bool, RepoError> {
        Ok(mutex_lock(&self.tables, SOURCE, "delete_row")
            .rows
            .remove(&(node_id, published))
            .is_some())
    }

    async fn delete_node(&self, node_id: i32) -> Result<bool, RepoError> {
        let mut tables = mutex_lock(&self.tables, SOURCE, "delete_node");
        tables.rows.remove(&(node_id, false));
        tables.rows.remove(&(node_id, true));
        Ok(tables.nodes.remove(&node_id).is_some())
    }

    async fn rebuild(
        &self,
        kind: ContentKind,
        content_type_ids: Option<&[i32]>,
        pager: &mut (dyn RowPager + Send),
    ) -> Result<usize, RepoError> {
        let mut staged = mutex_lock(&self.tables, SOURCE, "rebuild").clone();

        let doomed: Vec<i32> = staged
            .nodes
            .values()
            .filter(|node| Tables::matches_scope(node, kind, content_type_ids))
            .map(|node| node.id)
            .collect();
        for id in doomed {
            staged.rows.remove(&(id, false));
            staged.rows.remove(&(id, true));
        }

        let mut written = 0;
        while let Some(page) = pager.next_page().await? {
            for set in page {
                for row in set.rows {
                    staged.rows.insert(
                        (row.node_id, row.published),
                        StoredRow {
                            data: row.data,
                            raw_data: row.raw_data,
                            rv: 1,
                        },
                    );
                }
                staged.nodes.insert(set.node.id, set.node);
                written += 1;
            }
        }

        *mutex_lock(&self.tables, SOURCE, "rebuild") = staged;
        Ok(written)
    }

    async fn row_ids(&self, kind: ContentKind, published: bool) -> Result<Vec<i32>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "row_ids");
        Ok(tables
            .nodes
            .values()
            .filter(|node| node.kind == kind && tables.rows.contains_key(&(node.id, published)))
            .map(|node| node.id)
            .collect())
    }
}

/// Entity source backed by a map, paged by ascending id.
#[derive(Debug, Default)]
pub struct InMemoryEntitySource {
    entities: Mutex<BTreeMap<i32, ContentEntity>>,
}

impl InMemoryEntitySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: ContentEntity) {
        mutex_lock(&self.entities, SOURCE, "insert").insert(entity.node.id, entity);
    }

    pub fn remove(&self, id: i32) -> Option<ContentEntity> {
        mutex_lock(&self.entities, SOURCE, "remove").remove(&id)
    }
}

#[async_trait]
impl ContentEntitySource for InMemoryEntitySource {
    async fn page(
        &self,
        kind: ContentKind,
        content_type_ids: Option<&[i32]>,
        after_id: Option<i32>,
        limit: usize,
    ) -> Result<Vec<ContentEntity>, RepoError> {
        let entities = mutex_lock(&self.entities, SOURCE, "page");
        Ok(entities
            .values()
            .filter(|entity| after_id.is_none_or(|after| entity.node.id > after))
            .filter(|entity| Tables::matches_scope(&entity.node, kind, content_type_ids))
            .take(limit)
            .cloned()
            .collect())
    }
}
