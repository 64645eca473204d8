//! Repository traits describing persistence adapters.
//!
//! The read side streams persisted rows ordered by (level, parent id, sort
//! order) so parents always arrive before their children. The write side
//! owns the `content_nu` rows and the node metadata mirrored next to them.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{ContentKind, PublishedState};
use crate::serialization::{ContentCacheDataModel, SerializationError};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

/// Version metadata for one side of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub version_id: i32,
    pub version_date: OffsetDateTime,
    pub writer_id: i32,
    pub template_id: Option<i32>,
    pub name: String,
}

/// Node metadata as mirrored from the authoring system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: i32,
    pub uid: Uuid,
    pub kind: ContentKind,
    pub content_type_id: i32,
    pub level: i32,
    pub path: String,
    pub sort_order: i32,
    pub parent_id: i32,
    pub trashed: bool,
    pub create_date: OffsetDateTime,
    pub creator_id: i32,
    /// The node has unpublished edits.
    pub edited: bool,
    /// The node has a published version.
    pub published: bool,
    pub edit: VersionRecord,
    pub publish: Option<VersionRecord>,
}

/// One row of the data source: node metadata joined with both payload rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSourceRecord {
    pub node: NodeRecord,
    pub edit_data: Option<String>,
    pub edit_raw_data: Option<Vec<u8>>,
    pub pub_data: Option<String>,
    pub pub_raw_data: Option<Vec<u8>>,
}

/// A persisted payload row keyed by (node id, published).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    pub node_id: i32,
    pub published: bool,
    pub data: Option<String>,
    pub raw_data: Option<Vec<u8>>,
}

/// Node metadata plus every payload row that belongs to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRowSet {
    pub node: NodeRecord,
    pub rows: Vec<CacheRow>,
}

/// An entity handed over by the authoring system when it saves.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEntity {
    pub node: NodeRecord,
    pub state: PublishedState,
    pub edited: ContentCacheDataModel,
    /// Falls back to `edited` when publishing without a separate published model.
    pub published: Option<ContentCacheDataModel>,
}

pub type RecordStream<'a> = BoxStream<'a, Result<ContentSourceRecord, RepoError>>;

/// Read side of the data source.
#[async_trait]
pub trait ContentSourceRepo: Send + Sync {
    async fn get_one(
        &self,
        kind: ContentKind,
        id: i32,
    ) -> Result<Option<ContentSourceRecord>, RepoError>;

    fn stream_all(&self, kind: ContentKind) -> RecordStream<'_>;

    /// The node and every descendant.
    fn stream_branch(&self, kind: ContentKind, id: i32) -> RecordStream<'_>;

    fn stream_by_types(&self, kind: ContentKind, content_type_ids: Vec<i32>) -> RecordStream<'_>;
}

/// Pages of rows consumed by a rebuild inside its transaction.
#[async_trait]
pub trait RowPager: Send {
    async fn next_page(&mut self) -> Result<Option<Vec<CacheRowSet>>, RepoError>;
}

/// Write side of the data source.
#[async_trait]
pub trait ContentCacheRepo: Send + Sync {
    async fn upsert_node(&self, node: &NodeRecord) -> Result<(), RepoError>;

    /// Insert or replace a payload row. Returns its new revision.
    async fn upsert_row(&self, row: &CacheRow) -> Result<i64, RepoError>;

    async fn delete_row(&self, node_id: i32, published: bool) -> Result<bool, RepoError>;

    /// Delete a node's metadata and both payload rows.
    async fn delete_node(&self, node_id: i32) -> Result<bool, RepoError>;

    /// Delete every row of `kind` (optionally limited to the given types),
    /// then insert everything `pager` yields, atomically. Returns the number
    /// of nodes written.
    async fn rebuild(
        &self,
        kind: ContentKind,
        content_type_ids: Option<&[i32]>,
        pager: &mut (dyn RowPager + Send),
    ) -> Result<usize, RepoError>;

    /// Ids of nodes of `kind` that have a payload row on the given side.
    async fn row_ids(&self, kind: ContentKind, published: bool) -> Result<Vec<i32>, RepoError>;
}

/// The authoring system's own entity store, paged by id.
#[async_trait]
pub trait ContentEntitySource: Send + Sync {
    async fn page(
        &self,
        kind: ContentKind,
        content_type_ids: Option<&[i32]>,
        after_id: Option<i32>,
        limit: usize,
    ) -> Result<Vec<ContentEntity>, RepoError>;
}
