use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        ContentSourceRecord, ContentSourceRepo, NodeRecord, RecordStream, RepoError, VersionRecord,
    },
    domain::ContentKind,
};

use super::{PostgresRepositories, map_sqlx_error};

const SOURCE_SELECT: &str = "SELECT n.id, n.uid, n.kind, n.content_type_id, n.level, n.path, \
    n.sort_order, n.parent_id, n.trashed, n.create_date, n.creator_id, n.edited, n.published, \
    n.edit_version_id, n.edit_version_date, n.edit_writer_id, n.edit_template_id, n.edit_name, \
    n.pub_version_id, n.pub_version_date, n.pub_writer_id, n.pub_template_id, n.pub_name, \
    e.data AS edit_data, e.raw_data AS edit_raw_data, \
    p.data AS pub_data, p.raw_data AS pub_raw_data \
    FROM content_nodes n \
    LEFT JOIN content_nu e ON e.node_id = n.id AND NOT e.published \
    LEFT JOIN content_nu p ON p.node_id = n.id AND p.published";

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: i32,
    uid: Uuid,
    kind: ContentKind,
    content_type_id: i32,
    level: i32,
    path: String,
    sort_order: i32,
    parent_id: i32,
    trashed: bool,
    create_date: OffsetDateTime,
    creator_id: i32,
    edited: bool,
    published: bool,
    edit_version_id: i32,
    edit_version_date: OffsetDateTime,
    edit_writer_id: i32,
    edit_template_id: Option<i32>,
    edit_name: String,
    pub_version_id: Option<i32>,
    pub_version_date: Option<OffsetDateTime>,
    pub_writer_id: Option<i32>,
    pub_template_id: Option<i32>,
    pub_name: Option<String>,
    edit_data: Option<String>,
    edit_raw_data: Option<Vec<u8>>,
    pub_data: Option<String>,
    pub_raw_data: Option<Vec<u8>>,
}

impl SourceRow {
    fn cursor(&self) -> TreeCursor {
        TreeCursor {
            level: self.level,
            parent_id: self.parent_id,
            sort_order: self.sort_order,
            id: self.id,
        }
    }
}

impl TryFrom<SourceRow> for ContentSourceRecord {
    type Error = RepoError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        let publish = match (
            row.pub_version_id,
            row.pub_version_date,
            row.pub_writer_id,
            row.pub_name,
        ) {
            (Some(version_id), Some(version_date), Some(writer_id), Some(name)) => {
                Some(VersionRecord {
                    version_id,
                    version_date,
                    writer_id,
                    template_id: row.pub_template_id,
                    name,
                })
            }
            (None, None, None, None) => None,
            _ => {
                return Err(RepoError::integrity(format!(
                    "node {} has partial published version metadata",
                    row.id
                )));
            }
        };

        Ok(Self {
            node: NodeRecord {
                id: row.id,
                uid: row.uid,
                kind: row.kind,
                content_type_id: row.content_type_id,
                level: row.level,
                path: row.path,
                sort_order: row.sort_order,
                parent_id: row.parent_id,
                trashed: row.trashed,
                create_date: row.create_date,
                creator_id: row.creator_id,
                edited: row.edited,
                published: row.published,
                edit: VersionRecord {
                    version_id: row.edit_version_id,
                    version_date: row.edit_version_date,
                    writer_id: row.edit_writer_id,
                    template_id: row.edit_template_id,
                    name: row.edit_name,
                },
                publish,
            },
            edit_data: row.edit_data,
            edit_raw_data: row.edit_raw_data,
            pub_data: row.pub_data,
            pub_raw_data: row.pub_raw_data,
        })
    }
}

/// Position of the last row of a page in tree order.
#[derive(Debug, Clone, Copy)]
struct TreeCursor {
    level: i32,
    parent_id: i32,
    sort_order: i32,
    id: i32,
}

#[derive(Debug, Clone)]
enum NodeFilter {
    One(i32),
    All,
    Branch(i32),
    Types(Vec<i32>),
}

impl NodeFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            NodeFilter::One(id) => {
                qb.push(" AND n.id = ");
                qb.push_bind(*id);
            }
            NodeFilter::All => {}
            NodeFilter::Branch(id) => {
                qb.push(" AND EXISTS (SELECT 1 FROM content_nodes b WHERE b.id = ");
                qb.push_bind(*id);
                qb.push(" AND (n.path = b.path OR n.path LIKE b.path || ',%'))");
            }
            NodeFilter::Types(ids) => {
                qb.push(" AND n.content_type_id = ANY(");
                qb.push_bind(ids.clone());
                qb.push(")");
            }
        }
    }
}

struct PageState {
    filter: NodeFilter,
    after: Option<TreeCursor>,
    done: bool,
}

impl PostgresRepositories {
    async fn fetch_page(
        &self,
        kind: ContentKind,
        filter: &NodeFilter,
        after: Option<TreeCursor>,
        limit: i64,
    ) -> Result<Vec<SourceRow>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(SOURCE_SELECT);
        qb.push(" WHERE n.kind = ");
        qb.push_bind(kind);
        qb.push(" AND NOT n.trashed");
        filter.push(&mut qb);

        if let Some(cursor) = after {
            qb.push(" AND (n.level, n.parent_id, n.sort_order, n.id) > (");
            qb.push_bind(cursor.level);
            qb.push(", ");
            qb.push_bind(cursor.parent_id);
            qb.push(", ");
            qb.push_bind(cursor.sort_order);
            qb.push(", ");
            qb.push_bind(cursor.id);
            qb.push(")");
        }

        qb.push(" ORDER BY n.level, n.parent_id, n.sort_order, n.id LIMIT ");
        qb.push_bind(limit);

        qb.build_query_as::<SourceRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    fn stream_nodes(&self, kind: ContentKind, filter: NodeFilter) -> RecordStream<'_> {
        let page_size = self.page_size();
        let initial = PageState {
            filter,
            after: None,
            done: false,
        };

        let pages = stream::try_unfold(initial, move |state| async move {
            if state.done {
                return Ok::<_, RepoError>(None);
            }
            let rows = self
                .fetch_page(kind, &state.filter, state.after, page_size)
                .await?;
            let Some(after) = rows.last().map(SourceRow::cursor) else {
                return Ok(None);
            };
            let done = (rows.len() as i64) < page_size;
            let records = rows
                .into_iter()
                .map(ContentSourceRecord::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            let next = PageState {
                filter: state.filter,
                after: Some(after),
                done,
            };
            Ok(Some((records, next)))
        });

        pages
            .map_ok(|records| stream::iter(records.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

#[async_trait]
impl ContentSourceRepo for PostgresRepositories {
    async fn get_one(
        &self,
        kind: ContentKind,
        id: i32,
    ) -> Result<Option<ContentSourceRecord>, RepoError> {
        let rows = self.fetch_page(kind, &NodeFilter::One(id), None, 1).await?;
        rows.into_iter()
            .next()
            .map(ContentSourceRecord::try_from)
            .transpose()
    }

    fn stream_all(&self, kind: ContentKind) -> RecordStream<'_> {
        self.stream_nodes(kind, NodeFilter::All)
    }

    fn stream_branch(&self, kind: ContentKind, id: i32) -> RecordStream<'_> {
        self.stream_nodes(kind, NodeFilter::Branch(id))
    }

    fn stream_by_types(&self, kind: ContentKind, content_type_ids: Vec<i32>) -> RecordStream<'_> {
        self.stream_nodes(kind, NodeFilter::Types(content_type_ids))
    }
}
