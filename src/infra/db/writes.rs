use async_trait::async_trait;
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use tracing::debug;

use crate::{
    application::repos::{CacheRow, ContentCacheRepo, NodeRecord, RepoError, RowPager},
    domain::ContentKind,
};

use super::{PostgresRepositories, map_sqlx_error};

/// Advisory lock keys serializing rebuilds of one kind across processes.
const REBUILD_LOCK_BASE: i64 = 0x736e_6170_0000;

fn rebuild_lock_key(kind: ContentKind) -> i64 {
    REBUILD_LOCK_BASE
        + match kind {
            ContentKind::Content => 1,
            ContentKind::Media => 2,
            ContentKind::Member => 3,
        }
}

async fn upsert_node_with<'e, E>(executor: E, node: &NodeRecord) -> Result<(), RepoError>
where
    E: PgExecutor<'e>,
{
    let publish = node.publish.as_ref();
    sqlx::query(
        r#"
        INSERT INTO content_nodes (
            id, uid, kind, content_type_id, level, path, sort_order, parent_id, trashed,
            create_date, creator_id, edited, published,
            edit_version_id, edit_version_date, edit_writer_id, edit_template_id, edit_name,
            pub_version_id, pub_version_date, pub_writer_id, pub_template_id, pub_name
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
        )
        ON CONFLICT (id) DO UPDATE SET
            uid = EXCLUDED.uid,
            kind = EXCLUDED.kind,
            content_type_id = EXCLUDED.content_type_id,
            level = EXCLUDED.level,
            path = EXCLUDED.path,
            sort_order = EXCLUDED.sort_order,
            parent_id = EXCLUDED.parent_id,
            trashed = EXCLUDED.trashed,
            create_date = EXCLUDED.create_date,
            creator_id = EXCLUDED.creator_id,
            edited = EXCLUDED.edited,
            published = EXCLUDED.published,
            edit_version_id = EXCLUDED.edit_version_id,
            edit_version_date = EXCLUDED.edit_version_date,
            edit_writer_id = EXCLUDED.edit_writer_id,
            edit_template_id = EXCLUDED.edit_template_id,
            edit_name = EXCLUDED.edit_name,
            pub_version_id = EXCLUDED.pub_version_id,
            pub_version_date = EXCLUDED.pub_version_date,
            pub_writer_id = EXCLUDED.pub_writer_id,
            pub_template_id = EXCLUDED.pub_template_id,
            pub_name = EXCLUDED.pub_name
        "#,
    )
    .bind(node.id)
    .bind(node.uid)
    .bind(node.kind)
    .bind(node.content_type_id)
    .bind(node.level)
    .bind(&node.path)
    .bind(node.sort_order)
    .bind(node.parent_id)
    .bind(node.trashed)
    .bind(node.create_date)
    .bind(node.creator_id)
    .bind(node.edited)
    .bind(node.published)
    .bind(node.edit.version_id)
    .bind(node.edit.version_date)
    .bind(node.edit.writer_id)
    .bind(node.edit.template_id)
    .bind(&node.edit.name)
    .bind(publish.map(|version| version.version_id))
    .bind(publish.map(|version| version.version_date))
    .bind(publish.map(|version| version.writer_id))
    .bind(publish.and_then(|version| version.template_id))
    .bind(publish.map(|version| version.name.as_str()))
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(map_sqlx_error)
}

/// Insert or replace a payload row, bumping its revision. Returns the new revision.
async fn upsert_row_with<'e, E>(executor: E, row: &CacheRow) -> Result<i64, RepoError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO content_nu (node_id, published, data, raw_data, rv)
        VALUES ($1, $2, $3, $4, 1)
        ON CONFLICT (node_id, published) DO UPDATE SET
            data = EXCLUDED.data,
            raw_data = EXCLUDED.raw_data,
            rv = content_nu.rv + 1
        RETURNING rv
        "#,
    )
    .bind(row.node_id)
    .bind(row.published)
    .bind(row.data.as_deref())
    .bind(row.raw_data.as_deref())
    .fetch_one(executor)
    .await
    .map_err(map_sqlx_error)
}

#[async_trait]
impl ContentCacheRepo for PostgresRepositories {
    async fn upsert_node(&self, node: &NodeRecord) -> Result<(), RepoError> {
        upsert_node_with(self.pool(), node).await
    }

    async fn upsert_row(&self, row: &CacheRow) -> Result<i64, RepoError> {
        upsert_row_with(self.pool(), row).await
    }

    async fn delete_row(&self, node_id: i32, published: bool) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM content_nu WHERE node_id = $1 AND published = $2")
            .bind(node_id)
            .bind(published)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_node(&self, node_id: i32) -> Result<bool, RepoError> {
        // Payload rows go with the node through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM content_nodes WHERE id = $1")
            .bind(node_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn rebuild(
        &self,
        kind: ContentKind,
        content_type_ids: Option<&[i32]>,
        pager: &mut (dyn RowPager + Send),
    ) -> Result<usize, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(rebuild_lock_key(kind))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "DELETE FROM content_nu u USING content_nodes n WHERE u.node_id = n.id AND n.kind = ",
        );
        qb.push_bind(kind);
        if let Some(ids) = content_type_ids {
            qb.push(" AND n.content_type_id = ANY(");
            qb.push_bind(ids.to_vec());
            qb.push(")");
        }
        let deleted = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        debug!(kind = kind.as_str(), deleted, "Cleared persisted cache rows");

        let mut written = 0;
        while let Some(page) = pager.next_page().await? {
            for set in page {
                upsert_node_with(&mut *tx, &set.node).await?;
                for row in &set.rows {
                    upsert_row_with(&mut *tx, row).await?;
                }
                written += 1;
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(written)
    }

    async fn row_ids(&self, kind: ContentKind, published: bool) -> Result<Vec<i32>, RepoError> {
        sqlx::query_scalar::<_, i32>(
            r#"
            SELECT u.node_id
            FROM content_nu u
            JOIN content_nodes n ON n.id = u.node_id
            WHERE n.kind = $1 AND u.published = $2
            ORDER BY u.node_id
            "#,
        )
        .bind(kind)
        .bind(published)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
