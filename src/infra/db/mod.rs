//! Postgres-backed repository implementations.
//!
//! Node metadata lives in `content_nodes`, payload rows in `content_nu`.
//! Reads stream in tree order with keyset paging; a rebuild runs in one
//! transaction serialized per kind by an advisory lock.

mod sources;
mod util;
mod writes;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

const DEFAULT_PAGE_SIZE: i64 = 1000;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    page_size: i64,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Rows fetched per round trip when streaming nodes.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = i64::try_from(page_size.max(1)).unwrap_or(DEFAULT_PAGE_SIZE);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
