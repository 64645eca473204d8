//! Published snapshot service.
//!
//! Owns one generation store per cached kind and keeps them in step with
//! the data source: full loads, change notifications applied under a single
//! write lock per batch, and snapshots pinning a consistent view of both.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{error, info, instrument, warn};

use crate::application::data_source::{DataSource, EntityValidation, RebuildReport, RebuildScope};
use crate::application::error::AppError;
use crate::application::repos::ContentEntitySource;
use crate::cache::{
    CacheConfig, ContentChange, ContentStore, LoadReport, NotificationPlan, Snapshot, StorePlan,
    WriteGuard,
};
use crate::domain::{ChangeType, ContentKind};

const METRIC_NOTIFY_MS: &str = "snapcache_notify_ms";
const METRIC_LOAD_MS: &str = "snapcache_load_ms";
const METRIC_NOTIFY_FAILED_TOTAL: &str = "snapcache_notify_failed_total";

/// A consistent read view over the content and media trees.
#[derive(Debug, Clone)]
pub struct PublishedSnapshot {
    pub content: Snapshot,
    pub media: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChange {
    pub id: i32,
    pub change_type: ChangeType,
    pub error: String,
}

/// Outcome of one notification batch. The batch is not atomic: ids listed
/// in `failed` should be replayed, everything else was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub kind: ContentKind,
    pub applied: usize,
    pub failed: Vec<FailedChange>,
    /// A failure left the tree suspect and it was reloaded from the data source.
    pub reloaded: bool,
}

impl BatchReport {
    fn new(kind: ContentKind) -> Self {
        Self {
            kind,
            applied: 0,
            failed: Vec::new(),
            reloaded: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<i32> {
        self.failed.iter().map(|failure| failure.id).collect()
    }
}

pub struct PublishedSnapshotService {
    content: Arc<ContentStore>,
    media: Arc<ContentStore>,
    data_source: Arc<DataSource>,
}

impl PublishedSnapshotService {
    pub fn new(config: CacheConfig, data_source: Arc<DataSource>) -> Self {
        Self {
            content: Arc::new(ContentStore::new(ContentKind::Content, config.clone())),
            media: Arc::new(ContentStore::new(ContentKind::Media, config)),
            data_source,
        }
    }

    pub fn content_store(&self) -> &Arc<ContentStore> {
        &self.content
    }

    pub fn media_store(&self) -> &Arc<ContentStore> {
        &self.media
    }

    pub fn data_source(&self) -> &Arc<DataSource> {
        &self.data_source
    }

    pub fn store(&self, kind: ContentKind) -> Result<&Arc<ContentStore>, AppError> {
        match kind {
            ContentKind::Content => Ok(&self.content),
            ContentKind::Media => Ok(&self.media),
            ContentKind::Member => Err(AppError::validation(
                "members are not cached in a generation store",
            )),
        }
    }

    pub fn create_snapshot(&self) -> PublishedSnapshot {
        PublishedSnapshot {
            content: self.content.create_snapshot(),
            media: self.media.create_snapshot(),
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Replace the whole tree of `kind` from the data source.
    #[instrument(skip(self))]
    pub async fn load(&self, kind: ContentKind) -> Result<LoadReport, AppError> {
        let store = self.store(kind)?;
        let guard = store.write().await;
        self.reload_locked(&guard, kind).await
    }

    pub async fn load_all(&self) -> Result<(LoadReport, LoadReport), AppError> {
        let content = self.load(ContentKind::Content).await?;
        let media = self.load(ContentKind::Media).await?;
        Ok((content, media))
    }

    async fn reload_locked(
        &self,
        guard: &WriteGuard<'_>,
        kind: ContentKind,
    ) -> Result<LoadReport, AppError> {
        let started_at = Instant::now();
        let kits = DataSource::collect(self.data_source.get_all(kind)).await?;
        let fetched = kits.len();
        let report = guard.set_all_fast_sorted(kits);

        let elapsed = started_at.elapsed();
        histogram!(METRIC_LOAD_MS, "kind" => kind.as_str()).record(elapsed.as_secs_f64() * 1000.0);
        info!(
            kind = kind.as_str(),
            fetched,
            loaded = report.loaded,
            skipped = report.skipped.len(),
            live_gen = guard.live_gen(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Loaded tree from data source"
        );
        Ok(report)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Apply a batch of changes under one write lock.
    ///
    /// A failing change does not undo the ones before it. A referential
    /// corruption reloads the whole tree once the batch is done.
    #[instrument(skip(self, changes), fields(count = changes.len()))]
    pub async fn notify(
        &self,
        kind: ContentKind,
        changes: &[ContentChange],
    ) -> Result<BatchReport, AppError> {
        let store = self.store(kind)?;
        let started_at = Instant::now();
        let guard = store.write().await;

        let mut report = BatchReport::new(kind);
        let mut needs_reload = false;
        for change in changes {
            match self.apply_change(&guard, kind, change).await {
                Ok(applied) => {
                    report.applied += 1;
                    for skipped in applied.skipped {
                        report.failed.push(FailedChange {
                            id: skipped.id,
                            change_type: change.change_type,
                            error: skipped.reason.to_string(),
                        });
                    }
                }
                Err(err) => {
                    if err.needs_reload() {
                        needs_reload = true;
                    } else {
                        warn!(
                            kind = kind.as_str(),
                            node_id = change.id,
                            change = change.change_type.as_str(),
                            error = %err,
                            "Change could not be applied"
                        );
                    }
                    report.failed.push(FailedChange {
                        id: change.id,
                        change_type: change.change_type,
                        error: err.to_string(),
                    });
                }
            }
        }

        if needs_reload {
            error!(
                kind = kind.as_str(),
                failed = ?report.failed_ids(),
                "Tree corruption detected while applying changes, reloading"
            );
            self.reload_locked(&guard, kind).await?;
            report.reloaded = true;
        }
        drop(guard);

        if !report.failed.is_empty() {
            counter!(METRIC_NOTIFY_FAILED_TOTAL, "kind" => kind.as_str())
                .increment(report.failed.len() as u64);
        }
        let elapsed = started_at.elapsed();
        histogram!(METRIC_NOTIFY_MS, "kind" => kind.as_str()).record(elapsed.as_secs_f64() * 1000.0);
        info!(
            kind = kind.as_str(),
            applied = report.applied,
            failed = report.failed.len(),
            reloaded = report.reloaded,
            elapsed_ms = elapsed.as_millis() as u64,
            "Applied change batch"
        );
        Ok(report)
    }

    async fn apply_change(
        &self,
        guard: &WriteGuard<'_>,
        kind: ContentKind,
        change: &ContentChange,
    ) -> Result<LoadReport, AppError> {
        let single = LoadReport {
            loaded: 1,
            skipped: Vec::new(),
        };
        match change.change_type {
            ChangeType::RefreshAll => self.reload_locked(guard, kind).await,
            ChangeType::Remove => {
                guard.clear(change.id)?;
                Ok(single)
            }
            ChangeType::RefreshNode => {
                match self.data_source.get_one(kind, change.id).await? {
                    Some(kit) if !kit.is_empty() => guard.set(&kit)?,
                    _ => {
                        guard.clear(change.id)?;
                    }
                }
                Ok(single)
            }
            ChangeType::RefreshBranch => {
                let kits =
                    DataSource::collect(self.data_source.get_branch(kind, change.id)).await?;
                Ok(guard.set_branch(change.id, &kits)?)
            }
        }
    }

    /// Apply a consumed batch plan to the stores it names.
    pub async fn apply_plan(&self, plan: &NotificationPlan) -> Result<Vec<BatchReport>, AppError> {
        let mut reports = Vec::new();
        for (kind, store_plan) in [
            (ContentKind::Content, &plan.content),
            (ContentKind::Media, &plan.media),
        ] {
            let changes = match store_plan {
                None => continue,
                Some(StorePlan::ReloadAll) => vec![ContentChange::refresh_all()],
                Some(StorePlan::Changes(changes)) => changes.clone(),
            };
            reports.push(self.notify(kind, &changes).await?);
        }
        Ok(reports)
    }

    /// Re-read every node of the given content types. Positions are kept.
    #[instrument(skip(self))]
    pub async fn refresh_content_types(
        &self,
        kind: ContentKind,
        content_type_ids: Vec<i32>,
    ) -> Result<BatchReport, AppError> {
        let store = self.store(kind)?;
        let kits = DataSource::collect(self.data_source.get_by_types(kind, content_type_ids)).await?;

        let guard = store.write().await;
        let mut report = BatchReport::new(kind);
        for kit in &kits {
            match guard.set(kit) {
                Ok(()) => report.applied += 1,
                Err(err) => report.failed.push(FailedChange {
                    id: kit.node.id,
                    change_type: ChangeType::RefreshNode,
                    error: err.to_string(),
                }),
            }
        }
        Ok(report)
    }

    /// Trim generations no snapshot can observe, in both stores.
    pub async fn collect(&self) -> usize {
        self.content.collect().await + self.media.collect().await
    }

    // ========================================================================
    // Rebuild and validation
    // ========================================================================

    /// Repopulate persisted rows, then reload both trees from them.
    pub async fn rebuild(
        &self,
        entities: &dyn ContentEntitySource,
        scope: &RebuildScope,
    ) -> Result<RebuildReport, AppError> {
        let report = self.data_source.rebuild(entities, scope).await?;
        self.load_all().await?;
        Ok(report)
    }

    pub async fn validate(
        &self,
        entities: &dyn ContentEntitySource,
    ) -> Result<Vec<EntityValidation>, AppError> {
        let mut results = Vec::with_capacity(3);
        for kind in [ContentKind::Content, ContentKind::Media, ContentKind::Member] {
            results.push(self.data_source.validate_entities(entities, kind).await?);
        }
        Ok(results)
    }
}
