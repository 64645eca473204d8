//! Cache consumer: drains queued change events into the stores.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::snapshot_service::{BatchReport, PublishedSnapshotService};

use super::config::CacheConfig;
use super::events::EventQueue;
use super::planner::NotificationPlan;

const METRIC_CONSUME_MS: &str = "snapcache_consume_ms";

/// Drains the event queue in batches. Each batch:
/// 1. Is merged into a [`NotificationPlan`]
/// 2. Is applied per store under one write lock
pub struct CacheConsumer {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    service: Arc<PublishedSnapshotService>,
}

impl CacheConsumer {
    pub fn new(
        config: CacheConfig,
        queue: Arc<EventQueue>,
        service: Arc<PublishedSnapshotService>,
    ) -> Self {
        Self {
            config,
            queue,
            service,
        }
    }

    /// Consume one batch of pending events.
    ///
    /// Returns the per-store reports, empty if nothing was queued.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> Result<Vec<BatchReport>, AppError> {
        let started_at = Instant::now();
        let events = self.queue.drain(self.config.batch_limit());
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = NotificationPlan::from_events(events);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache consumption starting"
        );

        let reports = self.service.apply_plan(&plan).await?;

        info!(
            event_count,
            stores = reports.len(),
            failed = reports.iter().map(|r| r.failed.len()).sum::<usize>(),
            "Cache consumption complete"
        );
        histogram!(METRIC_CONSUME_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(reports)
    }

    /// Consume until the queue is empty.
    pub async fn consume_all(&self) -> Result<Vec<BatchReport>, AppError> {
        let mut reports = Vec::new();
        while !self.queue.is_empty() {
            reports.extend(self.consume().await?);
        }
        Ok(reports)
    }

    /// Consume on a fixed interval until the handle is aborted.
    pub fn spawn_auto_consume(self: Arc<Self>) -> JoinHandle<()> {
        let interval_ms = self.config.auto_consume_interval_ms.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                match self.consume().await {
                    Ok(reports) if reports.is_empty() => debug!("No queued change events"),
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "Cache consumption failed"),
                }
            }
        })
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn service(&self) -> &Arc<PublishedSnapshotService> {
        &self.service
    }
}
