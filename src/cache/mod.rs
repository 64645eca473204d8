//! Generation-versioned content cache.
//!
//! - **Store**: per-id chains of generation-stamped values, read lock-free
//!   through pinned [`Snapshot`]s and mutated by one [`WriteGuard`] at a time
//! - **Events**: inbound change notifications, queued and planned in batches
//! - **Consumer**: applies planned batches through the snapshot service
//!
//! ## Configuration
//!
//! Collection and consumption are controlled via `snapcache.toml`:
//!
//! ```toml
//! [cache]
//! auto_collect = true
//! collect_min_gen_delta = 8
//! consume_batch_limit = 100
//! # ... see config.rs for all options
//! ```

mod chain;
mod config;
mod consumer;
mod error;
mod events;
pub(crate) mod lock;
mod planner;
mod snapshot;
mod store;
mod tree;

pub use chain::LinkedNode;
pub use config::CacheConfig;
pub use consumer::CacheConsumer;
pub use error::StoreError;
pub use events::{ChangeEvent, ContentChange, Epoch, EventQueue};
pub use planner::{NotificationPlan, StorePlan};
pub use snapshot::Snapshot;
pub use store::{ContentStore, WriteGuard};
pub use tree::{LoadReport, SkipReason, SkippedKit};
