//! Notification plan generation.
//!
//! Turns a drained batch of change events into per-store work: either one
//! full reload, or the node changes in delivery order.

use std::collections::HashSet;
use std::fmt;

use crate::domain::{ChangeType, ContentKind};

use super::events::{ChangeEvent, ContentChange};

/// Work for one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorePlan {
    /// A `RefreshAll` was present; every other change in the batch is subsumed.
    ReloadAll,
    /// Node changes in the order they were published.
    Changes(Vec<ContentChange>),
}

impl StorePlan {
    pub fn len(&self) -> usize {
        match self {
            StorePlan::ReloadAll => 1,
            StorePlan::Changes(changes) => changes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-store plans for one consumed batch.
///
/// Removal-before-insert ordering inside a batch is the publisher's
/// responsibility; the plan never reorders changes.
#[derive(Debug, Default)]
pub struct NotificationPlan {
    pub content: Option<StorePlan>,
    pub media: Option<StorePlan>,
    /// Events for kinds that are not cached in memory.
    pub ignored: usize,
    /// Events dropped as exact repeats.
    pub deduplicated: usize,
}

impl fmt::Display for NotificationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn describe(plan: &Option<StorePlan>) -> String {
            match plan {
                None => "none".to_string(),
                Some(StorePlan::ReloadAll) => "reload_all".to_string(),
                Some(StorePlan::Changes(changes)) => format!("{} changes", changes.len()),
            }
        }
        write!(
            f,
            "NotificationPlan {{ content: {}, media: {}, ignored: {}, deduplicated: {} }}",
            describe(&self.content),
            describe(&self.media),
            self.ignored,
            self.deduplicated,
        )
    }
}

impl NotificationPlan {
    /// Merge a batch of events.
    ///
    /// - Deduplicates by event id
    /// - Drops a change identical to the previous change for the same store
    /// - Collapses a store's changes into one reload when any is `RefreshAll`
    pub fn from_events(events: Vec<ChangeEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for event in events {
            if !seen_ids.insert(event.id) {
                plan.deduplicated += 1;
                continue;
            }
            let slot = match event.kind {
                ContentKind::Content => &mut plan.content,
                ContentKind::Media => &mut plan.media,
                ContentKind::Member => {
                    plan.ignored += 1;
                    continue;
                }
            };

            if event.change.change_type == ChangeType::RefreshAll {
                *slot = Some(StorePlan::ReloadAll);
                continue;
            }
            match slot {
                Some(StorePlan::ReloadAll) => plan.deduplicated += 1,
                Some(StorePlan::Changes(changes)) => {
                    if changes.last() == Some(&event.change) {
                        plan.deduplicated += 1;
                    } else {
                        changes.push(event.change);
                    }
                }
                None => *slot = Some(StorePlan::Changes(vec![event.change])),
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.media.is_none()
    }
}
