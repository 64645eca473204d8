//! Generation store.
//!
//! Maps node id to a newest-first chain of per-generation values. Readers
//! pin a generation through a [`Snapshot`] and walk chains without taking the
//! writer lock; the map shard lock is held only long enough to clone a chain
//! head. A single writer at a time mutates through a [`WriteGuard`].
//!
//! Generation bookkeeping: taking the writer lock starts a new live
//! generation only if a snapshot was created since the previous write, so
//! consecutive writes with no reader in between reuse the same generation
//! and replace chain heads in place.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{ContentKind, ContentNode, ROOT_ID};

use super::chain::{LinkedNode, Trimmed, trim};
use super::config::CacheConfig;
use super::lock::mutex_lock;
use super::snapshot::{GenRef, Snapshot};

const SOURCE: &str = "cache::store";
const METRIC_LIVE_GENERATION: &str = "snapcache_live_generation";
const METRIC_COLLECTED_TOTAL: &str = "snapcache_collected_total";

struct GenState {
    live_gen: i64,
    /// True while the live generation has not been observed by a snapshot.
    next_gen: bool,
    locked: bool,
    /// Floor used by the most recent collection.
    collected_floor: i64,
    current: Weak<GenRef>,
    pinned: VecDeque<Weak<GenRef>>,
}

impl GenState {
    /// Oldest generation still pinned by a snapshot, or the live one.
    fn floor(&mut self) -> i64 {
        self.pinned.retain(|pin| pin.strong_count() > 0);
        self.pinned
            .iter()
            .filter_map(Weak::upgrade)
            .map(|pin| pin.generation)
            .min()
            .unwrap_or(self.live_gen)
    }
}

pub struct ContentStore {
    kind: ContentKind,
    config: CacheConfig,
    nodes: DashMap<i32, Arc<LinkedNode>>,
    keys: DashMap<Uuid, i32>,
    writer: AsyncMutex<()>,
    gens: Mutex<GenState>,
}

impl ContentStore {
    pub fn new(kind: ContentKind, config: CacheConfig) -> Self {
        let nodes = DashMap::new();
        nodes.insert(
            ROOT_ID,
            Arc::new(LinkedNode::new(0, Some(Arc::new(ContentNode::root())), None)),
        );
        Self {
            kind,
            config,
            nodes,
            keys: DashMap::new(),
            writer: AsyncMutex::new(()),
            gens: Mutex::new(GenState {
                live_gen: 0,
                next_gen: false,
                locked: false,
                collected_floor: 0,
                current: Weak::new(),
                pinned: VecDeque::new(),
            }),
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Node `id` as of `generation`. The synthetic root is never returned.
    pub fn get(&self, id: i32, generation: i64) -> Option<Arc<ContentNode>> {
        if id == ROOT_ID {
            return None;
        }
        self.value_at(id, generation)
    }

    pub fn get_by_key(&self, uid: Uuid, generation: i64) -> Option<Arc<ContentNode>> {
        let id = *self.keys.get(&uid)?;
        self.get(id, generation).filter(|node| node.uid == uid)
    }

    pub fn get_at_root(&self, generation: i64) -> Vec<Arc<ContentNode>> {
        self.children_of(ROOT_ID, generation)
    }

    /// Children of `id` in sibling order. Empty for leaves and unknown ids.
    pub fn get_children(&self, id: i32, generation: i64) -> Vec<Arc<ContentNode>> {
        self.children_of(id, generation)
    }

    /// Every node visible at `generation`, ordered by id.
    pub fn get_all(&self, generation: i64) -> Vec<Arc<ContentNode>> {
        let heads: Vec<Arc<LinkedNode>> = self
            .nodes
            .iter()
            .filter(|entry| *entry.key() != ROOT_ID)
            .map(|entry| entry.value().clone())
            .collect();
        let mut out: Vec<Arc<ContentNode>> =
            heads.iter().filter_map(|head| head.at(generation)).collect();
        out.sort_by_key(|node| node.id);
        out
    }

    pub fn is_empty(&self, generation: i64) -> bool {
        self.value_at(ROOT_ID, generation)
            .is_none_or(|root| root.first_child_id.is_none())
    }

    /// Number of ids with a value at the head of their chain.
    pub fn count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|entry| *entry.key() != ROOT_ID && entry.value().value().is_some())
            .count()
    }

    pub(crate) fn value_at(&self, id: i32, generation: i64) -> Option<Arc<ContentNode>> {
        let head = self.nodes.get(&id)?.value().clone();
        head.at(generation)
    }

    /// Latest value of `id`, whatever its generation.
    pub(crate) fn head_value(&self, id: i32) -> Option<Arc<ContentNode>> {
        self.nodes.get(&id)?.value().value().cloned()
    }

    pub(crate) fn ids(&self) -> Vec<i32> {
        self.nodes.iter().map(|entry| *entry.key()).collect()
    }

    pub(crate) fn chain_count(&self) -> usize {
        self.nodes.len()
    }

    fn children_of(&self, id: i32, generation: i64) -> Vec<Arc<ContentNode>> {
        let Some(parent) = self.value_at(id, generation) else {
            return Vec::new();
        };

        let limit = self.nodes.len();
        let mut children = Vec::new();
        let mut next = parent.first_child_id;
        while let Some(child_id) = next {
            if children.len() > limit {
                warn!(
                    parent_id = id,
                    generation,
                    "Sibling chain does not terminate, truncating read"
                );
                break;
            }
            let Some(child) = self.value_at(child_id, generation) else {
                warn!(
                    parent_id = id,
                    child_id,
                    generation,
                    "Sibling chain points at a missing node, truncating read"
                );
                break;
            };
            next = child.next_sibling_id;
            children.push(child);
        }
        children
    }

    // ========================================================================
    // Generations and snapshots
    // ========================================================================

    /// Acquire the single writer. Starts a new live generation if the
    /// current one has been observed by a snapshot.
    pub async fn write(&self) -> WriteGuard<'_> {
        let lock = self.writer.lock().await;
        let live_gen = {
            let mut gens = mutex_lock(&self.gens, SOURCE, "write");
            gens.locked = true;
            if !gens.next_gen {
                gens.live_gen += 1;
                gens.next_gen = true;
            }
            gens.live_gen
        };

        gauge!(METRIC_LIVE_GENERATION, "kind" => self.kind.as_str()).set(live_gen as f64);
        debug!(kind = self.kind.as_str(), live_gen, "Store writer acquired");

        WriteGuard {
            store: self,
            live_gen,
            _lock: lock,
        }
    }

    /// Pin the newest complete generation.
    ///
    /// While a writer holds the store, that is the generation before the one
    /// being written. Otherwise it is the live generation, and the next write
    /// will start a new one.
    pub fn create_snapshot(self: &Arc<Self>) -> Snapshot {
        let gen_ref = {
            let mut gens = mutex_lock(&self.gens, SOURCE, "create_snapshot");
            let snap_gen = if gens.locked && gens.next_gen {
                gens.live_gen - 1
            } else {
                gens.live_gen
            };
            if !gens.locked {
                gens.next_gen = false;
            }

            match gens.current.upgrade() {
                Some(current) if current.generation == snap_gen => current,
                _ => {
                    let fresh = Arc::new(GenRef {
                        generation: snap_gen,
                    });
                    gens.current = Arc::downgrade(&fresh);
                    gens.pinned.push_back(Arc::downgrade(&fresh));
                    fresh
                }
            }
        };
        Snapshot::new(Arc::clone(self), gen_ref)
    }

    pub fn live_gen(&self) -> i64 {
        mutex_lock(&self.gens, SOURCE, "live_gen").live_gen
    }

    pub fn floor_gen(&self) -> i64 {
        mutex_lock(&self.gens, SOURCE, "floor_gen").floor()
    }

    /// True while the live generation has not been observed by a snapshot.
    pub fn next_gen(&self) -> bool {
        mutex_lock(&self.gens, SOURCE, "next_gen").next_gen
    }

    /// Number of distinct generations pinned by live snapshots.
    pub fn pinned_count(&self) -> usize {
        let mut gens = mutex_lock(&self.gens, SOURCE, "pinned_count");
        gens.floor();
        gens.pinned.len()
    }

    /// Full history of `id`, newest first.
    pub fn chain(&self, id: i32) -> Vec<(i64, Option<Arc<ContentNode>>)> {
        self.nodes
            .get(&id)
            .map(|head| head.value().entries())
            .unwrap_or_default()
    }

    /// Trim history no pinned generation can observe. Waits for the writer.
    ///
    /// Returns the number of chain entries dropped.
    pub async fn collect(&self) -> usize {
        let _lock = self.writer.lock().await;
        self.collect_locked()
    }

    fn collect_locked(&self) -> usize {
        let floor = {
            let mut gens = mutex_lock(&self.gens, SOURCE, "collect");
            let floor = gens.floor();
            gens.collected_floor = floor;
            floor
        };
        let mut dropped = 0;
        let mut removed = HashSet::new();

        self.nodes.retain(|id, link| match trim(link, floor) {
            Trimmed::Unchanged => true,
            Trimmed::Replaced { head, dropped: count } => {
                *link = head;
                dropped += count;
                true
            }
            Trimmed::Removed { dropped: count } => {
                dropped += count;
                removed.insert(*id);
                false
            }
        });
        if !removed.is_empty() {
            self.keys.retain(|_, id| !removed.contains(id));
        }

        if dropped > 0 {
            counter!(METRIC_COLLECTED_TOTAL, "kind" => self.kind.as_str()).increment(dropped as u64);
        }
        debug!(
            kind = self.kind.as_str(),
            floor,
            dropped,
            removed = removed.len(),
            "Collected store generations"
        );
        dropped
    }

    // ========================================================================
    // Writer primitives
    // ========================================================================

    /// Record `value` for `id` at `live_gen`, copy-on-write.
    ///
    /// An equal value is not rewritten. A head already at `live_gen` is
    /// replaced in place since no snapshot can observe it yet, and is dropped
    /// when the new value equals the entry it superseded.
    pub(crate) fn set_value(&self, id: i32, value: Option<Arc<ContentNode>>, live_gen: i64) {
        match self.nodes.entry(id) {
            Entry::Occupied(mut entry) => {
                let head = Arc::clone(entry.get());
                if same_value(head.value(), value.as_ref()) {
                    return;
                }

                if head.generation() == live_gen {
                    match head.next() {
                        Some(previous) if same_value(previous.value(), value.as_ref()) => {
                            entry.insert(Arc::clone(previous));
                        }
                        None if value.is_none() => {
                            entry.remove();
                            if let Some(replaced) = head.value() {
                                self.keys.remove_if(&replaced.uid, |_, mapped| *mapped == id);
                            }
                            return;
                        }
                        previous => {
                            entry.insert(Arc::new(LinkedNode::new(
                                live_gen,
                                value.clone(),
                                previous.cloned(),
                            )));
                        }
                    }
                } else {
                    entry.insert(Arc::new(LinkedNode::new(live_gen, value.clone(), Some(head))));
                }
            }
            Entry::Vacant(entry) => {
                if value.is_none() {
                    return;
                }
                entry.insert(Arc::new(LinkedNode::new(live_gen, value.clone(), None)));
            }
        }

        if let Some(node) = value {
            self.keys.insert(node.uid, id);
        }
    }

    fn release_writer(&self) {
        let (live_gen, collected_floor) = {
            let mut gens = mutex_lock(&self.gens, SOURCE, "release_writer");
            gens.locked = false;
            (gens.live_gen, gens.collected_floor)
        };
        if self.config.auto_collect
            && live_gen - collected_floor > self.config.collect_min_gen_delta
        {
            self.collect_locked();
        }
    }
}

fn same_value(current: Option<&Arc<ContentNode>>, new: Option<&Arc<ContentNode>>) -> bool {
    match (current, new) {
        (None, None) => true,
        (Some(current), Some(new)) => Arc::ptr_eq(current, new) || current == new,
        _ => false,
    }
}

/// Exclusive write access to a [`ContentStore`]. Structural operations live
/// in the `tree` module.
pub struct WriteGuard<'a> {
    pub(super) store: &'a ContentStore,
    pub(super) live_gen: i64,
    _lock: AsyncMutexGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        // the async lock is still held until the fields drop
        self.store.release_writer();
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn node(id: i32, name: &str) -> Arc<ContentNode> {
        let mut node = ContentNode::new(
            id,
            Uuid::from_u128(id as u128),
            1,
            1,
            format!("-1,{id}"),
            0,
            ROOT_ID,
            OffsetDateTime::UNIX_EPOCH,
            0,
        );
        node.path = format!("{}:{name}", node.path);
        Arc::new(node)
    }

    fn store() -> Arc<ContentStore> {
        Arc::new(ContentStore::new(ContentKind::Content, CacheConfig::default()))
    }

    #[tokio::test]
    async fn first_write_builds_generation_one() {
        let store = store();
        assert_eq!(store.live_gen(), 0);
        assert!(!store.next_gen());

        let guard = store.write().await;
        assert_eq!(guard.live_gen, 1);
        drop(guard);

        assert_eq!(store.live_gen(), 1);
        assert!(store.next_gen());
    }

    #[tokio::test]
    async fn writes_without_snapshot_share_a_generation() {
        let store = store();
        {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, "a")), guard.live_gen);
        }
        {
            let guard = store.write().await;
            assert_eq!(guard.live_gen, 1);
            store.set_value(1, Some(node(1, "b")), guard.live_gen);
        }

        let chain = store.chain(1);
        assert_eq!(chain.len(), 1);
        assert!(chain[0].1.as_ref().unwrap().path.ends_with(":b"));
    }

    #[tokio::test]
    async fn snapshot_forces_new_chain_head() {
        let store = store();
        {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, "a")), guard.live_gen);
        }
        let snapshot = store.create_snapshot();
        assert_eq!(snapshot.generation(), 1);
        assert!(!store.next_gen());

        {
            let guard = store.write().await;
            assert_eq!(guard.live_gen, 2);
            store.set_value(1, Some(node(1, "b")), guard.live_gen);
        }

        assert_eq!(store.chain(1).len(), 2);
        assert!(snapshot.get(1).unwrap().path.ends_with(":a"));
        assert!(store.get(1, 2).unwrap().path.ends_with(":b"));
    }

    #[tokio::test]
    async fn snapshot_taken_during_write_sees_previous_generation() {
        let store = store();
        {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, "a")), guard.live_gen);
        }
        let _first = store.create_snapshot();

        let guard = store.write().await;
        store.set_value(1, Some(node(1, "b")), guard.live_gen);
        let during = store.create_snapshot();
        assert_eq!(during.generation(), 1);
        assert!(during.get(1).unwrap().path.ends_with(":a"));
        drop(guard);

        // still unobserved, so the next write keeps generation 2
        assert!(store.next_gen());
    }

    #[tokio::test]
    async fn repeated_snapshots_share_a_pin() {
        let store = store();
        drop(store.write().await);
        let a = store.create_snapshot();
        let b = store.create_snapshot();
        assert_eq!(a.generation(), b.generation());
        assert_eq!(store.pinned_count(), 1);

        drop(a);
        drop(b);
        assert_eq!(store.pinned_count(), 0);
    }

    #[tokio::test]
    async fn setting_equal_value_is_a_no_op() {
        let store = store();
        {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, "a")), guard.live_gen);
        }
        let _snapshot = store.create_snapshot();
        {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, "a")), guard.live_gen);
        }
        assert_eq!(store.chain(1).len(), 1);
    }

    #[tokio::test]
    async fn write_reverted_within_a_generation_keeps_the_old_entry() {
        let store = store();
        let original = node(1, "a");
        {
            let guard = store.write().await;
            store.set_value(1, Some(original.clone()), guard.live_gen);
        }
        let _pinned = store.create_snapshot();

        let guard = store.write().await;
        store.set_value(1, None, guard.live_gen);
        store.set_value(1, Some(node(1, "b")), guard.live_gen);
        store.set_value(1, Some(node(1, "a")), guard.live_gen);
        drop(guard);

        let chain = store.chain(1);
        assert_eq!(chain.len(), 1);
        assert!(Arc::ptr_eq(chain[0].1.as_ref().unwrap(), &original));
        assert!(store.get_by_key(Uuid::from_u128(1), 2).is_some());
    }

    #[tokio::test]
    async fn tombstone_of_unobserved_value_removes_the_key() {
        let store = store();
        let guard = store.write().await;
        store.set_value(1, Some(node(1, "a")), guard.live_gen);
        store.set_value(1, None, guard.live_gen);
        drop(guard);

        assert!(store.chain(1).is_empty());
        assert!(store.get_by_key(Uuid::from_u128(1), 1).is_none());
    }

    #[tokio::test]
    async fn collect_trims_unpinned_history() {
        let store = Arc::new(ContentStore::new(
            ContentKind::Content,
            CacheConfig {
                auto_collect: false,
                ..Default::default()
            },
        ));
        for name in ["a", "b", "c", "d"] {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, name)), guard.live_gen);
            drop(guard);
            drop(store.create_snapshot());
        }
        assert_eq!(store.chain(1).len(), 4);

        let pinned = store.create_snapshot();
        assert_eq!(store.floor_gen(), 4);
        assert_eq!(store.collect().await, 3);
        assert_eq!(store.chain(1).len(), 1);
        assert!(pinned.get(1).unwrap().path.ends_with(":d"));
    }

    #[tokio::test]
    async fn collect_keeps_what_old_snapshots_see() {
        let store = Arc::new(ContentStore::new(
            ContentKind::Content,
            CacheConfig {
                auto_collect: false,
                ..Default::default()
            },
        ));
        {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, "a")), guard.live_gen);
        }
        let old = store.create_snapshot();
        for name in ["b", "c"] {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, name)), guard.live_gen);
            drop(guard);
            drop(store.create_snapshot());
        }

        assert_eq!(store.collect().await, 0);
        assert!(old.get(1).unwrap().path.ends_with(":a"));

        drop(old);
        assert_eq!(store.collect().await, 2);
        assert_eq!(store.chain(1).len(), 1);
    }

    #[tokio::test]
    async fn collect_removes_dead_tombstones() {
        let store = Arc::new(ContentStore::new(
            ContentKind::Content,
            CacheConfig {
                auto_collect: false,
                ..Default::default()
            },
        ));
        {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, "a")), guard.live_gen);
        }
        drop(store.create_snapshot());
        {
            let guard = store.write().await;
            store.set_value(1, None, guard.live_gen);
        }
        assert_eq!(store.chain(1).len(), 2);

        assert_eq!(store.collect().await, 2);
        assert!(store.chain(1).is_empty());
        assert!(store.get_by_key(Uuid::from_u128(1), 2).is_none());
    }

    #[tokio::test]
    async fn auto_collect_runs_past_min_delta() {
        let store = Arc::new(ContentStore::new(
            ContentKind::Content,
            CacheConfig {
                collect_min_gen_delta: 2,
                ..Default::default()
            },
        ));
        let old = store.create_snapshot();
        assert_eq!(old.generation(), 0);

        for name in ["a", "b", "c", "d"] {
            let guard = store.write().await;
            store.set_value(1, Some(node(1, name)), guard.live_gen);
            drop(guard);
            drop(store.create_snapshot());
        }
        assert_eq!(store.chain(1).len(), 4);

        drop(old);
        drop(store.write().await);
        assert_eq!(store.chain(1).len(), 1);
    }
}
