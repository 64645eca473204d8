//! Structural mutations of a [`ContentStore`] under its writer lock.
//!
//! Each operation first resolves every link it will touch, reading through
//! the edits it has planned so far, and only then writes. A rejected
//! operation leaves the tree exactly as it was. The moved or inserted node
//! is written before the neighbours that start pointing at it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::domain::{ContentNode, ContentNodeKit, ROOT_ID};

use super::error::StoreError;
use super::store::WriteGuard;

/// Why a kit was left out of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyKit,
    MissingParent { parent_id: i32 },
    Duplicate,
    ReservedId,
    Rejected { detail: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyKit => f.write_str("kit has neither draft nor published data"),
            SkipReason::MissingParent { parent_id } => write!(f, "parent {parent_id} is not loaded"),
            SkipReason::Duplicate => f.write_str("id appears more than once"),
            SkipReason::ReservedId => f.write_str("id is reserved for the tree root"),
            SkipReason::Rejected { detail } => f.write_str(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedKit {
    pub id: i32,
    pub reason: SkipReason,
}

/// Outcome of a bulk or branch load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<SkippedKit>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, id: i32, reason: SkipReason) {
        warn!(id, reason = %reason, "Skipped kit while loading store");
        self.skipped.push(SkippedKit { id, reason });
    }
}

/// Planned neighbour rewrites, applied only once the whole plan is valid.
#[derive(Debug, Clone, Default)]
struct Relink {
    edits: Vec<ContentNode>,
}

impl Relink {
    fn edit(&mut self, node: &ContentNode) -> &mut ContentNode {
        let index = match self.edits.iter().position(|edit| edit.id == node.id) {
            Some(index) => index,
            None => {
                self.edits.push(node.clone());
                self.edits.len() - 1
            }
        };
        &mut self.edits[index]
    }

    fn get(&self, id: i32) -> Option<&ContentNode> {
        self.edits.iter().find(|edit| edit.id == id)
    }

    fn ids(&self) -> Vec<i32> {
        self.edits.iter().map(|edit| edit.id).collect()
    }
}

impl WriteGuard<'_> {
    pub fn live_gen(&self) -> i64 {
        self.live_gen
    }

    /// Latest value of `id`, including writes made through this guard.
    pub fn get(&self, id: i32) -> Option<Arc<ContentNode>> {
        if id == ROOT_ID {
            return None;
        }
        self.store.head_value(id)
    }

    // ========================================================================
    // Single node
    // ========================================================================

    /// Insert or replace the node carried by `kit`.
    ///
    /// A node that keeps its parent and sort order keeps its links. A node
    /// that moves is unlinked and re-inserted among its new siblings,
    /// bringing its children along.
    pub fn set(&self, kit: &ContentNodeKit) -> Result<(), StoreError> {
        self.set_node(kit.build())
    }

    fn set_node(&self, mut node: ContentNode) -> Result<(), StoreError> {
        const OP: &str = "set";
        if node.id == ROOT_ID {
            return Err(StoreError::ReservedId { id: node.id });
        }
        if !node.has_data() {
            return Err(StoreError::EmptyKit { id: node.id });
        }

        let mut relink = Relink::default();
        match self.store.head_value(node.id) {
            Some(existing)
                if existing.parent_id == node.parent_id
                    && existing.sort_order == node.sort_order =>
            {
                node.previous_sibling_id = existing.previous_sibling_id;
                node.next_sibling_id = existing.next_sibling_id;
                node.first_child_id = existing.first_child_id;
                node.last_child_id = existing.last_child_id;
            }
            Some(existing) => {
                node.first_child_id = existing.first_child_id;
                node.last_child_id = existing.last_child_id;
                self.check_not_own_ancestor(OP, &node)?;
                self.plan_unlink(OP, &existing, &mut relink)?;
                self.plan_link(OP, &mut node, &mut relink)?;
            }
            None => self.plan_link(OP, &mut node, &mut relink)?,
        }

        debug!(
            id = node.id,
            parent_id = node.parent_id,
            sort_order = node.sort_order,
            relinked = ?relink.ids(),
            live_gen = self.live_gen,
            "Set node"
        );
        self.put(node);
        self.apply(relink);
        Ok(())
    }

    /// Remove `id` and its whole subtree. Returns false if `id` is unknown.
    pub fn clear(&self, id: i32) -> Result<bool, StoreError> {
        const OP: &str = "clear";
        if id == ROOT_ID {
            return Err(StoreError::ReservedId { id });
        }
        let Some(existing) = self.store.head_value(id) else {
            return Ok(false);
        };

        let mut relink = Relink::default();
        self.plan_unlink(OP, &existing, &mut relink)?;
        let descendants = self.descendants(OP, &existing)?;

        debug!(
            id,
            descendants = descendants.len(),
            relinked = ?relink.ids(),
            live_gen = self.live_gen,
            "Clear node"
        );
        self.apply(relink);
        for descendant in descendants {
            self.tombstone(descendant);
        }
        self.tombstone(id);
        Ok(true)
    }

    // ========================================================================
    // Branch
    // ========================================================================

    /// Replace the subtree rooted at `root_id` with `kits`.
    ///
    /// `kits` must list parents before children. If no kit carries
    /// `root_id`, the branch is removed. Kits whose parent cannot be found
    /// are skipped and reported.
    pub fn set_branch(&self, root_id: i32, kits: &[ContentNodeKit]) -> Result<LoadReport, StoreError> {
        const OP: &str = "set_branch";
        if root_id == ROOT_ID {
            return Err(StoreError::ReservedId { id: root_id });
        }

        let existing = self.store.head_value(root_id);
        let mut relink = Relink::default();
        let mut cleared = Vec::new();
        if let Some(existing) = &existing {
            self.plan_unlink(OP, existing, &mut relink)?;
            cleared = self.descendants(OP, existing)?;
        }

        if let Some(root_kit) = kits.iter().find(|kit| kit.node.id == root_id) {
            let mut candidate = root_kit.build();
            let parent_id = candidate.parent_id;
            if parent_id == root_id || cleared.contains(&parent_id) {
                return Err(self.corrupt(
                    OP,
                    &candidate,
                    format!("branch root would be attached under its own subtree at {parent_id}"),
                ));
            }
            self.check_not_own_ancestor(OP, &candidate)?;
            self.plan_link(OP, &mut candidate, &mut relink.clone())?;
        }

        self.apply(relink);
        for id in &cleared {
            self.tombstone(*id);
        }
        if existing.is_some() {
            self.tombstone(root_id);
        }

        let mut report = LoadReport::default();
        for kit in kits {
            let id = kit.node.id;
            if id == ROOT_ID {
                report.skip(id, SkipReason::ReservedId);
                continue;
            }
            if kit.is_empty() {
                report.skip(id, SkipReason::EmptyKit);
                continue;
            }
            let parent_id = kit.node.parent_id;
            if parent_id != ROOT_ID && self.store.head_value(parent_id).is_none() {
                report.skip(id, SkipReason::MissingParent { parent_id });
                continue;
            }
            match self.set(kit) {
                Ok(()) => report.loaded += 1,
                Err(err) => report.skip(
                    id,
                    SkipReason::Rejected {
                        detail: err.to_string(),
                    },
                ),
            }
        }

        debug!(
            root_id,
            cleared = cleared.len(),
            loaded = report.loaded,
            skipped = report.skipped.len(),
            live_gen = self.live_gen,
            "Set branch"
        );
        Ok(report)
    }

    // ========================================================================
    // Whole tree
    // ========================================================================

    /// Tombstone every node and detach everything from the root.
    pub fn clear_all(&self) {
        for id in self.store.ids() {
            if id != ROOT_ID {
                self.tombstone(id);
            }
        }
        self.reset_root();
    }

    /// Replace the whole tree from kits ordered by (level, parent id, sort order).
    ///
    /// Links are wired in one pass in the order given, without sibling scans.
    pub fn set_all_fast_sorted<I>(&self, kits: I) -> LoadReport
    where
        I: IntoIterator<Item = ContentNodeKit>,
    {
        self.clear_all();

        let mut report = LoadReport::default();
        let mut staged: HashMap<i32, ContentNode> = HashMap::new();
        let mut order: Vec<i32> = Vec::new();
        let mut root = ContentNode::root();
        root.clear_links();
        staged.insert(ROOT_ID, root);

        for kit in kits {
            let id = kit.node.id;
            if id == ROOT_ID {
                report.skip(id, SkipReason::ReservedId);
                continue;
            }
            if kit.is_empty() {
                report.skip(id, SkipReason::EmptyKit);
                continue;
            }
            if staged.contains_key(&id) {
                report.skip(id, SkipReason::Duplicate);
                continue;
            }
            let parent_id = kit.node.parent_id;
            let Some(last_child) = staged.get(&parent_id).map(|parent| parent.last_child_id) else {
                report.skip(id, SkipReason::MissingParent { parent_id });
                continue;
            };

            let mut node = kit.into_node();
            if let Some(last_id) = last_child {
                if let Some(last) = staged.get_mut(&last_id) {
                    if last.sort_order > node.sort_order {
                        warn!(
                            id,
                            parent_id,
                            previous_id = last_id,
                            "Kits are not ordered by sort order, sibling order follows input"
                        );
                    }
                    last.next_sibling_id = Some(id);
                }
                node.previous_sibling_id = Some(last_id);
            }
            if let Some(parent) = staged.get_mut(&parent_id) {
                if parent.first_child_id.is_none() {
                    parent.first_child_id = Some(id);
                }
                parent.last_child_id = Some(id);
            }
            staged.insert(id, node);
            order.push(id);
            report.loaded += 1;
        }

        if let Some(root) = staged.remove(&ROOT_ID) {
            self.put(root);
        }
        for id in order {
            if let Some(node) = staged.remove(&id) {
                self.put(node);
            }
        }

        info!(
            kind = self.store.kind().as_str(),
            loaded = report.loaded,
            skipped = report.skipped.len(),
            live_gen = self.live_gen,
            "Loaded store from sorted kits"
        );
        report
    }

    /// Replace the whole tree from kits in any sibling order. Parents must
    /// still precede their children.
    pub fn set_all<I>(&self, kits: I) -> LoadReport
    where
        I: IntoIterator<Item = ContentNodeKit>,
    {
        const OP: &str = "set_all";
        self.clear_all();

        let mut report = LoadReport::default();
        let mut seen = HashSet::new();
        for kit in kits {
            let id = kit.node.id;
            if id == ROOT_ID {
                report.skip(id, SkipReason::ReservedId);
                continue;
            }
            if kit.is_empty() {
                report.skip(id, SkipReason::EmptyKit);
                continue;
            }
            if !seen.insert(id) {
                report.skip(id, SkipReason::Duplicate);
                continue;
            }
            let parent_id = kit.node.parent_id;
            if parent_id != ROOT_ID && self.store.head_value(parent_id).is_none() {
                report.skip(id, SkipReason::MissingParent { parent_id });
                continue;
            }

            let mut node = kit.into_node();
            let mut relink = Relink::default();
            if let Err(err) = self.plan_link(OP, &mut node, &mut relink) {
                report.skip(
                    id,
                    SkipReason::Rejected {
                        detail: err.to_string(),
                    },
                );
                continue;
            }
            self.put(node);
            self.apply(relink);
            report.loaded += 1;
        }

        info!(
            kind = self.store.kind().as_str(),
            loaded = report.loaded,
            skipped = report.skipped.len(),
            live_gen = self.live_gen,
            "Loaded store from unsorted kits"
        );
        report
    }

    // ========================================================================
    // Planning
    // ========================================================================

    fn resolve(&self, relink: &Relink, id: i32) -> Option<Arc<ContentNode>> {
        match relink.get(id) {
            Some(edited) => Some(Arc::new(edited.clone())),
            None => self.store.head_value(id),
        }
    }

    fn required(
        &self,
        op: &'static str,
        subject: &ContentNode,
        relink: &Relink,
        id: i32,
        role: &str,
    ) -> Result<Arc<ContentNode>, StoreError> {
        self.resolve(relink, id)
            .ok_or_else(|| self.corrupt(op, subject, format!("{role} {id} does not exist")))
    }

    /// Detach `node` from its sibling list and its parent's child pointers.
    fn plan_unlink(
        &self,
        op: &'static str,
        node: &ContentNode,
        relink: &mut Relink,
    ) -> Result<(), StoreError> {
        let parent = self.required(op, node, relink, node.parent_id, "parent")?;

        let previous = match node.previous_sibling_id {
            Some(previous_id) => {
                let previous = self.required(op, node, relink, previous_id, "previous sibling")?;
                if previous.next_sibling_id != Some(node.id) {
                    return Err(self.corrupt(
                        op,
                        node,
                        format!(
                            "previous sibling {previous_id} links forward to {:?}",
                            previous.next_sibling_id
                        ),
                    ));
                }
                Some(previous)
            }
            None if parent.first_child_id != Some(node.id) => {
                return Err(self.corrupt(
                    op,
                    node,
                    format!(
                        "node has no previous sibling but parent's first child is {:?}",
                        parent.first_child_id
                    ),
                ));
            }
            None => None,
        };

        let next = match node.next_sibling_id {
            Some(next_id) => {
                let next = self.required(op, node, relink, next_id, "next sibling")?;
                if next.previous_sibling_id != Some(node.id) {
                    return Err(self.corrupt(
                        op,
                        node,
                        format!(
                            "next sibling {next_id} links back to {:?}",
                            next.previous_sibling_id
                        ),
                    ));
                }
                Some(next)
            }
            None if parent.last_child_id != Some(node.id) => {
                return Err(self.corrupt(
                    op,
                    node,
                    format!(
                        "node has no next sibling but parent's last child is {:?}",
                        parent.last_child_id
                    ),
                ));
            }
            None => None,
        };

        if let Some(previous) = previous {
            relink.edit(&previous).next_sibling_id = node.next_sibling_id;
        }
        if let Some(next) = next {
            relink.edit(&next).previous_sibling_id = node.previous_sibling_id;
        }
        if parent.first_child_id == Some(node.id) {
            relink.edit(&parent).first_child_id = node.next_sibling_id;
        }
        if parent.last_child_id == Some(node.id) {
            relink.edit(&parent).last_child_id = node.previous_sibling_id;
        }
        Ok(())
    }

    /// Place `node` among its parent's children by sort order. The node goes
    /// before the first sibling whose sort order is not lower than its own.
    fn plan_link(
        &self,
        op: &'static str,
        node: &mut ContentNode,
        relink: &mut Relink,
    ) -> Result<(), StoreError> {
        node.previous_sibling_id = None;
        node.next_sibling_id = None;
        let parent = self.required(op, node, relink, node.parent_id, "parent")?;

        let (first_id, last_id) = match (parent.first_child_id, parent.last_child_id) {
            (Some(first_id), Some(last_id)) => (first_id, last_id),
            (None, None) => {
                let parent = relink.edit(&parent);
                parent.first_child_id = Some(node.id);
                parent.last_child_id = Some(node.id);
                return Ok(());
            }
            (first, last) => {
                return Err(self.corrupt(
                    op,
                    node,
                    format!(
                        "parent {} has first child {first:?} but last child {last:?}",
                        parent.id
                    ),
                ));
            }
        };

        let last = self.required(op, node, relink, last_id, "last child")?;
        if last.sort_order < node.sort_order {
            node.previous_sibling_id = Some(last_id);
            relink.edit(&last).next_sibling_id = Some(node.id);
            relink.edit(&parent).last_child_id = Some(node.id);
            return Ok(());
        }

        let limit = self.store.chain_count();
        let mut previous: Option<Arc<ContentNode>> = None;
        let mut cursor = self.required(op, node, relink, first_id, "first child")?;
        for _ in 0..=limit {
            if cursor.sort_order >= node.sort_order {
                node.next_sibling_id = Some(cursor.id);
                relink.edit(&cursor).previous_sibling_id = Some(node.id);
                match previous {
                    Some(previous) => {
                        node.previous_sibling_id = Some(previous.id);
                        relink.edit(&previous).next_sibling_id = Some(node.id);
                    }
                    None => relink.edit(&parent).first_child_id = Some(node.id),
                }
                return Ok(());
            }
            let Some(next_id) = cursor.next_sibling_id else {
                return Err(self.corrupt(
                    op,
                    node,
                    format!(
                        "children of {} end at {} before reaching last child {last_id}",
                        parent.id, cursor.id
                    ),
                ));
            };
            let next = self.required(op, node, relink, next_id, "next sibling")?;
            previous = Some(cursor);
            cursor = next;
        }

        Err(self.corrupt(
            op,
            node,
            format!("children of {} form a cycle", parent.id),
        ))
    }

    /// All ids below `node`, checked for existence and back-links.
    fn descendants(&self, op: &'static str, node: &ContentNode) -> Result<Vec<i32>, StoreError> {
        let empty = Relink::default();
        let limit = self.store.chain_count();
        let mut out = Vec::new();
        let mut pending = vec![node.first_child_id];

        while let Some(mut next) = pending.pop() {
            while let Some(child_id) = next {
                if out.len() > limit {
                    return Err(self.corrupt(op, node, "subtree forms a cycle".to_string()));
                }
                let child = self.required(op, node, &empty, child_id, "descendant")?;
                if child.parent_id == node.id || out.contains(&child.parent_id) {
                    out.push(child_id);
                    pending.push(child.first_child_id);
                    next = child.next_sibling_id;
                } else {
                    return Err(self.corrupt(
                        op,
                        node,
                        format!(
                            "descendant {child_id} names parent {} outside the subtree",
                            child.parent_id
                        ),
                    ));
                }
            }
        }
        Ok(out)
    }

    /// A node cannot be placed under itself or one of its descendants.
    fn check_not_own_ancestor(&self, op: &'static str, node: &ContentNode) -> Result<(), StoreError> {
        let limit = self.store.chain_count();
        let mut ancestor = node.parent_id;
        for _ in 0..=limit {
            if ancestor == ROOT_ID {
                return Ok(());
            }
            if ancestor == node.id {
                return Err(self.corrupt(
                    op,
                    node,
                    "node would become its own ancestor".to_string(),
                ));
            }
            let Some(parent) = self.store.head_value(ancestor) else {
                return Err(self.corrupt(op, node, format!("ancestor {ancestor} does not exist")));
            };
            ancestor = parent.parent_id;
        }
        Err(self.corrupt(op, node, "ancestor chain forms a cycle".to_string()))
    }

    fn corrupt(&self, op: &'static str, node: &ContentNode, detail: String) -> StoreError {
        error!(
            op,
            kind = self.store.kind().as_str(),
            id = node.id,
            parent_id = node.parent_id,
            previous_sibling_id = ?node.previous_sibling_id,
            next_sibling_id = ?node.next_sibling_id,
            first_child_id = ?node.first_child_id,
            last_child_id = ?node.last_child_id,
            live_gen = self.live_gen,
            detail = detail.as_str(),
            "Referential corruption, mutation aborted"
        );
        StoreError::corruption(op, node.id, detail)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn put(&self, node: ContentNode) {
        self.store
            .set_value(node.id, Some(Arc::new(node)), self.live_gen);
    }

    fn tombstone(&self, id: i32) {
        self.store.set_value(id, None, self.live_gen);
    }

    fn apply(&self, relink: Relink) {
        for node in relink.edits {
            self.put(node);
        }
    }

    fn reset_root(&self) {
        let mut root = ContentNode::root();
        root.clear_links();
        self.put(root);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::store::ContentStore;
    use crate::domain::{ContentData, ContentKind};

    fn data(name: &str) -> ContentData {
        ContentData {
            name: name.to_string(),
            url_segment: None,
            version_id: 1,
            version_date: OffsetDateTime::UNIX_EPOCH,
            writer_id: 0,
            template_id: None,
            published: true,
            properties: BTreeMap::new(),
            culture_infos: None,
        }
    }

    fn kit(id: i32, parent_id: i32, sort_order: i32, name: &str) -> ContentNodeKit {
        ContentNodeKit {
            node: ContentNode::new(
                id,
                Uuid::from_u128(id as u128),
                1,
                1,
                format!("-1,{id}"),
                sort_order,
                parent_id,
                OffsetDateTime::UNIX_EPOCH,
                0,
            ),
            content_type_id: 1,
            draft_data: None,
            published_data: Some(data(name)),
        }
    }

    fn store() -> Arc<ContentStore> {
        Arc::new(ContentStore::new(
            ContentKind::Content,
            CacheConfig {
                auto_collect: false,
                ..Default::default()
            },
        ))
    }

    fn child_ids(store: &ContentStore, id: i32, generation: i64) -> Vec<i32> {
        store
            .get_children(id, generation)
            .iter()
            .map(|node| node.id)
            .collect()
    }

    fn name_of(node: &ContentNode) -> &str {
        &node.published_data.as_ref().unwrap().name
    }

    #[tokio::test]
    async fn siblings_follow_sort_order_whatever_the_insert_order() {
        let store = store();
        let guard = store.write().await;
        guard.set(&kit(10, ROOT_ID, 0, "P")).unwrap();
        guard.set(&kit(3, 10, 3, "C")).unwrap();
        guard.set(&kit(1, 10, 1, "A")).unwrap();
        guard.set(&kit(2, 10, 2, "B")).unwrap();
        let live = guard.live_gen();
        drop(guard);

        assert_eq!(child_ids(&store, 10, live), vec![1, 2, 3]);
        let parent = store.get(10, live).unwrap();
        assert_eq!(parent.first_child_id, Some(1));
        assert_eq!(parent.last_child_id, Some(3));
        let middle = store.get(2, live).unwrap();
        assert_eq!(middle.previous_sibling_id, Some(1));
        assert_eq!(middle.next_sibling_id, Some(3));
    }

    #[tokio::test]
    async fn reorder_touches_only_neighbours_and_parent() {
        let store = store();
        {
            let guard = store.write().await;
            guard.set(&kit(10, ROOT_ID, 0, "P")).unwrap();
            for (id, sort) in [(1, 1), (2, 2), (3, 3)] {
                guard.set(&kit(id, 10, sort, "x")).unwrap();
            }
        }
        let before = store.create_snapshot();
        let root_history = store.chain(ROOT_ID).len();

        let guard = store.write().await;
        guard.set(&kit(2, 10, 1, "x")).unwrap();
        let live = guard.live_gen();
        drop(guard);

        assert_eq!(child_ids(&store, 10, live), vec![2, 1, 3]);
        assert_eq!(child_ids(&store, 10, before.generation()), vec![1, 2, 3]);
        for id in [10, 1, 2, 3] {
            assert_eq!(store.chain(id).len(), 2, "node {id} gets one new head");
        }
        assert_eq!(store.chain(ROOT_ID).len(), root_history);

        let a = store.get(1, live).unwrap();
        assert_eq!(a.previous_sibling_id, Some(2));
        assert_eq!(a.next_sibling_id, Some(3));
        let c = store.get(3, live).unwrap();
        assert_eq!(c.previous_sibling_id, Some(1));
        assert_eq!(c.next_sibling_id, None);
    }

    #[tokio::test]
    async fn refresh_in_place_keeps_links_and_old_snapshot() {
        let store = store();
        {
            let guard = store.write().await;
            guard.set(&kit(4, ROOT_ID, 0, "W")).unwrap();
            guard.set(&kit(5, ROOT_ID, 1, "X")).unwrap();
            guard.set(&kit(50, 5, 0, "child")).unwrap();
        }
        let before = store.create_snapshot();

        let guard = store.write().await;
        guard.set(&kit(5, ROOT_ID, 1, "Y")).unwrap();
        let live = guard.live_gen();
        drop(guard);
        let after = store.create_snapshot();

        assert_eq!(name_of(&before.get(5).unwrap()), "X");
        assert_eq!(name_of(&after.get(5).unwrap()), "Y");
        assert_eq!(after.generation(), live);

        let refreshed = after.get(5).unwrap();
        assert_eq!(refreshed.previous_sibling_id, Some(4));
        assert_eq!(refreshed.first_child_id, Some(50));
        assert_eq!(store.chain(4).len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_the_whole_subtree() {
        let store = store();
        {
            let guard = store.write().await;
            guard.set(&kit(2, ROOT_ID, 0, "before")).unwrap();
            guard.set(&kit(3, ROOT_ID, 1, "parent")).unwrap();
            guard.set(&kit(30, 3, 0, "a")).unwrap();
            guard.set(&kit(31, 3, 1, "b")).unwrap();
            guard.set(&kit(300, 30, 0, "deep")).unwrap();
        }
        let before = store.create_snapshot();

        let guard = store.write().await;
        assert!(guard.clear(3).unwrap());
        assert!(!guard.clear(3).unwrap());
        let live = guard.live_gen();
        drop(guard);

        for id in [3, 30, 31, 300] {
            assert!(store.get(id, live).is_none(), "node {id} is gone");
            assert!(before.get(id).is_some(), "node {id} is still in the old view");
        }
        assert_eq!(child_ids(&store, ROOT_ID, live), vec![2]);
        let survivor = store.get(2, live).unwrap();
        assert_eq!(survivor.next_sibling_id, None);
    }

    #[tokio::test]
    async fn removing_only_child_and_only_root_empties_links() {
        let store = store();
        {
            let guard = store.write().await;
            guard.set(&kit(1, ROOT_ID, 0, "root")).unwrap();
            guard.set(&kit(2, 1, 0, "leaf")).unwrap();
        }
        drop(store.create_snapshot());

        let guard = store.write().await;
        guard.clear(2).unwrap();
        let live = guard.live_gen();
        let parent = guard.get(1).unwrap();
        assert_eq!(parent.first_child_id, None);
        assert_eq!(parent.last_child_id, None);
        assert!(store.get_children(1, live).is_empty());

        guard.clear(1).unwrap();
        drop(guard);
        assert!(store.get_at_root(live).is_empty());
        assert!(store.is_empty(live));
    }

    #[tokio::test]
    async fn move_under_own_descendant_is_rejected_without_writes() {
        let store = store();
        {
            let guard = store.write().await;
            guard.set(&kit(1, ROOT_ID, 0, "a")).unwrap();
            guard.set(&kit(2, 1, 0, "b")).unwrap();
        }
        let live = store.live_gen();
        let chains_before: Vec<_> = [ROOT_ID, 1, 2].iter().map(|id| store.chain(*id)).collect();

        let guard = store.write().await;
        let err = guard.set(&kit(1, 2, 0, "a")).unwrap_err();
        drop(guard);

        assert!(err.is_corruption());
        let chains_after: Vec<_> = [ROOT_ID, 1, 2].iter().map(|id| store.chain(*id)).collect();
        assert_eq!(chains_before, chains_after);
        assert_eq!(child_ids(&store, ROOT_ID, live), vec![1]);
    }

    #[tokio::test]
    async fn missing_parent_is_corruption() {
        let store = store();
        let guard = store.write().await;
        let err = guard.set(&kit(7, 99, 0, "orphan")).unwrap_err();
        assert!(matches!(err, StoreError::Corruption { id: 7, .. }));
        assert!(guard.get(7).is_none());
    }

    #[tokio::test]
    async fn empty_and_root_kits_are_rejected() {
        let store = store();
        let guard = store.write().await;
        let mut empty = kit(1, ROOT_ID, 0, "x");
        empty.published_data = None;
        assert!(matches!(guard.set(&empty), Err(StoreError::EmptyKit { id: 1 })));
        assert!(matches!(
            guard.set(&kit(ROOT_ID, ROOT_ID, 0, "x")),
            Err(StoreError::ReservedId { .. })
        ));
    }

    #[tokio::test]
    async fn fast_sorted_load_links_in_one_pass_and_reports_skips() {
        let store = store();
        let mut empty = kit(4, ROOT_ID, 9, "empty");
        empty.published_data = None;
        let kits = vec![
            kit(1, ROOT_ID, 0, "a"),
            kit(2, ROOT_ID, 1, "b"),
            kit(10, 1, 0, "a0"),
            kit(11, 1, 1, "a1"),
            kit(10, 1, 2, "dup"),
            kit(20, 77, 0, "orphan"),
            empty,
        ];

        let guard = store.write().await;
        let report = guard.set_all_fast_sorted(kits);
        let live = guard.live_gen();
        drop(guard);

        assert_eq!(report.loaded, 4);
        let reasons: Vec<_> = report.skipped.iter().map(|s| (s.id, s.reason.clone())).collect();
        assert_eq!(
            reasons,
            vec![
                (10, SkipReason::Duplicate),
                (20, SkipReason::MissingParent { parent_id: 77 }),
                (4, SkipReason::EmptyKit),
            ]
        );
        assert_eq!(child_ids(&store, ROOT_ID, live), vec![1, 2]);
        assert_eq!(child_ids(&store, 1, live), vec![10, 11]);
        assert_eq!(store.count(), 4);
    }

    #[tokio::test]
    async fn fast_sorted_load_replaces_previous_tree() {
        let store = store();
        {
            let guard = store.write().await;
            guard.set_all_fast_sorted(vec![kit(1, ROOT_ID, 0, "old")]);
        }
        let old = store.create_snapshot();
        let guard = store.write().await;
        guard.set_all_fast_sorted(vec![kit(2, ROOT_ID, 0, "new")]);
        let live = guard.live_gen();
        drop(guard);

        assert_eq!(child_ids(&store, ROOT_ID, live), vec![2]);
        assert_eq!(child_ids(&store, ROOT_ID, old.generation()), vec![1]);
    }

    #[tokio::test]
    async fn unsorted_load_scans_for_position() {
        let store = store();
        let guard = store.write().await;
        let report = guard.set_all(vec![
            kit(1, ROOT_ID, 5, "late"),
            kit(2, ROOT_ID, 1, "early"),
            kit(3, ROOT_ID, 3, "middle"),
        ]);
        let live = guard.live_gen();
        drop(guard);

        assert!(report.is_complete());
        assert_eq!(child_ids(&store, ROOT_ID, live), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn set_branch_replaces_subtree() {
        let store = store();
        {
            let guard = store.write().await;
            guard.set(&kit(1, ROOT_ID, 0, "a")).unwrap();
            guard.set(&kit(2, ROOT_ID, 1, "b")).unwrap();
            guard.set(&kit(20, 2, 0, "b0")).unwrap();
            guard.set(&kit(21, 2, 1, "b1")).unwrap();
        }
        drop(store.create_snapshot());

        let guard = store.write().await;
        let report = guard
            .set_branch(2, &[kit(2, ROOT_ID, 1, "b"), kit(22, 2, 0, "b2"), kit(23, 99, 0, "lost")])
            .unwrap();
        let live = guard.live_gen();
        drop(guard);

        assert_eq!(report.loaded, 2);
        assert_eq!(
            report.skipped,
            vec![SkippedKit {
                id: 23,
                reason: SkipReason::MissingParent { parent_id: 99 }
            }]
        );
        assert_eq!(child_ids(&store, ROOT_ID, live), vec![1, 2]);
        assert_eq!(child_ids(&store, 2, live), vec![22]);
        assert!(store.get(20, live).is_none());
    }

    #[tokio::test]
    async fn unchanged_branch_refresh_adds_no_history() {
        let store = store();
        let kits = vec![
            kit(2, ROOT_ID, 1, "b"),
            kit(20, 2, 0, "b0"),
            kit(21, 2, 1, "b1"),
            kit(200, 20, 0, "deep"),
        ];
        {
            let guard = store.write().await;
            guard.set(&kit(1, ROOT_ID, 0, "a")).unwrap();
            guard.set(&kit(3, ROOT_ID, 2, "c")).unwrap();
            for kit in &kits {
                guard.set(kit).unwrap();
            }
        }
        let before = store.create_snapshot();
        let heads: Vec<_> = [ROOT_ID, 1, 2, 3, 20, 21, 200]
            .iter()
            .map(|id| store.chain(*id))
            .collect();

        let guard = store.write().await;
        let report = guard.set_branch(2, &kits).unwrap();
        drop(guard);

        assert_eq!(report.loaded, 4);
        let after: Vec<_> = [ROOT_ID, 1, 2, 3, 20, 21, 200]
            .iter()
            .map(|id| store.chain(*id))
            .collect();
        assert_eq!(after, heads);
        for (id, chain) in [ROOT_ID, 1, 2, 3, 20, 21, 200].iter().zip(&after) {
            assert_eq!(chain.len(), 1, "node {id} keeps a single entry");
        }
        assert_eq!(child_ids(&store, 2, before.generation() + 1), vec![20, 21]);
    }

    #[tokio::test]
    async fn set_branch_without_root_kit_removes_branch() {
        let store = store();
        {
            let guard = store.write().await;
            guard.set(&kit(1, ROOT_ID, 0, "a")).unwrap();
            guard.set(&kit(10, 1, 0, "a0")).unwrap();
        }
        let guard = store.write().await;
        let report = guard.set_branch(1, &[]).unwrap();
        let live = guard.live_gen();
        drop(guard);

        assert_eq!(report, LoadReport::default());
        assert!(store.is_empty(live));
        assert_eq!(store.count(), 0);
    }
}
