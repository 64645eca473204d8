//! Randomized mutation sequences checked against the tree link invariants.

mod support;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use proptest::prelude::*;
use snapcache::cache::{ContentStore, Snapshot, StoreError};
use snapcache::domain::{ContentNode, ROOT_ID};

use support::{kit, store};

#[derive(Debug, Clone)]
enum Op {
    Set { id: i32, parent_id: i32, sort_order: i32 },
    Clear { id: i32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let parent = prop_oneof![Just(ROOT_ID), 1..=12i32];
    prop_oneof![
        3 => (1..=12i32, parent, 0..4i32).prop_map(|(id, parent_id, sort_order)| Op::Set {
            id,
            parent_id,
            sort_order,
        }),
        1 => (1..=12i32).prop_map(|id| Op::Clear { id }),
    ]
}

fn apply(runtime: &tokio::runtime::Runtime, store: &ContentStore, op: &Op) -> Result<(), StoreError> {
    let guard = runtime.block_on(store.write());
    match *op {
        Op::Set {
            id,
            parent_id,
            sort_order,
        } => guard.set(&kit(id, parent_id, sort_order, &format!("n{id}-{sort_order}"))),
        Op::Clear { id } => guard.clear(id).map(|_| ()),
    }
}

fn by_id(snapshot: &Snapshot) -> BTreeMap<i32, Arc<ContentNode>> {
    snapshot
        .get_all()
        .into_iter()
        .map(|node| (node.id, node))
        .collect()
}

fn descendants(snapshot: &Snapshot, id: i32) -> BTreeSet<i32> {
    let mut out = BTreeSet::new();
    let mut pending = vec![id];
    while let Some(next) = pending.pop() {
        for child in snapshot.get_children(next) {
            if out.insert(child.id) {
                pending.push(child.id);
            }
        }
    }
    out
}

/// Every sibling list agrees with the parent pointers, the sort order and
/// the parent's first and last child.
fn check_links(snapshot: &Snapshot) -> Result<(), TestCaseError> {
    let all = snapshot.get_all();
    let mut parents = vec![ROOT_ID];
    parents.extend(all.iter().map(|node| node.id));

    let mut linked = 0;
    for parent_id in parents {
        let children = if parent_id == ROOT_ID {
            snapshot.get_at_root()
        } else {
            snapshot.get_children(parent_id)
        };
        linked += children.len();

        for (index, child) in children.iter().enumerate() {
            prop_assert_eq!(child.parent_id, parent_id);
            let previous = index.checked_sub(1).map(|i| children[i].id);
            let next = children.get(index + 1).map(|node| node.id);
            prop_assert_eq!(child.previous_sibling_id, previous);
            prop_assert_eq!(child.next_sibling_id, next);
            if index > 0 {
                prop_assert!(children[index - 1].sort_order <= child.sort_order);
            }
        }

        if parent_id != ROOT_ID {
            let parent = snapshot.get(parent_id).expect("listed parent exists");
            prop_assert_eq!(parent.first_child_id, children.first().map(|node| node.id));
            prop_assert_eq!(parent.last_child_id, children.last().map(|node| node.id));
        }
    }

    prop_assert_eq!(linked, all.len());
    Ok(())
}

fn neighbours(node: Option<&Arc<ContentNode>>) -> Vec<i32> {
    node.map(|node| {
        [Some(node.parent_id), node.previous_sibling_id, node.next_sibling_id]
            .into_iter()
            .flatten()
            .collect()
    })
    .unwrap_or_default()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn mutations_keep_links_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let store = store();

        for op in &ops {
            let before = store.create_snapshot();
            let result = apply(&runtime, &store, op);
            let after = store.create_snapshot();

            check_links(&after)?;

            let old = by_id(&before);
            let new = by_id(&after);

            if result.is_err() {
                prop_assert_eq!(old.len(), new.len());
                for (id, node) in &old {
                    prop_assert_eq!(Some(node), new.get(id), "failed op changed node {}", id);
                }
                continue;
            }

            let (target, removed) = match *op {
                Op::Set { id, .. } => (id, BTreeSet::new()),
                Op::Clear { id } => (id, descendants(&before, id)),
            };
            let mut allowed: BTreeSet<i32> = BTreeSet::from([target]);
            allowed.extend(neighbours(old.get(&target)));
            allowed.extend(neighbours(new.get(&target)));

            for (id, node) in &old {
                match new.get(id) {
                    Some(current) if !Arc::ptr_eq(node, current) => {
                        prop_assert!(allowed.contains(id), "{:?} rewrote unrelated node {}", op, id);
                    }
                    Some(_) => {}
                    None => {
                        prop_assert!(
                            *id == target || removed.contains(id),
                            "{:?} dropped unrelated node {}",
                            op,
                            id
                        );
                    }
                }
            }
            for id in new.keys() {
                prop_assert!(old.contains_key(id) || *id == target, "{:?} added node {}", op, id);
            }
        }
    }
}
