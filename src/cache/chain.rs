//! Per-id generation chains.

use std::sync::Arc;

use crate::domain::ContentNode;

/// One entry of an id's history, newest first. `None` records a tombstone.
///
/// Entries are immutable once published; the writer supersedes them by
/// swapping the chain head.
#[derive(Debug)]
pub struct LinkedNode {
    generation: i64,
    value: Option<Arc<ContentNode>>,
    next: Option<Arc<LinkedNode>>,
}

impl LinkedNode {
    pub(crate) fn new(generation: i64, value: Option<Arc<ContentNode>>, next: Option<Arc<LinkedNode>>) -> Self {
        Self { generation, value, next }
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn value(&self) -> Option<&Arc<ContentNode>> {
        self.value.as_ref()
    }

    pub fn next(&self) -> Option<&Arc<LinkedNode>> {
        self.next.as_ref()
    }

    /// The value visible at `generation`: the first entry whose generation is not newer.
    pub fn at(&self, generation: i64) -> Option<Arc<ContentNode>> {
        let mut link = self;
        loop {
            if link.generation <= generation {
                return link.value.clone();
            }
            link = link.next.as_deref()?;
        }
    }

    pub fn depth(&self) -> usize {
        let mut count = 1;
        let mut link = self.next.as_deref();
        while let Some(current) = link {
            count += 1;
            link = current.next.as_deref();
        }
        count
    }

    pub fn entries(&self) -> Vec<(i64, Option<Arc<ContentNode>>)> {
        let mut out = vec![(self.generation, self.value.clone())];
        let mut link = self.next.as_deref();
        while let Some(current) = link {
            out.push((current.generation, current.value.clone()));
            link = current.next.as_deref();
        }
        out
    }
}

pub(crate) enum Trimmed {
    Unchanged,
    Replaced { head: Arc<LinkedNode>, dropped: usize },
    Removed { dropped: usize },
}

/// Drop entries no reader at or above `floor` can observe.
///
/// Entries newer than `floor` stay, plus the first entry at or below it
/// unless that entry is a tombstone.
pub(crate) fn trim(head: &Arc<LinkedNode>, floor: i64) -> Trimmed {
    let mut newer: Vec<&LinkedNode> = Vec::new();
    let mut cursor: Option<&LinkedNode> = Some(head.as_ref());
    while let Some(link) = cursor {
        if link.generation <= floor {
            break;
        }
        newer.push(link);
        cursor = link.next.as_deref();
    }

    let Some(visible) = cursor else {
        return Trimmed::Unchanged;
    };
    if visible.value.is_some() && visible.next.is_none() {
        return Trimmed::Unchanged;
    }

    let before = head.depth();
    let mut rebuilt = visible
        .value
        .as_ref()
        .map(|value| Arc::new(LinkedNode::new(visible.generation, Some(value.clone()), None)));
    for link in newer.iter().rev() {
        rebuilt = Some(Arc::new(LinkedNode::new(link.generation, link.value.clone(), rebuilt)));
    }

    match rebuilt {
        Some(head) => {
            let dropped = before - head.depth();
            Trimmed::Replaced { head, dropped }
        }
        None => Trimmed::Removed { dropped: before },
    }
}
