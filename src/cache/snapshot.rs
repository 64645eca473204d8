use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::domain::ContentNode;

use super::store::ContentStore;

/// A pinned generation. The store tracks these weakly; the generation is
/// collectable once every snapshot holding it is dropped.
#[derive(Debug)]
pub(crate) struct GenRef {
    pub(crate) generation: i64,
}

/// Read handle on one consistent generation of a store.
#[derive(Clone)]
pub struct Snapshot {
    store: Arc<ContentStore>,
    gen_ref: Arc<GenRef>,
}

impl Snapshot {
    pub(crate) fn new(store: Arc<ContentStore>, gen_ref: Arc<GenRef>) -> Self {
        Self { store, gen_ref }
    }

    pub fn generation(&self) -> i64 {
        self.gen_ref.generation
    }

    pub fn get(&self, id: i32) -> Option<Arc<ContentNode>> {
        self.store.get(id, self.generation())
    }

    pub fn get_by_key(&self, uid: Uuid) -> Option<Arc<ContentNode>> {
        self.store.get_by_key(uid, self.generation())
    }

    pub fn get_at_root(&self) -> Vec<Arc<ContentNode>> {
        self.store.get_at_root(self.generation())
    }

    pub fn get_children(&self, id: i32) -> Vec<Arc<ContentNode>> {
        self.store.get_children(id, self.generation())
    }

    pub fn get_parent(&self, node: &ContentNode) -> Option<Arc<ContentNode>> {
        self.get(node.parent_id)
    }

    pub fn get_all(&self) -> Vec<Arc<ContentNode>> {
        self.store.get_all(self.generation())
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty(self.generation())
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("kind", &self.store.kind())
            .field("generation", &self.generation())
            .finish()
    }
}
