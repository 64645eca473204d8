//! Shared domain enumerations aligned with persisted database enums.

use serde::{Deserialize, Serialize};

/// Parent id carried by top-level nodes, and the reserved id of the synthetic root entry.
pub const ROOT_ID: i32 = -1;

/// Which tree a node belongs to. Each kind is cached by its own store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "content_kind", rename_all = "snake_case")]
pub enum ContentKind {
    Content,
    Media,
    Member,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Content => "content",
            ContentKind::Media => "media",
            ContentKind::Member => "member",
        }
    }

    /// Media and members have no draft state; only their published side is cached.
    pub fn has_draft(self) -> bool {
        matches!(self, ContentKind::Content)
    }
}

/// Inbound change kinds delivered by the invalidation broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Reload the whole tree from the data source.
    RefreshAll,
    /// Data changed, position did not.
    RefreshNode,
    /// Publish, unpublish, move or reorder: the subtree is re-derived.
    RefreshBranch,
    /// The node and its descendants are gone.
    Remove,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::RefreshAll => "refresh_all",
            ChangeType::RefreshNode => "refresh_node",
            ChangeType::RefreshBranch => "refresh_branch",
            ChangeType::Remove => "remove",
        }
    }
}

/// Publishing transition of an entity at the moment it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishedState {
    Unpublished,
    Published,
    Publishing,
    Unpublishing,
}

/// Identity of the entity whose payload is being encoded or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentRef {
    pub id: i32,
    pub content_type_id: i32,
    pub kind: ContentKind,
}

impl ContentRef {
    pub fn new(id: i32, content_type_id: i32, kind: ContentKind) -> Self {
        Self {
            id,
            content_type_id,
            kind,
        }
    }

    pub fn is_media(&self) -> bool {
        self.kind == ContentKind::Media
    }
}
