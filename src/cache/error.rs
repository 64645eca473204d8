use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A mutation would have left a dangling parent, sibling or child link.
    /// Nothing was written.
    #[error("referential corruption in {op} for node {id}: {detail}")]
    Corruption {
        op: &'static str,
        id: i32,
        detail: String,
    },
    #[error("node {id} has neither draft nor published data")]
    EmptyKit { id: i32 },
    #[error("node id {id} is reserved for the tree root")]
    ReservedId { id: i32 },
}

impl StoreError {
    pub fn corruption(op: &'static str, id: i32, detail: impl Into<String>) -> Self {
        Self::Corruption {
            op,
            id,
            detail: detail.into(),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption { .. })
    }
}
