use thiserror::Error;

use crate::application::repos::RepoError;
use crate::cache::StoreError;
use crate::domain::DomainError;
use crate::infra::error::InfraError;
use crate::serialization::SerializationError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Errors after which the in-memory tree should be reloaded from the
    /// data source rather than patched.
    pub fn needs_reload(&self) -> bool {
        matches!(self, AppError::Store(err) if err.is_corruption())
    }
}
