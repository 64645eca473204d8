//! Per-property compression policy.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::domain::ContentRef;

/// Decides whether a property value is stored compressed.
pub trait PropertyCompressionOptions: Send + Sync {
    fn is_compressed(&self, content: &ContentRef, alias: &str) -> bool;
}

/// Never compresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompressionOptions;

impl PropertyCompressionOptions for NoopCompressionOptions {
    fn is_compressed(&self, _content: &ContentRef, _alias: &str) -> bool {
        false
    }
}

/// A compressed property, optionally restricted to one content type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompressionRule {
    #[serde(default)]
    pub content_type_id: Option<i32>,
    pub alias: String,
}

impl CompressionRule {
    pub fn alias(alias: impl Into<String>) -> Self {
        Self {
            content_type_id: None,
            alias: alias.into(),
        }
    }

    pub fn for_type(content_type_id: i32, alias: impl Into<String>) -> Self {
        Self {
            content_type_id: Some(content_type_id),
            alias: alias.into(),
        }
    }

    fn matches(&self, content: &ContentRef, alias: &str) -> bool {
        self.alias.eq_ignore_ascii_case(alias)
            && self
                .content_type_id
                .is_none_or(|type_id| type_id == content.content_type_id)
    }
}

/// Rule list loaded from settings.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCompressionOptions {
    rules: Vec<CompressionRule>,
}

impl ConfiguredCompressionOptions {
    pub fn new(rules: Vec<CompressionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CompressionRule] {
        &self.rules
    }
}

impl PropertyCompressionOptions for ConfiguredCompressionOptions {
    fn is_compressed(&self, content: &ContentRef, alias: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(content, alias))
    }
}

/// Memoizes policy answers per `(content_type_id, alias)`.
pub struct PropertyCacheCompression {
    options: Arc<dyn PropertyCompressionOptions>,
    decisions: DashMap<(i32, String), bool>,
}

impl PropertyCacheCompression {
    pub fn new(options: Arc<dyn PropertyCompressionOptions>) -> Self {
        Self {
            options,
            decisions: DashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopCompressionOptions))
    }

    pub fn is_compressed(&self, content: &ContentRef, alias: &str) -> bool {
        let key = (content.content_type_id, alias.to_string());
        if let Some(decision) = self.decisions.get(&key) {
            return *decision;
        }

        let decision = self.options.is_compressed(content, alias);
        debug!(
            content_type_id = content.content_type_id,
            alias,
            compressed = decision,
            "Resolved property compression"
        );
        self.decisions.insert(key, decision);
        decision
    }

    pub fn memoized_len(&self) -> usize {
        self.decisions.len()
    }
}

impl std::fmt::Debug for PropertyCacheCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyCacheCompression")
            .field("memoized", &self.decisions.len())
            .finish()
    }
}
