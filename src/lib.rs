//! Generation-versioned published content cache.
//!
//! Readers pin a consistent generation of the content and media trees
//! through snapshots while a single writer applies change notifications.
//! Node payloads are persisted as JSON text or MessagePack bytes with
//! optional per-property LZ4 compression.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod serialization;
