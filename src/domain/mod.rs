//! Domain layer types and invariants.

pub mod entities;
pub mod error;
pub mod lazy;
pub mod property;
pub mod types;

pub use entities::{ContentData, ContentNode, ContentNodeKit, CultureMap, CultureVariation};
pub use error::DomainError;
pub use lazy::{CompressedText, LazyCompressedString};
pub use property::{PropertyData, PropertyValue};
pub use types::{ChangeType, ContentKind, ContentRef, PublishedState, ROOT_ID};
