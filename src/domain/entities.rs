//! Cached tree entries and the payloads they carry.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::property::PropertyData;
use super::types::ROOT_ID;

/// Identity and structural links of one tree entry.
///
/// Links are ids into the owning store, never references, so an untouched
/// node is shared between generations as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNode {
    pub id: i32,
    pub uid: Uuid,
    pub content_type_id: i32,
    pub level: i32,
    pub path: String,
    pub sort_order: i32,
    pub parent_id: i32,
    pub create_date: OffsetDateTime,
    pub creator_id: i32,
    pub previous_sibling_id: Option<i32>,
    pub next_sibling_id: Option<i32>,
    pub first_child_id: Option<i32>,
    pub last_child_id: Option<i32>,
    pub draft_data: Option<Arc<ContentData>>,
    pub published_data: Option<Arc<ContentData>>,
}

impl ContentNode {
    /// Structural node without links or payload.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i32,
        uid: Uuid,
        content_type_id: i32,
        level: i32,
        path: impl Into<String>,
        sort_order: i32,
        parent_id: i32,
        create_date: OffsetDateTime,
        creator_id: i32,
    ) -> Self {
        Self {
            id,
            uid,
            content_type_id,
            level,
            path: path.into(),
            sort_order,
            parent_id,
            create_date,
            creator_id,
            previous_sibling_id: None,
            next_sibling_id: None,
            first_child_id: None,
            last_child_id: None,
            draft_data: None,
            published_data: None,
        }
    }

    /// The synthetic entry heading the top-level sibling list.
    pub fn root() -> Self {
        Self::new(
            ROOT_ID,
            Uuid::nil(),
            0,
            0,
            ROOT_ID.to_string(),
            0,
            ROOT_ID,
            OffsetDateTime::UNIX_EPOCH,
            0,
        )
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    pub fn has_data(&self) -> bool {
        self.draft_data.is_some() || self.published_data.is_some()
    }

    pub fn has_children(&self) -> bool {
        self.first_child_id.is_some()
    }

    pub(crate) fn clear_links(&mut self) {
        self.previous_sibling_id = None;
        self.next_sibling_id = None;
        self.first_child_id = None;
        self.last_child_id = None;
    }
}

/// Versioned payload for one state, draft or published, of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentData {
    pub name: String,
    pub url_segment: Option<String>,
    pub version_id: i32,
    pub version_date: OffsetDateTime,
    pub writer_id: i32,
    pub template_id: Option<i32>,
    pub published: bool,
    pub properties: BTreeMap<String, Vec<PropertyData>>,
    /// Present only for culture-variant content types.
    pub culture_infos: Option<CultureMap>,
}

impl ContentData {
    /// Published payloads never carry unpublished culture edits.
    pub(crate) fn normalize_published(mut self) -> Self {
        if self.published {
            if let Some(cultures) = self.culture_infos.as_mut() {
                cultures.clear_draft_flags();
            }
        }
        self
    }
}

/// Per-culture name, url segment and edit state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CultureVariation {
    #[serde(rename = "nm", default)]
    pub name: Option<String>,
    #[serde(rename = "us", default)]
    pub url_segment: Option<String>,
    #[serde(rename = "dt", with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(rename = "isd", default)]
    pub is_draft: bool,
}

/// Culture code compared without regard to ASCII case, keeping the
/// spelling it was first inserted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CultureKey(String);

impl CultureKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for CultureKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CultureKey {}

impl PartialOrd for CultureKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CultureKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .bytes()
            .map(|b| b.to_ascii_lowercase())
            .cmp(other.0.bytes().map(|b| b.to_ascii_lowercase()))
    }
}

/// Culture code to variation, unique under case-insensitive comparison.
/// Inserting an existing culture replaces its variation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CultureMap(BTreeMap<CultureKey, CultureVariation>);

impl CultureMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, culture: impl Into<String>, variation: CultureVariation) {
        self.0.insert(CultureKey(culture.into()), variation);
    }

    pub fn get(&self, culture: &str) -> Option<&CultureVariation> {
        self.0.get(&CultureKey(culture.to_string()))
    }

    pub fn contains(&self, culture: &str) -> bool {
        self.get(culture).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CultureVariation)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(CultureKey::as_str)
    }

    pub(crate) fn clear_draft_flags(&mut self) {
        for variation in self.0.values_mut() {
            variation.is_draft = false;
        }
    }
}

impl<K: Into<String>> FromIterator<(K, CultureVariation)> for CultureMap {
    fn from_iter<T: IntoIterator<Item = (K, CultureVariation)>>(iter: T) -> Self {
        let mut map = CultureMap::new();
        for (culture, variation) in iter {
            map.insert(culture, variation);
        }
        map
    }
}

/// Transport unit moving a fully-formed node from the data source into a store.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNodeKit {
    pub node: ContentNode,
    pub content_type_id: i32,
    pub draft_data: Option<ContentData>,
    pub published_data: Option<ContentData>,
}

impl ContentNodeKit {
    /// A kit with neither side cannot be cached.
    pub fn is_empty(&self) -> bool {
        self.draft_data.is_none() && self.published_data.is_none()
    }

    /// Node ready for linking: payload attached, links cleared.
    pub fn build(&self) -> ContentNode {
        self.clone().into_node()
    }

    pub fn into_node(self) -> ContentNode {
        let mut node = self.node;
        node.clear_links();
        node.content_type_id = self.content_type_id;
        node.draft_data = self.draft_data.map(Arc::new);
        node.published_data = self
            .published_data
            .map(|data| Arc::new(data.normalize_published()));
        node
    }
}
