use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::{CultureMap, PropertyData};

use super::SerializationError;

/// The variable-shaped part of a node payload, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentCacheDataModel {
    #[serde(rename = "pd", default)]
    pub property_data: BTreeMap<String, Vec<PropertyData>>,
    #[serde(rename = "cd", default)]
    pub culture_data: CultureMap,
    #[serde(rename = "us", default)]
    pub url_segment: Option<String>,
}

impl ContentCacheDataModel {
    /// Within one alias each (culture, segment) pair may appear once.
    pub fn validate(&self) -> Result<(), SerializationError> {
        for (alias, values) in &self.property_data {
            let mut seen = HashSet::with_capacity(values.len());
            for value in values {
                if !seen.insert((value.culture.as_str(), value.segment.as_str())) {
                    return Err(SerializationError::DuplicateVariant {
                        alias: alias.clone(),
                        culture: value.culture.clone(),
                        segment: value.segment.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Decoding rules plus what only the writer can guarantee: every number
    /// has a textual form, so rows stay readable by either encoder.
    pub fn validate_for_encode(&self) -> Result<(), SerializationError> {
        self.validate()?;
        for (alias, values) in &self.property_data {
            if let Some(value) = values.iter().find(|value| !value.value.is_finite()) {
                return Err(SerializationError::NonFiniteNumber {
                    alias: alias.clone(),
                    culture: value.culture.clone(),
                    segment: value.segment.clone(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn clear_draft_flags(&mut self) {
        self.culture_data.clear_draft_flags();
    }
}
