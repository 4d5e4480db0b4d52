//! WD-014: Managed-project ownership annotation.

use crate::core::types::Annotations;
use serde::{Deserialize, Serialize};

/// Annotation key carrying the ownership marker.
pub const MANAGED_KEY: &str = "whisk-managed";

/// Ownership marker stamped on entities deployed in managed mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedAnnotation {
    #[serde(rename = "__OW_PROJECT_NAME")]
    pub project_name: String,
    #[serde(rename = "__OW_PROJECT_HASH")]
    pub project_hash: String,
    #[serde(rename = "__OW_FILE")]
    pub source_file: String,
}

impl ManagedAnnotation {
    pub fn new(project_name: &str, project_hash: &str, source_file: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            project_hash: project_hash.to_string(),
            source_file: source_file.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Read the marker from an annotation set, if present and well-formed.
    pub fn from_annotations(annotations: &Annotations) -> Option<Self> {
        annotations
            .get(MANAGED_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Stamp (or replace) the marker on an annotation set.
    pub fn stamp(&self, annotations: &mut Annotations) {
        annotations.insert(MANAGED_KEY.to_string(), self.to_json());
    }

    pub fn belongs_to(annotations: &Annotations, project: &str) -> bool {
        Self::from_annotations(annotations).is_some_and(|m| m.project_name == project)
    }
}
