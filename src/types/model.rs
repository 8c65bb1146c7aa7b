//! Model types
//!
//! Model identities as reported by the serving process and as shown in the
//! reconciled listing, plus downloadable artifacts.

use serde::{Deserialize, Serialize};

/// A model the serving process currently reports in its models list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveModel {
    pub id: String,
    pub owned_by: Option<String>,
    /// Unix timestamp in seconds
    pub created: Option<i64>,
}

/// Remote metadata kept for active models in the reconciled listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMetadata {
    pub owner: Option<String>,
    pub created_at: Option<i64>,
}

/// One row of the reconciled model listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledModel {
    pub id: String,
    pub is_active: bool,
    pub is_configured: bool,
    pub has_local_file: bool,
    pub active_metadata: Option<ActiveMetadata>,
}

impl ReconciledModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_active: false,
            is_configured: false,
            has_local_file: false,
            active_metadata: None,
        }
    }
}

/// Downloadable byte stream with a suggested file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn yaml(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "application/x-yaml",
            bytes,
        }
    }

    pub fn text(filename: impl Into<String>, text: String) -> Self {
        Self {
            filename: filename.into(),
            content_type: "text/plain",
            bytes: text.into_bytes(),
        }
    }
}
