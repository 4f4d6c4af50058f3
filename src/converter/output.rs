use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One successfully converted file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedArtifact {
    pub original_name: String,
    pub converted_name: String,
    pub size: u64,
    pub path: PathBuf,
}
