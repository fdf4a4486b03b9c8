#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// Contents of an add-on's `pack.mcmeta`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackMetadata {
    pub pack: PackSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_format: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<serde_json::Value>,
    /// Marks the add-on as a benchmark group.
    #[serde(default)]
    pub mch: bool,
}

/// Contents of a function tag file, `data/<ns>/tags/functions/<path>.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTag {
    #[serde(default)]
    pub replace: bool,
    #[serde(default)]
    pub values: Vec<String>,
}
