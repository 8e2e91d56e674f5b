//! Key/value preference stored alongside the planner data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single stored preference, e.g. `overview.history.perPage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl ConfigEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self { key: key.into(), value }
    }
}
