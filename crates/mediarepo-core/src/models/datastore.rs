use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::storage_types::DatastoreKind;

/// Static configuration for one datastore instance. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DatastoreKind,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl DatastoreConfig {
    pub fn new(id: impl Into<String>, kind: DatastoreKind) -> Self {
        Self {
            id: id.into(),
            kind,
            options: HashMap::new(),
        }
    }

    /// Builder-style option setter, mostly for tests and programmatic setups.
    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Non-empty option value.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Boolean option; absent or unparseable values read as `false`.
    pub fn bool_option(&self, key: &str) -> bool {
        self.option(key).map(parse_bool).unwrap_or(false)
    }

    pub fn bool_option_or(&self, key: &str, default: bool) -> bool {
        self.option(key).map(parse_bool).unwrap_or(default)
    }

    pub fn u64_option(&self, key: &str) -> Option<u64> {
        self.option(key).and_then(|v| v.parse().ok())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "t" | "true" | "yes" | "on"
    )
}
