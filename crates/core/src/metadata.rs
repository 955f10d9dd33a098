// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Open metadata document attached to a job directory
//!
//! Fields are stored as a JSON object so keys this version does not know
//! about survive a load/save cycle unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Well-known metadata keys
pub mod keys {
    pub const NAME: &str = "name";
    pub const COMMAND: &str = "command";
    pub const TAGS: &str = "tags";
    pub const GPU_IDS: &str = "gpu_ids";
    pub const CWD: &str = "cwd";
    pub const DESCRIPTION: &str = "description";
    pub const TIMESTAMP: &str = "timestamp";
    pub const STATUS: &str = "status";
    pub const PID: &str = "pid";
    pub const CURRENT_RUN_ID: &str = "current_run_id";
    pub const ATTEMPT: &str = "attempt";
    pub const EXIT_CODE: &str = "exit_code";
    pub const STARTED_AT: &str = "started_at";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const ERROR: &str = "error";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set `key`, or store null when `value` is `None`
    pub fn set_opt<T: Into<Value>>(&mut self, key: impl Into<String>, value: Option<T>) {
        self.0
            .insert(key.into(), value.map_or(Value::Null, Into::into));
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    pub fn get_strings(&self, key: &str) -> Option<Vec<String>> {
        self.get(key)?
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn get_u32s(&self, key: &str) -> Option<Vec<u32>> {
        self.get(key)?
            .as_array()?
            .iter()
            .map(|v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
            .collect()
    }

    /// Copy every field from `prior` that this document does not define
    pub fn inherit(&mut self, prior: &Metadata) {
        for (key, value) in &prior.0 {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Overlay every field of `other` onto this document
    pub fn overlay(&mut self, other: &Metadata) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_round_trip() {
        let raw = json!({"name": "a", "future_field": {"nested": [1, 2]}, "score": 0.5});
        let meta: Metadata = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&meta).unwrap(), raw);
    }

    #[test]
    fn inherit_keeps_explicit_fields() {
        let mut prior = Metadata::new();
        prior.set(keys::DESCRIPTION, "old");
        prior.set(keys::CWD, "/old");
        let mut current = Metadata::new();
        current.set(keys::DESCRIPTION, "new");
        current.inherit(&prior);
        assert_eq!(current.get_str(keys::DESCRIPTION), Some("new"));
        assert_eq!(current.get_str(keys::CWD), Some("/old"));
    }

    #[test]
    fn typed_list_accessors() {
        let meta: Metadata =
            serde_json::from_value(json!({"gpu_ids": [1, 2], "tags": ["x"], "bad": [1, "y"]}))
                .unwrap();
        assert_eq!(meta.get_u32s(keys::GPU_IDS), Some(vec![1, 2]));
        assert_eq!(meta.get_strings(keys::TAGS), Some(vec!["x".to_string()]));
        assert_eq!(meta.get_u32s("bad"), None);
        assert_eq!(meta.get_u32s("missing"), None);
    }

    #[test]
    fn set_opt_stores_null_for_none() {
        let mut meta = Metadata::new();
        meta.set_opt::<u32>(keys::PID, None);
        assert_eq!(meta.get(keys::PID), Some(&Value::Null));
    }
}
