//! Source record feed
//!
//! Rows handed to the engine by an external reader (legacy forum database,
//! existing-schema reader, JSON-lines dump). The engine never fetches rows
//! itself; it only relies on the shape below.

use crate::models::node::LegacyKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub origin_table: String,
    pub origin_id: i64,

    /// Immediate parent row (reply-to comment, owning post, owning game)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<LegacyKey>,

    /// Top-level row the record belongs to, e.g. the post of a comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<LegacyKey>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub deleted: bool,

    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SourceRecord {
    pub fn new(origin_table: impl Into<String>, origin_id: i64) -> Self {
        Self {
            origin_table: origin_table.into(),
            origin_id,
            parent: None,
            root: None,
            created_at: Utc::now(),
            deleted: false,
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_parent(mut self, parent: LegacyKey) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_root(mut self, root: LegacyKey) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn legacy_key(&self) -> LegacyKey {
        LegacyKey::new(self.origin_table.clone(), self.origin_id)
    }

    /// Field of the payload, treating JSON `null` as absent
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.payload.get(name).filter(|v| !v.is_null())
    }
}
