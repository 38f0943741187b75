//! Declarative Migration Definitions
//!
//! A migration run is described entirely by data: which origin tables are in
//! scope, how rows are classified into node types, which structural edges each
//! node type produces, and which counters are recomputed afterwards. The
//! migration engine interprets these definitions; a new schema evolution is a
//! new definition (or a new version of one), not new imperative code.
//!
//! Definitions serialize to JSON so operators can keep them next to the data
//! they migrate:
//!
//! ```json
//! {
//!   "name": "comment-threads",
//!   "version": 1,
//!   "tables": ["posts", "comments"],
//!   "rules": [
//!     {"name": "post", "table": "posts", "nodeType": "post"},
//!     {"name": "comment", "table": "comments", "nodeType": "comment"}
//!   ],
//!   "shapes": {"post": {"shape": "topLevel"}, "comment": {"shape": "thread"}}
//! }
//! ```

use crate::models::counters::CounterName;
use crate::models::node::{LegacyKey, NodeType};
use crate::models::source::SourceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Predicate over a source record's shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "marker", rename_all = "camelCase")]
pub enum Marker {
    /// Payload field is present and not null
    Field { name: String },
    /// Payload field is absent or null
    MissingField { name: String },
    /// Payload field equals the given JSON value
    FieldEquals {
        name: String,
        value: serde_json::Value,
    },
    HasParent,
    NoParent,
    /// Parent reference points into the given table
    ParentTable { table: String },
}

impl Marker {
    pub fn matches(&self, record: &SourceRecord) -> bool {
        match self {
            Marker::Field { name } => record.field(name).is_some(),
            Marker::MissingField { name } => record.field(name).is_none(),
            Marker::FieldEquals { name, value } => record.field(name) == Some(value),
            Marker::HasParent => record.parent.is_some(),
            Marker::NoParent => record.parent.is_none(),
            Marker::ParentTable { table } => record
                .parent
                .as_ref()
                .is_some_and(|parent| &parent.table == table),
        }
    }
}

/// Maps rows of one origin table that satisfy every marker to a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRule {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub markers: Vec<Marker>,
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Overrides the definition's shape for `node_type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<EdgeShape>,
}

impl ClassificationRule {
    pub fn new(name: impl Into<String>, table: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            markers: Vec::new(),
            node_type,
            subtype: None,
            shape: None,
        }
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_shape(mut self, shape: EdgeShape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn matches(&self, record: &SourceRecord) -> bool {
        record.origin_table == self.table && self.markers.iter().all(|m| m.matches(record))
    }
}

/// Result of classifying a source record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub node_type: NodeType,
    pub subtype: Option<String>,
    pub legacy_key: LegacyKey,
    /// Name of the rule that produced the classification
    pub rule: String,
}

/// Where a contained child's initial order index comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "camelCase")]
pub enum OrderSource {
    /// Integer payload field such as `position`
    Field { name: String },
    /// Origin creation timestamp
    CreatedAt,
    /// The edge carries no order index
    Unordered,
}

/// Structural edges produced for a node type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum EdgeShape {
    /// No structural edges (posts, spaces, users)
    TopLevel,
    /// Flattened reply chain: parent, root and ancestor edges
    Thread,
    /// Single ordered parent edge to the containing node
    Contained {
        order: OrderSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
}

fn default_counters() -> Vec<CounterName> {
    CounterName::ALL.to_vec()
}

/// Versioned, declarative description of one migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDefinition {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub description: String,
    /// Origin tables in scope; rows from any other table are skipped
    pub tables: Vec<String>,
    pub rules: Vec<ClassificationRule>,
    pub shapes: BTreeMap<NodeType, EdgeShape>,
    #[serde(default = "default_counters")]
    pub counters: Vec<CounterName>,
}

impl MigrationDefinition {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            description: String::new(),
            tables: Vec::new(),
            rules: Vec::new(),
            shapes: BTreeMap::new(),
            counters: default_counters(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.tables.push(table.into());
        self
    }

    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_shape(mut self, node_type: NodeType, shape: EdgeShape) -> Self {
        self.shapes.insert(node_type, shape);
        self
    }

    /// Scope of the identity mapping; shared by every run of this version
    pub fn run_key(&self) -> String {
        format!("{}@v{}", self.name, self.version)
    }

    pub fn in_scope(&self, record: &SourceRecord) -> bool {
        self.tables.iter().any(|t| t == &record.origin_table)
    }

    pub fn shape_for(&self, node_type: NodeType) -> &EdgeShape {
        self.shapes.get(&node_type).unwrap_or(&EdgeShape::TopLevel)
    }

    /// Shape of a classified record: the rule's own shape, else its node type's
    pub fn shape_of(&self, classification: &Classification) -> &EdgeShape {
        self.rules
            .iter()
            .find(|rule| rule.name == classification.rule)
            .and_then(|rule| rule.shape.as_ref())
            .unwrap_or_else(|| self.shape_for(classification.node_type))
    }

    /// Check the definition is internally consistent
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("definition name cannot be empty".to_string());
        }
        if self.version == 0 {
            return Err("definition version must start at 1".to_string());
        }
        if self.tables.is_empty() {
            return Err(format!("definition '{}' has no tables in scope", self.name));
        }
        if self.rules.is_empty() {
            return Err(format!("definition '{}' has no classification rules", self.name));
        }

        for rule in &self.rules {
            if !self.tables.contains(&rule.table) {
                return Err(format!(
                    "rule '{}' classifies table '{}' which is not in scope",
                    rule.name, rule.table
                ));
            }
            if rule.shape.is_none() && !self.shapes.contains_key(&rule.node_type) {
                return Err(format!(
                    "rule '{}' produces '{}' nodes but no edge shape is declared for them",
                    rule.name, rule.node_type
                ));
            }
        }

        for (node_type, shape) in &self.shapes {
            if let EdgeShape::Contained {
                order: OrderSource::Field { name },
                ..
            } = shape
            {
                if name.trim().is_empty() {
                    return Err(format!("order field for '{}' cannot be empty", node_type));
                }
            }
        }

        Ok(())
    }
}
