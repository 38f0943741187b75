//! Comment Thread Flattening
//!
//! Turns arbitrarily deep reply chains into the shallow edge shape: every
//! comment gets a `parent` edge to its immediate parent, a `root` edge from
//! the post it belongs to, and an `ancestor` edge from every comment above it
//! plus the post.
//!
//! ## Version History
//!
//! - **v1**: posts and comments; comments without a parent row are kept when
//!   their post is known and reported as `MissingParentReference`

use crate::models::{ClassificationRule, EdgeShape, Marker, MigrationDefinition, NodeType};
use crate::services::error::GraphResult;
use crate::services::migration_registry::DefinitionRegistry;

pub const NAME: &str = "comment-threads";

pub fn register_definitions(registry: &mut DefinitionRegistry) -> GraphResult<()> {
    registry.register(definition_v1())
}

pub fn definition_v1() -> MigrationDefinition {
    MigrationDefinition::new(NAME, 1)
        .with_description("Flatten reply chains into parent, root and ancestor edges")
        .with_table("posts")
        .with_table("comments")
        .with_rule(ClassificationRule::new("post", "posts", NodeType::Post))
        .with_rule(
            ClassificationRule::new("top-level-comment", "comments", NodeType::Comment)
                .with_marker(Marker::ParentTable {
                    table: "posts".to_string(),
                }),
        )
        .with_rule(
            ClassificationRule::new("reply", "comments", NodeType::Comment).with_marker(
                Marker::ParentTable {
                    table: "comments".to_string(),
                },
            ),
        )
        .with_rule(
            ClassificationRule::new("orphan-comment", "comments", NodeType::Comment)
                .with_marker(Marker::NoParent),
        )
        .with_shape(NodeType::Post, EdgeShape::TopLevel)
        .with_shape(NodeType::Comment, EdgeShape::Thread)
}
