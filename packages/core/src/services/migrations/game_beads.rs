//! Game Beads
//!
//! Beads of a game were stored as posts carrying a `gameId`. They become posts
//! with subtype `bead`, contained by the game through ordered `parent` edges.
//! Historic bead positions start at 1; reindexing after the batch shifts them
//! to a zero-based sequence. The game's prompt bead is attached with role
//! `prompt` and takes no part in the ordering.

use crate::models::{
    ClassificationRule, EdgeShape, Marker, MigrationDefinition, NodeType, OrderSource,
};
use crate::services::error::GraphResult;
use crate::services::migration_registry::DefinitionRegistry;
use serde_json::json;

pub const NAME: &str = "game-beads";

pub fn register_definitions(registry: &mut DefinitionRegistry) -> GraphResult<()> {
    registry.register(definition_v1())
}

pub fn definition_v1() -> MigrationDefinition {
    let game_id = || "gameId".to_string();

    MigrationDefinition::new(NAME, 1)
        .with_description("Reclassify game beads as ordered bead posts")
        .with_table("games")
        .with_table("posts")
        .with_rule(ClassificationRule::new("game", "games", NodeType::Post).with_subtype("game"))
        .with_rule(
            ClassificationRule::new("post", "posts", NodeType::Post)
                .with_marker(Marker::MissingField { name: game_id() }),
        )
        .with_rule(
            ClassificationRule::new("bead", "posts", NodeType::Post)
                .with_subtype("bead")
                .with_marker(Marker::Field { name: game_id() })
                .with_marker(Marker::MissingField {
                    name: "role".to_string(),
                })
                .with_shape(EdgeShape::Contained {
                    order: OrderSource::Field {
                        name: "position".to_string(),
                    },
                    role: None,
                }),
        )
        .with_rule(
            ClassificationRule::new("prompt-bead", "posts", NodeType::Post)
                .with_subtype("bead")
                .with_marker(Marker::Field { name: game_id() })
                .with_marker(Marker::FieldEquals {
                    name: "role".to_string(),
                    value: json!("prompt"),
                })
                .with_shape(EdgeShape::Contained {
                    order: OrderSource::Unordered,
                    role: Some("prompt".to_string()),
                }),
        )
        .with_shape(NodeType::Post, EdgeShape::TopLevel)
}
