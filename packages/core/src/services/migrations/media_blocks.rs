//! Polymorphic Media Blocks
//!
//! Image and audio attachments of a post become `media-block` nodes hanging
//! off the post through ordered `parent` edges. The attachment's `position`
//! column seeds the order; the engine's reindex makes it dense.

use crate::models::{
    ClassificationRule, EdgeShape, Marker, MigrationDefinition, NodeType, OrderSource,
};
use crate::services::error::GraphResult;
use crate::services::migration_registry::DefinitionRegistry;

pub const NAME: &str = "media-blocks";

pub fn register_definitions(registry: &mut DefinitionRegistry) -> GraphResult<()> {
    registry.register(definition_v1())
}

pub fn definition_v1() -> MigrationDefinition {
    MigrationDefinition::new(NAME, 1)
        .with_description("Move post images and audio clips into ordered media blocks")
        .with_table("posts")
        .with_table("post_images")
        .with_table("post_audios")
        .with_rule(ClassificationRule::new("post", "posts", NodeType::Post))
        .with_rule(
            ClassificationRule::new("image", "post_images", NodeType::MediaBlock)
                .with_subtype("image")
                .with_marker(Marker::HasParent),
        )
        .with_rule(
            ClassificationRule::new("audio", "post_audios", NodeType::MediaBlock)
                .with_subtype("audio")
                .with_marker(Marker::HasParent),
        )
        .with_shape(NodeType::Post, EdgeShape::TopLevel)
        .with_shape(
            NodeType::MediaBlock,
            EdgeShape::Contained {
                order: OrderSource::Field {
                    name: "position".to_string(),
                },
                role: None,
            },
        )
}
