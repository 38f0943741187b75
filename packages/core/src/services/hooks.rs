//! Dependent-record rewrite hooks
//!
//! Records outside the graph (reactions, mentions in bodies, notifications)
//! still point at legacy keys after a migration. A [`RetargetHook`] is told,
//! once per resolved legacy key per run, which node replaced the old row, and
//! rewrites its own data accordingly. `finish` runs once after every key has
//! been delivered, for hooks that batch their writes.

use crate::db::GraphStore;
use crate::models::{Endpoint, LegacyKey, NodeId, ReactionTarget};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

#[async_trait]
pub trait RetargetHook: Send + Sync {
    /// Name used in reports and logs
    fn name(&self) -> &str;

    /// Point dependent records of `old` at `new`
    ///
    /// Must tolerate being called again for a key it already handled in an
    /// earlier, interrupted run.
    async fn retarget(&self, old: &LegacyKey, new: Endpoint) -> anyhow::Result<()>;

    async fn finish(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Moves store-backed reactions from legacy targets onto nodes
pub struct ReactionRetargeter {
    store: Arc<dyn GraphStore>,
}

impl ReactionRetargeter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RetargetHook for ReactionRetargeter {
    fn name(&self) -> &str {
        "reactions"
    }

    async fn retarget(&self, old: &LegacyKey, new: Endpoint) -> anyhow::Result<()> {
        let reactions = self.store.reactions_for_legacy_target(old).await?;
        for mut reaction in reactions {
            reaction.target = ReactionTarget::Node(new);
            self.store.update_reaction(reaction).await?;
        }
        Ok(())
    }
}

/// `@[table:id]` legacy mention
const LEGACY_MENTION_PATTERN: &str = r"@\[([a-z][a-z0-9_]*):(\d+)\]";

fn mention_regex() -> &'static Regex {
    static MENTION_REGEX: OnceLock<Regex> = OnceLock::new();
    MENTION_REGEX.get_or_init(|| Regex::new(LEGACY_MENTION_PATTERN).unwrap())
}

/// Rewrites `@[table:id]` mentions in node bodies to `@[node:<uuid>]`
///
/// Keys are collected during `retarget`; bodies are rewritten in one pass in
/// `finish`. Mentions of keys that were never resolved are left untouched.
pub struct MentionRewriter {
    store: Arc<dyn GraphStore>,
    resolved: Mutex<HashMap<LegacyKey, NodeId>>,
}

impl MentionRewriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Rewrite the mentions of one body, returning `None` if nothing changed
    pub fn rewrite(body: &str, resolved: &HashMap<LegacyKey, NodeId>) -> Option<String> {
        let mut changed = false;
        let rewritten = mention_regex().replace_all(body, |caps: &regex::Captures| {
            let target = caps[2]
                .parse::<i64>()
                .ok()
                .map(|id| LegacyKey::new(&caps[1], id))
                .and_then(|key| resolved.get(&key));
            match target {
                Some(node) => {
                    changed = true;
                    format!("@[node:{}]", node)
                }
                None => caps[0].to_string(),
            }
        });
        changed.then(|| rewritten.into_owned())
    }
}

#[async_trait]
impl RetargetHook for MentionRewriter {
    fn name(&self) -> &str {
        "mentions"
    }

    async fn retarget(&self, old: &LegacyKey, new: Endpoint) -> anyhow::Result<()> {
        self.resolved.lock().await.insert(old.clone(), new.id);
        Ok(())
    }

    async fn finish(&self) -> anyhow::Result<()> {
        let resolved = self.resolved.lock().await;
        if resolved.is_empty() {
            return Ok(());
        }

        let mut rewritten = 0;
        for node in self.store.list_nodes().await? {
            let Some(body) = node.body() else { continue };
            if let Some(new_body) = Self::rewrite(body, &resolved) {
                let mut properties = node.properties.clone();
                properties["body"] = serde_json::Value::String(new_body);
                self.store.update_node_properties(node.id, properties).await?;
                rewritten += 1;
            }
        }

        tracing::info!("Rewrote mentions in {} node bodies", rewritten);
        Ok(())
    }
}
