//! Deterministic reply fallbacks: the tiers of the chain that never touch
//! the model. Each tier is a standalone function from (message, registry) to
//! an optional reply, so the chain runner in `pipeline` stays a straight
//! first-success walk and every tier is unit-testable on its own.

use crate::intent::Intent;
use crate::layers::LayerRegistry;
use once_cell::sync::Lazy;
use regex::Regex;

static LIST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(list|show)\b").expect("list pattern"));
static SUMMARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(summarize|summary)\b").expect("summary pattern"));

/// Listing budget when rendering a direct list reply.
const LIST_BUILD_ITEMS: usize = 300;
/// At most this many bulleted lines per layer in a list reply.
const LIST_REPLY_LINES: usize = 100;
/// Context budget for the summary tier.
const SUMMARY_BUILD_ITEMS: usize = 50;
/// Example names quoted per layer in a summary sentence.
const SUMMARY_EXAMPLES: usize = 5;

/// The final contextless message: the only point where the reply is allowed
/// to be generic.
pub const STATIC_REPLY: &str = "Here to help with dengue hotspots and planning areas.";

/// List tier: on a list/show cue, render the context listings of every
/// matched layer (all layers when none matched) as titled bullet sections.
pub async fn list_reply(message_lower: &str, registry: &LayerRegistry) -> Option<String> {
    if !LIST_RE.is_match(message_lower) {
        return None;
    }
    let mut sections = Vec::new();
    for key in registry.detect(message_lower) {
        let layer = match registry.get(&key) {
            Some(l) => l,
            None => continue,
        };
        let context = layer.source.build(LIST_BUILD_ITEMS).await;
        let lines: Vec<&str> = context
            .lines()
            .filter(|l| l.starts_with("- "))
            .take(LIST_REPLY_LINES)
            .collect();
        if !lines.is_empty() {
            sections.push(format!("{}:\n{}", layer.title, lines.join("\n")));
        }
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Summary tier: on a summarize cue, one short sentence per matched layer
/// with its total (via the layer's `total_pattern`) and a few example names.
pub async fn summary_reply(message_lower: &str, registry: &LayerRegistry) -> Option<String> {
    if !SUMMARY_RE.is_match(message_lower) {
        return None;
    }
    let mut pieces = Vec::new();
    for key in registry.detect(message_lower) {
        let layer = match registry.get(&key) {
            Some(l) => l,
            None => continue,
        };
        let context = layer.source.build(SUMMARY_BUILD_ITEMS).await;
        let total = match layer.total_from(&context) {
            Some(t) if t > 0 => t,
            _ => continue,
        };
        let examples: Vec<&str> = context
            .lines()
            .filter_map(|l| l.strip_prefix("- "))
            .take(SUMMARY_EXAMPLES)
            .collect();
        let mut piece = format!("{}: {} items.", layer.title, total);
        if !examples.is_empty() {
            piece.push_str(&format!(" Examples: {}.", examples.join(", ")));
        }
        pieces.push(piece);
    }
    if pieces.is_empty() {
        None
    } else {
        Some(pieces.join(" "))
    }
}

/// Phrase tier: one fixed sentence per intent, joined in order.
pub fn intent_phrases(intents: &[Intent], registry: &LayerRegistry) -> Option<String> {
    let mut phrases = Vec::new();
    for intent in intents {
        match intent {
            Intent::ShowLayer { layer, .. } => {
                if let Some(descriptor) = registry.get(layer) {
                    phrases.push(format!(
                        "Showing {} on the map.",
                        descriptor.title.to_lowercase()
                    ));
                }
            }
            Intent::HideLayer { layer } => {
                if let Some(descriptor) = registry.get(layer) {
                    phrases.push(format!("Hiding {}.", descriptor.title.to_lowercase()));
                }
            }
            Intent::ClearAll => phrases.push("Clearing map overlays.".to_string()),
        }
    }
    if phrases.is_empty() {
        None
    } else {
        Some(phrases.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{dedup_names, grounding_block, GroundingSource, LayerDescriptor};
    use regex::Regex;
    use std::sync::Arc;

    /// In-memory layer: renders the same block shape as the live builders.
    struct StaticNames {
        label: &'static str,
        names: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl GroundingSource for StaticNames {
        async fn build(&self, max_items: usize) -> String {
            let unique = dedup_names(self.names.iter().map(|s| s.to_string()));
            let summary = format!("{}: {} total.", self.label, unique.len());
            grounding_block(&summary, &unique, max_items)
        }
    }

    fn descriptor(
        key: &str,
        title: &str,
        synonyms: &[&str],
        label: &'static str,
        names: Vec<&'static str>,
    ) -> LayerDescriptor {
        LayerDescriptor {
            key: key.to_string(),
            title: title.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            total_pattern: Regex::new(r":\s*(\d+)\s*total").unwrap(),
            source: Arc::new(StaticNames { label, names }),
        }
    }

    fn test_registry() -> LayerRegistry {
        LayerRegistry::new(vec![
            descriptor(
                "dengue",
                "Dengue Hotspots",
                &["hotspot", "cluster", "clusters"],
                "Latest dengue clusters",
                vec!["Tampines Ave 4", "Yishun St 81"],
            ),
            descriptor(
                "planning",
                "Planning Areas (2019)",
                &["planning area", "planning", "boundary", "boundaries"],
                "Planning areas (year=2019)",
                vec!["Bedok", "Tampines", "Woodlands"],
            ),
        ])
    }

    #[tokio::test]
    async fn list_reply_renders_titled_bulleted_sections() {
        let registry = test_registry();
        let reply = list_reply("list planning areas", &registry).await.unwrap();
        assert_eq!(
            reply,
            "Planning Areas (2019):\n- Bedok\n- Tampines\n- Woodlands"
        );
    }

    #[tokio::test]
    async fn list_reply_covers_all_layers_when_none_matched() {
        let registry = test_registry();
        let reply = list_reply("list", &registry).await.unwrap();
        assert!(reply.contains("Dengue Hotspots:"));
        assert!(reply.contains("Planning Areas (2019):"));
    }

    #[tokio::test]
    async fn list_reply_requires_the_lexical_cue_and_some_lines() {
        let registry = test_registry();
        assert!(list_reply("how are you", &registry).await.is_none());

        let empty = LayerRegistry::new(vec![descriptor(
            "dengue",
            "Dengue Hotspots",
            &["cluster"],
            "Latest dengue clusters",
            vec![],
        )]);
        assert!(list_reply("list clusters", &empty).await.is_none());
    }

    #[tokio::test]
    async fn summary_reply_uses_totals_and_examples() {
        let registry = test_registry();
        let reply = summary_reply("summarize planning", &registry).await.unwrap();
        assert_eq!(
            reply,
            "Planning Areas (2019): 3 items. Examples: Bedok, Tampines, Woodlands."
        );
    }

    #[tokio::test]
    async fn summary_reply_skips_zero_count_layers() {
        let registry = LayerRegistry::new(vec![descriptor(
            "dengue",
            "Dengue Hotspots",
            &["cluster"],
            "Latest dengue clusters",
            vec![],
        )]);
        assert!(summary_reply("summary of clusters", &registry).await.is_none());
    }

    #[test]
    fn phrases_follow_intent_order() {
        let registry = test_registry();
        let intents = vec![
            Intent::ClearAll,
            Intent::show("dengue"),
            Intent::hide("planning"),
        ];
        assert_eq!(
            intent_phrases(&intents, &registry).unwrap(),
            "Clearing map overlays. Showing dengue hotspots on the map. Hiding planning areas (2019)."
        );
        assert!(intent_phrases(&[], &registry).is_none());
    }
}
