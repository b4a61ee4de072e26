//! Layer registry: the single source of truth for which map layers exist.
//!
//! Each layer is a `LayerDescriptor` pairing display metadata and trigger
//! synonyms with a `GroundingSource` that renders a compact, line-oriented
//! context block from live data. The chat pipeline, the rule-based extractor,
//! and the tool-calling schema are all driven off this registry, so adding a
//! layer means adding one descriptor here and nothing else.

use crate::onemap::OneMapClient;
use regex::Regex;
use std::sync::Arc;

/// Renders grounding text for one layer.
///
/// Contract: the first line carries the full deduplicated count (matching the
/// descriptor's `total_pattern`); listing lines are prefixed `- ` and capped
/// at `max_items`. Must absorb upstream failures into a zero-count block.
#[async_trait::async_trait]
pub trait GroundingSource: Send + Sync {
    async fn build(&self, max_items: usize) -> String;
}

/// One registered map layer.
#[derive(Clone)]
pub struct LayerDescriptor {
    pub key: String,
    pub title: String,
    pub synonyms: Vec<String>,
    /// Captures the integer total from the first line of the context block.
    pub total_pattern: Regex,
    pub source: Arc<dyn GroundingSource>,
}

impl LayerDescriptor {
    /// Case-insensitive substring match of the key or any synonym.
    /// `text` must already be lower-cased.
    pub fn matches(&self, text: &str) -> bool {
        if text.contains(self.key.as_str()) {
            return true;
        }
        self.synonyms.iter().any(|s| text.contains(s.as_str()))
    }

    /// Extracts this layer's total from a context block it produced.
    pub fn total_from(&self, context: &str) -> Option<u64> {
        self.total_pattern
            .captures(context)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Ordered, process-lifetime-fixed set of layers.
pub struct LayerRegistry {
    layers: Vec<LayerDescriptor>,
}

impl LayerRegistry {
    /// Builds a registry. Panics on an empty or duplicate key: both are
    /// registration bugs, caught at construction rather than mid-request.
    pub fn new(layers: Vec<LayerDescriptor>) -> Self {
        for (i, layer) in layers.iter().enumerate() {
            assert!(!layer.key.is_empty(), "layer key must not be empty");
            assert!(
                !layers[..i].iter().any(|l| l.key == layer.key),
                "duplicate layer key: {}",
                layer.key
            );
        }
        Self { layers }
    }

    /// The stock registry: dengue hotspots and 2019 planning areas.
    pub fn onemap(client: Arc<OneMapClient>) -> Self {
        Self::new(vec![
            LayerDescriptor {
                key: "dengue".to_string(),
                title: "Dengue Hotspots".to_string(),
                synonyms: ["dengue", "hotspot", "cluster", "clusters"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                total_pattern: Regex::new(r":\s*(\d+)\s*unique").expect("dengue total pattern"),
                source: Arc::new(DengueGrounding {
                    client: client.clone(),
                }),
            },
            LayerDescriptor {
                key: "planning".to_string(),
                title: "Planning Areas (2019)".to_string(),
                synonyms: ["planning area", "planning", "boundary", "boundaries"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                total_pattern: Regex::new(r":\s*(\d+)\s*total").expect("planning total pattern"),
                source: Arc::new(PlanningGrounding {
                    client,
                    year: "2019".to_string(),
                }),
            },
        ])
    }

    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    pub fn get(&self, key: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|l| l.key == key)
    }

    /// Live key set, recomputed per call so the tool schema always reflects
    /// the current registry.
    pub fn keys(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.key.clone()).collect()
    }

    /// Keys of layers mentioned in the (lower-cased) text; every key when
    /// nothing matched, so layer-less queries still cover the whole map.
    pub fn detect(&self, text: &str) -> Vec<String> {
        let matched: Vec<String> = self
            .layers
            .iter()
            .filter(|l| l.matches(text))
            .map(|l| l.key.clone())
            .collect();
        if matched.is_empty() {
            self.keys()
        } else {
            matched
        }
    }
}

/// Deduplicates by exact string equality, preserving first-seen order.
pub fn dedup_names<I: IntoIterator<Item = String>>(names: I) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    for name in names {
        if seen.insert(name.clone()) {
            unique.push(name);
        }
    }
    unique
}

/// Renders the grounding-block string contract: summary line, then a capped
/// `- ` listing. The summary must already carry the unclamped total.
pub fn grounding_block(summary: &str, unique: &[String], max_items: usize) -> String {
    let shown = unique.len().min(max_items);
    let lines: Vec<String> = unique[..shown].iter().map(|n| format!("- {n}")).collect();
    format!("{summary}\nList (first {shown}):\n{}", lines.join("\n"))
}

struct DengueGrounding {
    client: Arc<OneMapClient>,
}

#[async_trait::async_trait]
impl GroundingSource for DengueGrounding {
    async fn build(&self, max_items: usize) -> String {
        let features = self.client.dengue_features_or_empty().await;
        let unique = dedup_names(features.iter().filter_map(|f| f.dengue_name()));
        let summary = format!("Latest dengue clusters: {} unique clusters.", unique.len());
        grounding_block(&summary, &unique, max_items)
    }
}

struct PlanningGrounding {
    client: Arc<OneMapClient>,
    year: String,
}

#[async_trait::async_trait]
impl GroundingSource for PlanningGrounding {
    async fn build(&self, max_items: usize) -> String {
        let features = self
            .client
            .planning_features_or_empty(Some(&self.year))
            .await;
        let unique = dedup_names(features.iter().filter_map(|f| f.planning_name()));
        let summary = format!("Planning areas (year={}): {} total.", self.year, unique.len());
        grounding_block(&summary, &unique, max_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock_registry() -> LayerRegistry {
        LayerRegistry::onemap(Arc::new(OneMapClient::new(None)))
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let names = ["A", "B", "A", "C"].iter().map(|s| s.to_string());
        assert_eq!(dedup_names(names), vec!["A", "B", "C"]);
    }

    #[test]
    fn total_reflects_full_set_when_listing_is_truncated() {
        // 120 raw entities, 100 unique, listing capped at 50.
        let raw: Vec<String> = (0..120).map(|i| format!("Cluster {}", i % 100)).collect();
        let unique = dedup_names(raw);
        assert_eq!(unique.len(), 100);
        let summary = format!("Latest dengue clusters: {} unique clusters.", unique.len());
        let block = grounding_block(&summary, &unique, 50);
        let first_line = block.lines().next().unwrap();
        assert_eq!(first_line, "Latest dengue clusters: 100 unique clusters.");
        assert_eq!(block.lines().filter(|l| l.starts_with("- ")).count(), 50);

        let registry = stock_registry();
        let dengue = registry.get("dengue").unwrap();
        assert_eq!(dengue.total_from(&block), Some(100));
    }

    #[test]
    fn planning_total_pattern_matches_its_summary_line() {
        let registry = stock_registry();
        let planning = registry.get("planning").unwrap();
        let block = grounding_block(
            "Planning areas (year=2019): 55 total.",
            &["BEDOK".to_string()],
            30,
        );
        assert_eq!(planning.total_from(&block), Some(55));
    }

    #[test]
    fn matches_key_and_synonyms_as_substrings() {
        let registry = stock_registry();
        let dengue = registry.get("dengue").unwrap();
        assert!(dengue.matches("show clusters"));
        assert!(dengue.matches("any dengue hotspots near me?"));
        assert!(!dengue.matches("show planning areas"));
    }

    #[test]
    fn detect_falls_back_to_all_layers() {
        let registry = stock_registry();
        assert_eq!(registry.detect("list planning areas"), vec!["planning"]);
        assert_eq!(registry.detect("list everything"), vec!["dengue", "planning"]);
    }

    #[test]
    #[should_panic(expected = "duplicate layer key")]
    fn duplicate_keys_are_rejected() {
        let registry = stock_registry();
        let mut layers: Vec<LayerDescriptor> = registry.layers().to_vec();
        layers.push(layers[0].clone());
        LayerRegistry::new(layers);
    }
}
