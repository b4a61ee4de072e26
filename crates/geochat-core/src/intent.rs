//! Map-control intents and the rule-based extractor.
//!
//! The extractor is deliberately lexical: show is the default polarity, so a
//! message that mentions a layer with no hide cue is treated as a show
//! request. That over-triggers on purely informational questions ("how many
//! clusters are there?") — a known heuristic limitation, kept as-is because
//! the model path handles nuanced phrasing and this path must never block.

use crate::layers::LayerRegistry;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A structured map-control command, transient per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    ShowLayer {
        layer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fit: Option<bool>,
    },
    HideLayer {
        layer: String,
    },
    ClearAll,
}

impl Intent {
    pub fn show(layer: &str) -> Self {
        Intent::ShowLayer {
            layer: layer.to_string(),
            fit: None,
        }
    }

    pub fn hide(layer: &str) -> Self {
        Intent::HideLayer {
            layer: layer.to_string(),
        }
    }
}

static CLEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(clear|reset|remove\s+all)\b").expect("clear pattern"));

const HIDE_WORDS: &[&str] = &["hide", "off", "remove", "turn off", "disable"];

/// Scans the raw message for lexical cues and emits zero or more intents.
/// A clear cue and a layer mention can legitimately coexist, so the clear
/// check is independent of the per-layer pass.
pub fn classify_intents(message: &str, registry: &LayerRegistry) -> Vec<Intent> {
    let text = message.to_lowercase().trim().to_string();
    let mut intents = Vec::new();

    if CLEAR_RE.is_match(&text) {
        intents.push(Intent::ClearAll);
    }

    let wants_hide = HIDE_WORDS.iter().any(|w| text.contains(w));

    for layer in registry.layers() {
        if layer.matches(&text) {
            intents.push(if wants_hide {
                Intent::hide(&layer.key)
            } else {
                Intent::show(&layer.key)
            });
        }
    }

    intents
}
