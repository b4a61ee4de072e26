//! Tool-calling orchestrator: negotiates structured map actions with the
//! model, grounded in freshly built per-layer context.
//!
//! The action schema is generated per request from the live registry, so the
//! model can only ever reference layers that actually exist right now. Layer
//! keys the model invents anyway are dropped at the parse boundary.

use crate::bridge::{BridgeError, ChatMessage, ModelBackend, ModelReply, ToolInvocation};
use crate::intent::Intent;
use crate::layers::LayerRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a tool-calling attempt. `Unconfigured` and `Failed` are kept
/// distinct so callers can log configuration gaps differently from transient
/// faults; both select the deterministic fallback path.
#[derive(Debug)]
pub enum ToolOutcome {
    Unconfigured,
    Failed(BridgeError),
    Answered(ToolExchange),
}

/// A successful exchange: optional free text plus parsed intents.
#[derive(Debug, Default)]
pub struct ToolExchange {
    pub text: Option<String>,
    pub intents: Vec<Intent>,
}

pub struct Orchestrator {
    backend: Option<Arc<dyn ModelBackend>>,
}

impl Orchestrator {
    pub fn new(backend: Option<Arc<dyn ModelBackend>>) -> Self {
        Self { backend }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// One tool-calling round over the grounding-enriched message.
    pub async fn resolve(&self, enriched: &str, registry: &LayerRegistry) -> ToolOutcome {
        let backend = match &self.backend {
            Some(b) => b,
            None => return ToolOutcome::Unconfigured,
        };
        let tools = tool_specs(registry);
        let reply = match backend
            .chat(vec![ChatMessage::user(enriched)], Some(tools))
            .await
        {
            Ok(reply) => reply,
            Err(e) => return ToolOutcome::Failed(e),
        };
        ToolOutcome::Answered(parse_exchange(reply, registry))
    }

    /// Plain (non-tool) completion; `None` when unconfigured, failed, or empty.
    pub async fn plain_reply(&self, enriched: &str) -> Option<String> {
        let backend = self.backend.as_ref()?;
        match backend.chat(vec![ChatMessage::user(enriched)], None).await {
            Ok(reply) => reply.text,
            Err(e) => {
                tracing::warn!("plain model call failed: {e}");
                None
            }
        }
    }
}

/// Concatenates every layer's context block and the grounding instructions.
pub async fn grounding_context(registry: &LayerRegistry, max_items: usize) -> String {
    let mut sections = Vec::new();
    for layer in registry.layers() {
        sections.push(layer.source.build(max_items).await);
    }
    format!(
        "Context from live API data (use for answers):\n{}\n\n\
         Instructions: Answer strictly using the context lists above for available layers. \
         When asked to list items, provide a concise bullet or numbered list from the context. \
         If a layer has no context, say that data is currently unavailable. Keep answers short.",
        sections.join("\n\n")
    )
}

/// Prepends the grounding blob to the user message.
pub fn enrich(message: &str, context: &str) -> String {
    format!("{context}\n\nUser: {message}")
}

/// The three callable actions, with the `layer` enum recomputed from the
/// live registry on every call.
pub fn tool_specs(registry: &LayerRegistry) -> Vec<Value> {
    let layer_keys = registry.keys();
    vec![
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "show_layer",
                "description": "Show a specific map layer to the user. Use fit=true to fit map to that layer.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "layer": { "type": "string", "enum": layer_keys },
                        "fit": { "type": "boolean", "description": "Whether to fit/zoom to the layer after showing." }
                    },
                    "required": ["layer"],
                    "additionalProperties": false
                }
            }
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "hide_layer",
                "description": "Hide a specific map layer from the user interface.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "layer": { "type": "string", "enum": layer_keys }
                    },
                    "required": ["layer"],
                    "additionalProperties": false
                }
            }
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "clear_all",
                "description": "Clear or remove all overlays from the map.",
                "parameters": { "type": "object", "properties": {}, "additionalProperties": false }
            }
        }),
    ]
}

fn parse_exchange(reply: ModelReply, registry: &LayerRegistry) -> ToolExchange {
    let mut intents: Vec<Intent> = reply
        .calls
        .iter()
        .filter_map(|call| parse_invocation(call, registry, true))
        .collect();

    // Older model response formats: a single function_call, no fit flag.
    if intents.is_empty() {
        if let Some(legacy) = &reply.legacy_call {
            if let Some(intent) = parse_invocation(legacy, registry, false) {
                intents.push(intent);
            }
        }
    }

    ToolExchange {
        text: reply.text,
        intents,
    }
}

/// Maps one action invocation to an intent. Unknown action names and layer
/// keys outside the registry yield `None` — the hallucination boundary.
fn parse_invocation(
    call: &ToolInvocation,
    registry: &LayerRegistry,
    allow_fit: bool,
) -> Option<Intent> {
    match call.name.as_str() {
        "show_layer" => {
            let layer = call.arguments.get("layer").and_then(Value::as_str)?;
            if registry.get(layer).is_none() {
                tracing::debug!("dropping show_layer for unknown layer {layer:?}");
                return None;
            }
            let fit = if allow_fit {
                call.arguments.get("fit").and_then(Value::as_bool)
            } else {
                None
            };
            Some(Intent::ShowLayer {
                layer: layer.to_string(),
                fit,
            })
        }
        "hide_layer" => {
            let layer = call.arguments.get("layer").and_then(Value::as_str)?;
            if registry.get(layer).is_none() {
                tracing::debug!("dropping hide_layer for unknown layer {layer:?}");
                return None;
            }
            Some(Intent::hide(layer))
        }
        "clear_all" => Some(Intent::ClearAll),
        other => {
            tracing::debug!("dropping unknown action {other:?}");
            None
        }
    }
}
