//! Chat pipeline: the chain runner that ties orchestrator, rule-based
//! extraction, and deterministic fallbacks into one never-empty response.
//!
//! Resolution order for the reply, first non-empty wins:
//! model free text -> second plain model call -> list tier -> summary tier ->
//! intent phrases -> static message. The static message applies only when the
//! tool-calling round did not produce a result object; a resolved round with
//! nothing else applicable is the single case where the reply may stay empty.

use crate::fallback::{intent_phrases, list_reply, summary_reply, STATIC_REPLY};
use crate::intent::{classify_intents, Intent};
use crate::layers::LayerRegistry;
use crate::orchestrator::{enrich, grounding_context, Orchestrator, ToolOutcome};
use serde::Serialize;
use std::sync::Arc;

/// Listing budget for the per-request grounding context.
const CHAT_CONTEXT_ITEMS: usize = 100;
/// Smaller per-layer budget for the one-shot welcome context.
const WELCOME_CONTEXT_ITEMS: usize = 60;
/// Budget when only totals are needed for the no-model welcome.
const WELCOME_TOTALS_ITEMS: usize = 30;

const EMPTY_MESSAGE_REPLY: &str = "Please type a question.";

const WELCOME_PREAMBLE: &str = "Welcome. Explore the map to see available layers, \
and ask the assistant for quick summaries or lists.";

/// Per-request result; intents may be empty, the reply almost never is.
#[derive(Debug, Serialize)]
pub struct ChatResult {
    pub reply: String,
    pub intents: Vec<Intent>,
}

/// Pass/fail smoke report for the model backend, off the hot path.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub configured: bool,
    pub tool_calling_ok: bool,
    pub tool_detail: String,
    pub basic_chat_ok: bool,
    pub basic_detail: String,
}

pub struct ChatPipeline {
    registry: Arc<LayerRegistry>,
    orchestrator: Orchestrator,
}

impl ChatPipeline {
    pub fn new(registry: Arc<LayerRegistry>, orchestrator: Orchestrator) -> Self {
        Self {
            registry,
            orchestrator,
        }
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    /// Resolves one inbound message to a reply plus map intents.
    pub async fn chat(&self, message: &str) -> ChatResult {
        if message.is_empty() {
            return ChatResult {
                reply: EMPTY_MESSAGE_REPLY.to_string(),
                intents: Vec::new(),
            };
        }

        let lower = message.to_lowercase();

        // Unconfigured is a recognized mode: pure rule-based path, no
        // grounding assembly and no model round-trips at all.
        if !self.orchestrator.is_configured() {
            tracing::debug!("model backend not configured; rule-based path");
            return self.rule_based(message, &lower).await;
        }

        let context = grounding_context(&self.registry, CHAT_CONTEXT_ITEMS).await;
        let enriched = enrich(message, &context);

        match self.orchestrator.resolve(&enriched, &self.registry).await {
            ToolOutcome::Answered(exchange) => {
                let intents = if exchange.intents.is_empty() {
                    classify_intents(message, &self.registry)
                } else {
                    exchange.intents
                };
                let reply = match exchange.text {
                    Some(text) => text,
                    None => match self.orchestrator.plain_reply(&enriched).await {
                        Some(text) => text,
                        None => self.deterministic_reply(&lower, &intents).await,
                    },
                };
                ChatResult { reply, intents }
            }
            ToolOutcome::Failed(e) => {
                tracing::warn!("tool-calling round failed: {e}");
                let intents = classify_intents(message, &self.registry);
                let mut reply = match self.orchestrator.plain_reply(&enriched).await {
                    Some(text) => text,
                    None => self.deterministic_reply(&lower, &intents).await,
                };
                if reply.is_empty() {
                    reply = STATIC_REPLY.to_string();
                }
                ChatResult { reply, intents }
            }
            ToolOutcome::Unconfigured => self.rule_based(message, &lower).await,
        }
    }

    /// No-model branch: rule-based intents plus the deterministic tiers,
    /// always ending in the static message.
    async fn rule_based(&self, message: &str, lower: &str) -> ChatResult {
        let intents = classify_intents(message, &self.registry);
        let mut reply = self.deterministic_reply(lower, &intents).await;
        if reply.is_empty() {
            reply = STATIC_REPLY.to_string();
        }
        ChatResult { reply, intents }
    }

    /// Shared deterministic tail of the chain: list, summary, and phrase
    /// tiers in order. Empty string when nothing applies.
    async fn deterministic_reply(&self, lower: &str, intents: &[Intent]) -> String {
        if let Some(reply) = list_reply(lower, &self.registry).await {
            return reply;
        }
        if let Some(reply) = summary_reply(lower, &self.registry).await {
            return reply;
        }
        if let Some(reply) = intent_phrases(intents, &self.registry) {
            return reply;
        }
        String::new()
    }

    /// One-shot welcome: model summary over a smaller grounding context,
    /// else a sentence computed purely from registry totals. Never empty.
    pub async fn welcome(&self) -> String {
        let mut contexts = Vec::new();
        for layer in self.registry.layers() {
            contexts.push(layer.source.build(WELCOME_CONTEXT_ITEMS).await);
        }
        let prompt = format!(
            "Using the live context below about Singapore dengue clusters and planning areas, \
             write a brief 1-2 sentence welcome. Summarize the current hotspot situation and \
             invite the user to toggle layers or ask questions.\n\nContext:\n{}",
            contexts.join("\n\n")
        );
        if let Some(reply) = self.orchestrator.plain_reply(&prompt).await {
            return reply;
        }

        let mut bits = Vec::new();
        for layer in self.registry.layers() {
            let context = layer.source.build(WELCOME_TOTALS_ITEMS).await;
            if let Some(total) = layer.total_from(&context) {
                bits.push(format!("{} {}", total, layer.title.to_lowercase()));
            }
        }
        if bits.is_empty() {
            WELCOME_PREAMBLE.to_string()
        } else {
            format!(
                "{WELCOME_PREAMBLE} For context, currently tracked: {}.",
                bits.join(", ")
            )
        }
    }

    /// Smoke test: one tool-calling round and one plain completion.
    pub async fn health(&self) -> HealthReport {
        if !self.orchestrator.is_configured() {
            let detail = "Missing AZURE_OPENAI_* env vars".to_string();
            return HealthReport {
                configured: false,
                tool_calling_ok: false,
                tool_detail: detail.clone(),
                basic_chat_ok: false,
                basic_detail: detail,
            };
        }

        let (tool_calling_ok, tool_detail) = match self
            .orchestrator
            .resolve("show dengue layer and hide planning", &self.registry)
            .await
        {
            ToolOutcome::Answered(ex) if ex.text.is_some() || !ex.intents.is_empty() => {
                (true, String::new())
            }
            ToolOutcome::Answered(_) => (
                false,
                "No response or empty output from tool-calling".to_string(),
            ),
            ToolOutcome::Failed(e) => (false, format!("Exception: {e}")),
            ToolOutcome::Unconfigured => unreachable!("checked above"),
        };

        let (basic_chat_ok, basic_detail) = match self
            .orchestrator
            .plain_reply("Say in one short sentence")
            .await
        {
            Some(_) => (true, String::new()),
            None => (false, "Empty reply".to_string()),
        };

        HealthReport {
            configured: true,
            tool_calling_ok,
            tool_detail,
            basic_chat_ok,
            basic_detail,
        }
    }
}
