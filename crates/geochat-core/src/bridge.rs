//! Azure OpenAI bridge: the only model backend.
//!
//! `AzureOpenAiConfig::from_env()` returning `None` is a recognized mode
//! ("model unconfigured"), not an error: the caller selects the pure
//! rule-based path. Transport and payload failures surface as `BridgeError`
//! and are absorbed at the orchestrator boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
const PLAIN_TIMEOUT: Duration = Duration::from_secs(15);
const TOOL_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API error {0}: {1}")]
    Status(u16, String),
    #[error("model response parse failed: {0}")]
    Parse(String),
}

/// One chat message in the OpenAI-compatible wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A structured action invocation returned by the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    /// Parsed arguments; an empty object when the argument string was
    /// missing or malformed, so one bad call never fails the response.
    pub arguments: Value,
}

/// Parsed model output: free text and/or action invocations.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub text: Option<String>,
    pub calls: Vec<ToolInvocation>,
    /// Older response formats carry a single `function_call` instead of
    /// `tool_calls`; kept separate so callers only consult it when the
    /// primary shape produced nothing.
    pub legacy_call: Option<ToolInvocation>,
}

/// Model backend seam: one chat completion, optionally offered tool schemas.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<Value>>,
    ) -> Result<ModelReply, BridgeError>;
}

/// Optional Azure AI Search attachment for knowledge grounding.
#[derive(Debug, Clone)]
pub struct SearchGrounding {
    pub endpoint: String,
    pub index: String,
    pub api_key: String,
}

impl SearchGrounding {
    fn from_env() -> Option<Self> {
        Some(Self {
            endpoint: std::env::var("AZURE_SEARCH_ENDPOINT").ok()?,
            index: std::env::var("AZURE_SEARCH_INDEX").ok()?,
            api_key: std::env::var("AZURE_SEARCH_API_KEY").ok()?,
        })
    }

    fn data_source(&self) -> Value {
        serde_json::json!({
            "type": "azure_search",
            "parameters": {
                "endpoint": self.endpoint,
                "index_name": self.index,
                "authentication": { "type": "api_key", "key": self.api_key },
                "in_scope": true,
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct AzureOpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub search: Option<SearchGrounding>,
}

impl AzureOpenAiConfig {
    /// `None` unless endpoint, key, and deployment are all present.
    pub fn from_env() -> Option<Self> {
        let endpoint = non_empty_env("AZURE_OPENAI_ENDPOINT")?;
        let api_key = non_empty_env("AZURE_OPENAI_API_KEY")?;
        let deployment = non_empty_env("AZURE_OPENAI_DEPLOYMENT")?;
        Some(Self {
            endpoint,
            api_key,
            deployment,
            api_version: std::env::var("AZURE_OPENAI_API_VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            search: SearchGrounding::from_env(),
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let value = value.trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub struct AzureOpenAi {
    config: AzureOpenAiConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct AzureChatRequest {
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_sources: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct AzureChatResponse {
    #[serde(default)]
    choices: Vec<AzureChoice>,
}

#[derive(Deserialize)]
struct AzureChoice {
    message: Option<AzureMessage>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AzureMessage {
    content: Option<String>,
    tool_calls: Vec<AzureToolCall>,
    function_call: Option<AzureFunction>,
}

#[derive(Deserialize)]
struct AzureToolCall {
    function: Option<AzureFunction>,
}

#[derive(Deserialize)]
struct AzureFunction {
    name: Option<String>,
    arguments: Option<String>,
}

impl AzureOpenAi {
    pub fn new(config: AzureOpenAiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Option<Self> {
        AzureOpenAiConfig::from_env().map(Self::new)
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment,
            self.config.api_version
        )
    }
}

#[async_trait::async_trait]
impl ModelBackend for AzureOpenAi {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<Value>>,
    ) -> Result<ModelReply, BridgeError> {
        let with_tools = tools.is_some();
        let body = AzureChatRequest {
            messages,
            tool_choice: tools.as_ref().map(|_| "auto"),
            data_sources: if with_tools {
                self.config
                    .search
                    .as_ref()
                    .map(|s| vec![s.data_source()])
            } else {
                None
            },
            tools,
            temperature: 0.2,
            top_p: 0.9,
        };

        let res = self
            .http
            .post(self.url())
            .header("api-key", &self.config.api_key)
            .timeout(if with_tools { TOOL_TIMEOUT } else { PLAIN_TIMEOUT })
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(BridgeError::Status(status.as_u16(), text));
        }

        let parsed: AzureChatResponse =
            serde_json::from_str(&text).map_err(|e| BridgeError::Parse(e.to_string()))?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .unwrap_or_default();

        Ok(ModelReply {
            text: message
                .content
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            calls: message
                .tool_calls
                .into_iter()
                .filter_map(|c| c.function.and_then(into_invocation))
                .collect(),
            legacy_call: message.function_call.and_then(into_invocation),
        })
    }
}

fn into_invocation(function: AzureFunction) -> Option<ToolInvocation> {
    let name = function.name?;
    let arguments = function
        .arguments
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some(ToolInvocation { name, arguments })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_arguments_collapse_to_empty_object() {
        let inv = into_invocation(AzureFunction {
            name: Some("show_layer".to_string()),
            arguments: Some("{not json".to_string()),
        })
        .unwrap();
        assert_eq!(inv.arguments, Value::Object(Default::default()));
    }

    #[test]
    fn response_parse_covers_tool_calls_and_legacy_shape() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": "  Showing it now.  ",
                    "tool_calls": [
                        { "function": { "name": "show_layer", "arguments": "{\"layer\":\"dengue\",\"fit\":true}" } }
                    ],
                    "function_call": { "name": "clear_all", "arguments": "{}" }
                }
            }]
        }"#;
        let parsed: AzureChatResponse = serde_json::from_str(raw).unwrap();
        let message = parsed.choices.into_iter().next().unwrap().message.unwrap();
        let reply = ModelReply {
            text: message.content.map(|c| c.trim().to_string()),
            calls: message
                .tool_calls
                .into_iter()
                .filter_map(|c| c.function.and_then(into_invocation))
                .collect(),
            legacy_call: message.function_call.and_then(into_invocation),
        };
        assert_eq!(reply.text.as_deref(), Some("Showing it now."));
        assert_eq!(reply.calls.len(), 1);
        assert_eq!(reply.calls[0].name, "show_layer");
        assert_eq!(reply.legacy_call.as_ref().unwrap().name, "clear_all");
    }
}
