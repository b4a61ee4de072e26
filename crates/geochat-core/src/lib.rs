//! geochat-core: conversational orchestration over live OneMap layers.
//!
//! The registry (`layers`) is the single source of truth for which map layers
//! exist; the orchestrator negotiates tool calls with Azure OpenAI when
//! configured, and the pipeline guarantees a usable reply through an ordered
//! fallback chain when the model is absent, failing, or silent.

pub mod bridge;
pub mod fallback;
pub mod intent;
pub mod layers;
pub mod onemap;
pub mod orchestrator;
pub mod pipeline;

pub use bridge::{AzureOpenAi, AzureOpenAiConfig, BridgeError, ModelBackend};
pub use intent::{classify_intents, Intent};
pub use layers::{GroundingSource, LayerDescriptor, LayerRegistry};
pub use onemap::{feature_collection, Feature, OneMapClient, OneMapError};
pub use orchestrator::{Orchestrator, ToolExchange, ToolOutcome};
pub use pipeline::{ChatPipeline, ChatResult, HealthReport};
