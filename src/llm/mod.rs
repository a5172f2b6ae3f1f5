use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::ProviderConfig;
use crate::prompt::ChatMessage;
use crate::{Error, Result};

pub mod bedrock;
pub mod ollama;
pub mod openai;
pub mod stream;
#[cfg(test)]
mod testing;

pub use bedrock::BedrockClaude;
pub use ollama::OllamaChat;
pub use openai::OpenAiChat;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Observes a chat model's output while it streams in.
pub trait ChainCallback: Send + Sync {
    fn on_llm_new_token(&self, token: &str);

    fn on_llm_end(&self, _text: &str) {}
}

pub(crate) fn emit_token(callbacks: &[Arc<dyn ChainCallback>], token: &str) {
    for cb in callbacks { cb.on_llm_new_token(token); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
}

/// Sampling parameters a provider was configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingSettings {
    pub temperature: f32,
    pub streaming: bool,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub num_ctx: Option<u32>,
    pub max_tokens: Option<u32>,
}

impl SamplingSettings {
    pub fn deterministic() -> Self {
        Self { temperature: 0.0, streaming: true, top_k: None, top_p: None, num_ctx: None, max_tokens: None }
    }
}

#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn settings(&self) -> &SamplingSettings;

    /// Send the messages, forward streamed tokens to `callbacks`, return the full reply.
    async fn invoke(&self, messages: &[ChatMessage], callbacks: &[Arc<dyn ChainCallback>]) -> Result<ChatResponse>;
}

pub const GPT4_MODEL: &str = "gpt-4";
pub const GPT35_MODEL: &str = "gpt-3.5-turbo";
pub const CLAUDE_V2_MODEL: &str = "anthropic.claude-v2";

/// Chat model chosen by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    Gpt4,
    Gpt35,
    ClaudeV2,
    /// Any other non-empty name, served by Ollama.
    Ollama { model: String, base_url: String },
}

impl LlmProvider {
    /// Exact names first; every other non-empty name is taken as a local model,
    /// and the empty name falls back to GPT-3.5.
    pub fn from_name(name: &str, config: &ProviderConfig) -> Result<Self> {
        match name {
            "gpt-4" => Ok(Self::Gpt4),
            "gpt-3.5" => Ok(Self::Gpt35),
            "claudev2" => Ok(Self::ClaudeV2),
            "" => Ok(Self::Gpt35),
            model => {
                let base_url = config.ollama_base_url.clone().ok_or(Error::MissingConfig("ollama_base_url"))?;
                Ok(Self::Ollama { model: model.to_string(), base_url })
            }
        }
    }

    pub fn settings(&self) -> SamplingSettings {
        match self {
            Self::Gpt4 | Self::Gpt35 => SamplingSettings::deterministic(),
            Self::ClaudeV2 => SamplingSettings { max_tokens: Some(1024), ..SamplingSettings::deterministic() },
            Self::Ollama { .. } => SamplingSettings {
                top_k: Some(10),
                top_p: Some(0.3),
                num_ctx: Some(3072),
                ..SamplingSettings::deterministic()
            },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Gpt4 => "GPT-4".to_string(),
            Self::Gpt35 => "GPT-3.5".to_string(),
            Self::ClaudeV2 => "ClaudeV2".to_string(),
            Self::Ollama { model, .. } => format!("Ollama: {model}"),
        }
    }

    pub fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
        let settings = self.settings();
        let model: Arc<dyn ChatModel> = match self {
            Self::Gpt4 => Arc::new(OpenAiChat::new(config.openai_base_url(), config.require_openai_key()?, GPT4_MODEL, settings)?),
            Self::Gpt35 => Arc::new(OpenAiChat::new(config.openai_base_url(), config.require_openai_key()?, GPT35_MODEL, settings)?),
            Self::ClaudeV2 => Arc::new(BedrockClaude::new(config.aws_region(), config.require_aws_token()?, CLAUDE_V2_MODEL, settings)?),
            Self::Ollama { model, base_url } => Arc::new(OllamaChat::new(base_url, model, settings)?),
        };
        Ok(model)
    }
}

pub fn load_llm(name: &str, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
    let provider = LlmProvider::from_name(name, config)?;
    info!("LLM: Using {}", provider.describe());
    provider.build(config)
}
