//! OpenAI chat completions client, always streaming.

use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stream::{sse_data, LineDecoder};
use super::{emit_token, http_client, ChainCallback, ChatModel, ChatResponse, SamplingSettings};
use crate::prompt::ChatMessage;
use crate::{Error, Result};

#[derive(Clone)]
pub struct OpenAiChat {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    settings: SamplingSettings,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(base_url: &str, api_key: &str, model: &str, settings: SamplingSettings) -> Result<Self> {
        Ok(Self {
            http_client: http_client()?,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            settings,
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }
}

/// One SSE line: `(token, done)`. Keep-alives and empty deltas carry no token;
/// `[DONE]` ends the stream and an `error` event fails it.
pub(crate) fn parse_sse_line(line: &str) -> Result<(Option<String>, bool)> {
    let Some(data) = sse_data(line) else { return Ok((None, false)) };
    if data.is_empty() { return Ok((None, false)); }
    if data == "[DONE]" { return Ok((None, true)); }
    let chunk: StreamChunk = serde_json::from_str(data)?;
    if let Some(err) = chunk.error {
        let kind = err.kind.unwrap_or_else(|| "error".to_string());
        return Err(Error::Stream(format!("openai {kind}: {}", err.message)));
    }
    let token = chunk.choices.into_iter().next().and_then(|c| c.delta.content).filter(|t| !t.is_empty());
    Ok((token, false))
}

fn absorb(line: &str, content: &mut String, callbacks: &[Arc<dyn ChainCallback>]) -> Result<bool> {
    let (token, done) = parse_sse_line(line)?;
    if let Some(token) = token {
        emit_token(callbacks, &token);
        content.push_str(&token);
    }
    Ok(done)
}

#[async_trait::async_trait]
impl ChatModel for OpenAiChat {
    fn name(&self) -> &str { "openai" }

    fn model(&self) -> &str { &self.model }

    fn settings(&self) -> &SamplingSettings { &self.settings }

    async fn invoke(&self, messages: &[ChatMessage], callbacks: &[Arc<dyn ChainCallback>]) -> Result<ChatResponse> {
        let url = self.chat_completions_url();
        debug!(%url, model = %self.model, "sending chat completion request");
        let request = ChatCompletionsRequest {
            model: &self.model,
            messages,
            temperature: self.settings.temperature,
            stream: self.settings.streaming,
        };

        let response = self.http_client.post(&url).headers(self.build_headers()).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api { provider: "openai", status: status.as_u16(), message });
        }

        let mut content = String::new();
        let mut decoder = LineDecoder::new();
        let mut body = response.bytes_stream();
        let mut done = false;
        while !done {
            let Some(chunk) = body.next().await else { break };
            for line in decoder.push(&chunk?) {
                done |= absorb(&line, &mut content, callbacks)?;
            }
        }
        if !done {
            if let Some(line) = decoder.finish() {
                done = absorb(&line, &mut content, callbacks)?;
            }
        }
        if !done {
            return Err(Error::Stream("openai stream ended before completion".to_string()));
        }

        for cb in callbacks { cb.on_llm_end(&content); }
        Ok(ChatResponse { content })
    }
}
