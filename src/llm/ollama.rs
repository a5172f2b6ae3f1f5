use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stream::LineDecoder;
use super::{emit_token, http_client, ChainCallback, ChatModel, ChatResponse, SamplingSettings};
use crate::prompt::ChatMessage;
use crate::{Error, Result};

#[derive(Clone)]
pub struct OllamaChat {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    settings: SamplingSettings,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChat {
    pub fn new(base_url: &str, model: &str, settings: SamplingSettings) -> Result<Self> {
        Ok(Self {
            http_client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            settings,
        })
    }

    fn options(&self) -> Options {
        Options {
            temperature: self.settings.temperature,
            top_k: self.settings.top_k,
            top_p: self.settings.top_p,
            num_ctx: self.settings.num_ctx,
        }
    }
}

/// One NDJSON line: `(token, done)`.
pub(crate) fn parse_ndjson_line(line: &str) -> Result<(Option<String>, bool)> {
    if line.trim().is_empty() { return Ok((None, false)); }
    let chunk: ChatChunk = serde_json::from_str(line)?;
    if let Some(message) = chunk.error {
        return Err(Error::Stream(format!("ollama: {message}")));
    }
    let token = chunk.message.map(|m| m.content).filter(|t| !t.is_empty());
    Ok((token, chunk.done))
}

fn absorb(line: &str, content: &mut String, callbacks: &[Arc<dyn ChainCallback>]) -> Result<bool> {
    let (token, done) = parse_ndjson_line(line)?;
    if let Some(token) = token {
        emit_token(callbacks, &token);
        content.push_str(&token);
    }
    Ok(done)
}

#[async_trait::async_trait]
impl ChatModel for OllamaChat {
    fn name(&self) -> &str { "ollama" }

    fn model(&self) -> &str { &self.model }

    fn settings(&self) -> &SamplingSettings { &self.settings }

    async fn invoke(&self, messages: &[ChatMessage], callbacks: &[Arc<dyn ChainCallback>]) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, model = %self.model, "sending ollama chat request");
        let request = ChatRequest { model: &self.model, messages, stream: self.settings.streaming, options: self.options() };

        let response = self.http_client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api { provider: "ollama", status: status.as_u16(), message });
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
            return Err(Error::Stream("ollama stream ended before completion".to_string()));
        }

        for cb in callbacks { cb.on_llm_end(&content); }
        Ok(ChatResponse { content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{serve_once, Recorder};
    use crate::llm::LlmProvider;

    #[test]
    fn test_parse_ndjson_line() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":"Ja"},"done":false}"#;
        assert_eq!(parse_ndjson_line(line).unwrap(), (Some("Ja".to_string()), false));
        let last = r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true,"eval_count":12}"#;
        assert_eq!(parse_ndjson_line(last).unwrap(), (None, true));
        assert!(matches!(parse_ndjson_line(r#"{"error":"model not found"}"#), Err(Error::Stream(_))));
    }

    #[test]
    fn test_options_carry_local_sampling() {
        let provider = LlmProvider::Ollama { model: "llama3".into(), base_url: "http://127.0.0.1:11434".into() };
        let chat = OllamaChat::new("http://127.0.0.1:11434/", "llama3", provider.settings()).unwrap();
        let value = serde_json::to_value(chat.options()).unwrap();
        assert_eq!(value, serde_json::json!({"temperature": 0.0, "top_k": 10, "top_p": 0.3_f32, "num_ctx": 3072}));
        assert_eq!(chat.base_url, "http://127.0.0.1:11434");
    }

    fn line(text: &str, done: bool) -> String {
        format!("{}\n", serde_json::json!({"model": "llama3", "message": {"role": "assistant", "content": text}, "done": done}))
    }

    async fn invoke_against(status: u16, body: String, recorder: &Arc<Recorder>) -> (Result<ChatResponse>, String) {
        let (base_url, requests) = serve_once(status, "application/x-ndjson", body.into_bytes());
        let settings = LlmProvider::Ollama { model: "llama3".into(), base_url: base_url.clone() }.settings();
        let client = OllamaChat::new(&base_url, "llama3", settings).unwrap();
        let callbacks: Vec<Arc<dyn ChainCallback>> = vec![recorder.clone()];
        let result = client.invoke(&[ChatMessage::user("Wer war Ruarus?")], &callbacks).await;
        (result, requests.recv().unwrap())
    }

    #[tokio::test]
    async fn test_invoke_streams_until_done() {
        let recorder = Arc::new(Recorder::default());
        // The final object arrives without a trailing newline.
        let body = format!("{}{}{}", line("Ein ", false), line("Gelehrter", false), line("", true).trim_end());
        let (result, request) = invoke_against(200, body, &recorder).await;

        assert_eq!(result.unwrap().content, "Ein Gelehrter");
        assert_eq!(*recorder.tokens.lock().unwrap(), vec!["Ein ".to_string(), "Gelehrter".to_string()]);
        assert_eq!(recorder.ended.lock().unwrap().as_deref(), Some("Ein Gelehrter"));
        assert!(request.starts_with("POST /api/chat "));
        assert!(request.contains(r#""num_ctx":3072"#));
    }

    #[tokio::test]
    async fn test_invoke_fails_when_stream_is_cut_short() {
        let recorder = Arc::new(Recorder::default());
        let (result, _) = invoke_against(200, line("Ein ", false), &recorder).await;

        assert!(matches!(result, Err(Error::Stream(msg)) if msg.contains("ended before completion")));
        assert_eq!(*recorder.ended.lock().unwrap(), None);
    }

    #[tokio::test]
    async fn test_invoke_surfaces_in_stream_error() {
        let recorder = Arc::new(Recorder::default());
        let body = format!("{}{{\"error\":\"out of memory\"}}\n", line("Ein ", false));
        let (result, _) = invoke_against(200, body, &recorder).await;

        assert!(matches!(result, Err(Error::Stream(msg)) if msg == "ollama: out of memory"));
    }

    #[tokio::test]
    async fn test_invoke_maps_status_to_api_error() {
        let recorder = Arc::new(Recorder::default());
        let (result, _) = invoke_against(404, r#"{"error":"model 'llama3' not found"}"#.to_string(), &recorder).await;

        assert!(matches!(result, Err(Error::Api { provider: "ollama", status: 404, .. })));
    }
}
