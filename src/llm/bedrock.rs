//! Claude v2 on Amazon Bedrock via `invoke-with-response-stream`.
//!
//! Requests authenticate with a Bedrock API key sent as a bearer token.

use std::sync::Arc;

use base64::Engine as _;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stream::{EventMessage, EventStreamDecoder};
use super::{emit_token, http_client, ChainCallback, ChatModel, ChatResponse, SamplingSettings};
use crate::prompt::{ChatMessage, Role};
use crate::{Error, Result};

pub(crate) fn runtime_url(region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com")
}

pub(crate) fn bearer_headers(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
        headers.insert(AUTHORIZATION, value);
    }
    headers
}

#[derive(Clone)]
pub struct BedrockClaude {
    http_client: reqwest::Client,
    endpoint: String,
    token: String,
    model: String,
    settings: SamplingSettings,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    prompt: String,
    max_tokens_to_sample: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    bytes: String,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    completion: String,
}

#[derive(Debug, Deserialize)]
struct ExceptionBody {
    #[serde(default)]
    message: String,
}

impl BedrockClaude {
    pub fn new(region: &str, token: &str, model: &str, settings: SamplingSettings) -> Result<Self> {
        Ok(Self {
            http_client: http_client()?,
            endpoint: runtime_url(region),
            token: token.to_string(),
            model: model.to_string(),
            settings,
        })
    }

    fn stream_url(&self) -> String {
        format!("{}/model/{}/invoke-with-response-stream", self.endpoint, self.model)
    }
}

/// Claude text-completion prompt: system text first, then alternating turns,
/// ending with an open assistant turn.
pub(crate) fn to_completion_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        match message.role {
            Role::System => prompt.push_str(&message.content),
            Role::User => {
                prompt.push_str("\n\nHuman: ");
                prompt.push_str(&message.content);
            }
            Role::Assistant => {
                prompt.push_str("\n\nAssistant: ");
                prompt.push_str(&message.content);
            }
        }
    }
    prompt.push_str("\n\nAssistant:");
    prompt
}

/// Completion text carried by one stream event.
pub(crate) fn decode_event(message: &EventMessage) -> Result<Option<String>> {
    if message.header_str(":message-type") == Some("exception") {
        let kind = message.header_str(":exception-type").unwrap_or("exception").to_string();
        let body: ExceptionBody = serde_json::from_slice(&message.payload).unwrap_or(ExceptionBody { message: String::new() });
        return Err(Error::Stream(format!("bedrock {kind}: {}", body.message)));
    }
    if message.header_str(":event-type") != Some("chunk") { return Ok(None); }

    let envelope: ChunkEnvelope = serde_json::from_slice(&message.payload)?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(envelope.bytes.as_bytes())
        .map_err(|e| Error::Stream(format!("invalid chunk encoding: {e}")))?;
    let chunk: CompletionChunk = serde_json::from_slice(&raw)?;
    Ok(Some(chunk.completion).filter(|t| !t.is_empty()))
}

#[async_trait::async_trait]
impl ChatModel for BedrockClaude {
    fn name(&self) -> &str { "bedrock" }

    fn model(&self) -> &str { &self.model }

    fn settings(&self) -> &SamplingSettings { &self.settings }

    async fn invoke(&self, messages: &[ChatMessage], callbacks: &[Arc<dyn ChainCallback>]) -> Result<ChatResponse> {
        let url = self.stream_url();
        debug!(%url, "sending bedrock completion request");
        let request = CompletionRequest {
            prompt: to_completion_prompt(messages),
            max_tokens_to_sample: self.settings.max_tokens.unwrap_or(1024),
            temperature: self.settings.temperature,
        };

        let response = self.http_client.post(&url).headers(bearer_headers(&self.token)).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api { provider: "bedrock", status: status.as_u16(), message });
        }

        let mut content = String::new();
        let mut decoder = EventStreamDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            for message in decoder.push(&chunk?)? {
                if let Some(token) = decode_event(&message)? {
                    emit_token(callbacks, &token);
                    content.push_str(&token);
                }
            }
        }
        if decoder.has_partial_frame() {
            return Err(Error::Stream("bedrock stream ended mid-frame".to_string()));
        }

        for cb in callbacks { cb.on_llm_end(&content); }
        Ok(ChatResponse { content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::stream::tests::frame;
    use crate::llm::testing::{serve_once, Recorder};
    use crate::llm::CLAUDE_V2_MODEL;

    fn chunk_frame(text: &str) -> Vec<u8> {
        let inner = serde_json::json!({"completion": text, "stop_reason": null}).to_string();
        let payload = serde_json::json!({"bytes": base64::engine::general_purpose::STANDARD.encode(inner)}).to_string();
        frame(&[(":event-type", "chunk"), (":content-type", "application/json"), (":message-type", "event")], payload.as_bytes())
    }

    fn chunk_event(text: &str) -> EventMessage {
        EventStreamDecoder::new().push(&chunk_frame(text)).unwrap().remove(0)
    }

    async fn invoke_against(status: u16, body: Vec<u8>, recorder: &Arc<Recorder>) -> (Result<ChatResponse>, String) {
        let (endpoint, requests) = serve_once(status, "application/vnd.amazon.eventstream", body);
        let client = BedrockClaude {
            http_client: http_client().unwrap(),
            endpoint,
            token: "bedrock-key".into(),
            model: CLAUDE_V2_MODEL.into(),
            settings: SamplingSettings { max_tokens: Some(1024), ..SamplingSettings::deterministic() },
        };
        let callbacks: Vec<Arc<dyn ChainCallback>> = vec![recorder.clone()];
        let result = client.invoke(&[ChatMessage::user("Wer war Sozzini?")], &callbacks).await;
        (result, requests.recv().unwrap())
    }

    #[tokio::test]
    async fn test_invoke_decodes_event_stream() {
        let recorder = Arc::new(Recorder::default());
        let mut body = chunk_frame(" Fausto");
        body.extend(chunk_frame(" Sozzini"));
        let (result, request) = invoke_against(200, body, &recorder).await;

        assert_eq!(result.unwrap().content, " Fausto Sozzini");
        assert_eq!(*recorder.tokens.lock().unwrap(), vec![" Fausto".to_string(), " Sozzini".to_string()]);
        assert_eq!(recorder.ended.lock().unwrap().as_deref(), Some(" Fausto Sozzini"));
        assert!(request.starts_with("POST /model/anthropic.claude-v2/invoke-with-response-stream "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer bedrock-key"));
        assert!(request.contains(r#""max_tokens_to_sample":1024"#));
    }

    #[tokio::test]
    async fn test_invoke_fails_on_truncated_frame() {
        let recorder = Arc::new(Recorder::default());
        let mut body = chunk_frame(" Fausto");
        let second = chunk_frame(" Sozzini");
        body.extend_from_slice(&second[..second.len() / 2]);
        let (result, _) = invoke_against(200, body, &recorder).await;

        assert!(matches!(result, Err(Error::Stream(msg)) if msg.contains("mid-frame")));
        assert_eq!(*recorder.tokens.lock().unwrap(), vec![" Fausto".to_string()]);
        assert_eq!(*recorder.ended.lock().unwrap(), None);
    }

    #[tokio::test]
    async fn test_invoke_maps_status_to_api_error() {
        let recorder = Arc::new(Recorder::default());
        let (result, _) = invoke_against(403, br#"{"message":"Invalid API key"}"#.to_vec(), &recorder).await;

        assert!(matches!(result, Err(Error::Api { provider: "bedrock", status: 403, message }) if message.contains("Invalid API key")));
    }

    #[test]
    fn test_completion_prompt_format() {
        let messages = vec![ChatMessage::system("Sei präzise."), ChatMessage::user("Wer war Fausto Sozzini?")];
        assert_eq!(to_completion_prompt(&messages), "Sei präzise.\n\nHuman: Wer war Fausto Sozzini?\n\nAssistant:");
    }

    #[test]
    fn test_decode_chunk_event() {
        assert_eq!(decode_event(&chunk_event(" Fausto")).unwrap(), Some(" Fausto".to_string()));
        assert_eq!(decode_event(&chunk_event("")).unwrap(), None);
    }

    #[test]
    fn test_decode_exception_event() {
        let bytes = frame(
            &[(":message-type", "exception"), (":exception-type", "throttlingException")],
            br#"{"message":"Too many requests"}"#,
        );
        let message = EventStreamDecoder::new().push(&bytes).unwrap().remove(0);
        let err = decode_event(&message).unwrap_err();
        assert!(matches!(err, Error::Stream(msg) if msg.contains("throttlingException") && msg.contains("Too many requests")));
    }

    #[test]
    fn test_stream_url() {
        let client = BedrockClaude::new("eu-central-1", "t", "anthropic.claude-v2", SamplingSettings::deterministic()).unwrap();
        assert_eq!(
            client.stream_url(),
            "https://bedrock-runtime.eu-central-1.amazonaws.com/model/anthropic.claude-v2/invoke-with-response-stream"
        );
    }
}
