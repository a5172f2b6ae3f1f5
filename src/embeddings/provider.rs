//! Embedding clients for the hosted services and for a local Ollama server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::bedrock::{bearer_headers, runtime_url};
use crate::llm::http_client;
use crate::{Error, Result};

/// Turns text into a vector.
#[async_trait]
pub trait Embeddings: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

async fn check_status(provider: &'static str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() { return Ok(response); }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Api { provider, status: status.as_u16(), message })
}

fn non_empty(provider: &str, vector: Option<Vec<f32>>) -> Result<Vec<f32>> {
    vector
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Embedding(format!("empty embedding from {provider}")))
}

pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiData {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Embeddings for OpenAiEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.endpoint);
        let request = OpenAiRequest { model: &self.model, input: vec![text] };
        let response = self.client.post(&url).bearer_auth(&self.api_key).json(&request).send().await?;
        let result: OpenAiResponse = check_status("openai", response).await?.json().await?;
        non_empty("openai", result.data.into_iter().next().map(|d| d.embedding))
    }

    fn model_name(&self) -> &str { &self.model }
}

/// Titan text embeddings on Bedrock.
pub struct BedrockEmbeddings {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TitanRequest<'a> {
    input_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TitanResponse {
    embedding: Vec<f32>,
}

impl BedrockEmbeddings {
    pub fn new(region: &str, token: &str, model: &str) -> Result<Self> {
        Ok(Self { client: http_client()?, endpoint: runtime_url(region), token: token.to_string(), model: model.to_string() })
    }
}

#[async_trait]
impl Embeddings for BedrockEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/model/{}/invoke", self.endpoint, self.model);
        let response = self
            .client
            .post(&url)
            .headers(bearer_headers(&self.token))
            .json(&TitanRequest { input_text: text })
            .send()
            .await?;
        let result: TitanResponse = check_status("bedrock", response).await?.json().await?;
        non_empty("bedrock", Some(result.embedding))
    }

    fn model_name(&self) -> &str { &self.model }
}

pub struct GoogleEmbeddings {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

impl GoogleEmbeddings {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Embeddings for GoogleEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/{}:embedContent", self.endpoint, self.model);
        let request = EmbedContentRequest { model: &self.model, content: Content { parts: vec![Part { text }] } };
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let result: EmbedContentResponse = check_status("google", response).await?.json().await?;
        non_empty("google", Some(result.embedding.values))
    }

    fn model_name(&self) -> &str { &self.model }
}

/// Self-hosted model served by Ollama's `/api/embed`.
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddings {
    pub fn new(endpoint: &str, model: &str) -> Result<Self> {
        Ok(Self { client: http_client()?, endpoint: endpoint.trim_end_matches('/').to_string(), model: model.to_string() })
    }
}

#[async_trait]
impl Embeddings for OllamaEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.endpoint);
        let request = OllamaRequest { model: &self.model, input: vec![text] };
        let response = self.client.post(&url).json(&request).send().await?;
        let result: OllamaResponse = check_status("ollama", response).await?.json().await?;
        non_empty("ollama", result.embeddings.into_iter().next())
    }

    fn model_name(&self) -> &str { &self.model }
}
