use serde::{Deserialize, Serialize};
use std::env;

use crate::{Error, Result};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// On-disk settings. Secrets never live here; see [`ProviderConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub llm: Option<String>,
    pub embedding_model: Option<String>,
    pub ollama_base_url: Option<String>,
    #[serde(default)]
    pub neo4j: StoreSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreSection {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&data)?;
        Ok(cfg)
    }
}

/// Settings and credentials handed to the provider selectors.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Only required when a local chat model is selected.
    pub ollama_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub aws_region: Option<String>,
    pub aws_bearer_token: Option<String>,
    pub google_api_key: Option<String>,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            ollama_base_url: lookup("OLLAMA_BASE_URL"),
            openai_api_key: lookup("OPENAI_API_KEY"),
            openai_base_url: lookup("OPENAI_BASE_URL"),
            aws_region: lookup("AWS_REGION"),
            aws_bearer_token: lookup("AWS_BEARER_TOKEN_BEDROCK"),
            google_api_key: lookup("GOOGLE_API_KEY"),
        }
    }

    pub fn with_ollama_base_url(mut self, url: impl Into<String>) -> Self {
        self.ollama_base_url = Some(url.into());
        self
    }

    pub fn openai_base_url(&self) -> &str {
        self.openai_base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL)
    }

    pub fn aws_region(&self) -> &str {
        self.aws_region.as_deref().unwrap_or(DEFAULT_AWS_REGION)
    }

    pub(crate) fn require_openai_key(&self) -> Result<&str> {
        self.openai_api_key.as_deref().ok_or(Error::MissingConfig("openai_api_key"))
    }

    pub(crate) fn require_aws_token(&self) -> Result<&str> {
        self.aws_bearer_token.as_deref().ok_or(Error::MissingConfig("aws_bearer_token"))
    }

    pub(crate) fn require_google_key(&self) -> Result<&str> {
        self.google_api_key.as_deref().ok_or(Error::MissingConfig("google_api_key"))
    }
}

/// Connection parameters for the Neo4j store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl StoreConfig {
    /// File values win over `NEO4J_*` variables; database defaults to `neo4j`.
    pub fn resolve(section: &StoreSection) -> Result<Self> {
        Self::resolve_with(section, |key| env::var(key).ok())
    }

    pub fn resolve_with(section: &StoreSection, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pick = |value: &Option<String>, var: &str| value.clone().or_else(|| lookup(var));
        Ok(Self {
            url: pick(&section.url, "NEO4J_URI").ok_or_else(|| Error::MissingEnv("NEO4J_URI".into()))?,
            username: pick(&section.username, "NEO4J_USERNAME").ok_or_else(|| Error::MissingEnv("NEO4J_USERNAME".into()))?,
            password: pick(&section.password, "NEO4J_PASSWORD").ok_or_else(|| Error::MissingEnv("NEO4J_PASSWORD".into()))?,
            database: pick(&section.database, "NEO4J_DATABASE").unwrap_or_else(|| "neo4j".to_string()),
        })
    }
}

/// Corpus-specific settings of the retrieval chain, validated once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalSettings {
    /// Free text describing the corpus, shown to the model.
    pub prompt_context: String,
    pub label: String,
    pub property_text: String,
    /// Cypher appended after the vector index call; must return `text`, `score`, `metadata`.
    pub retrieval_query: String,
}

impl RetrievalSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).ok_or_else(|| Error::MissingEnv(key.to_string()));
        Ok(Self {
            prompt_context: get("PROMPT_CONTEXT")?,
            label: get("LABEL")?,
            property_text: get("PROPERTY_TEXT")?,
            retrieval_query: get("RETRIEVAL_QUERY")?,
        })
    }

    pub fn index_name(&self) -> String {
        format!("{}_index", self.label.to_lowercase())
    }
}
