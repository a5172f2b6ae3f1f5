//! Cypher access to Neo4j over its HTTP transactional endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::config::StoreConfig;
use crate::llm::http_client;
use crate::{Error, Result};

pub type Row = Map<String, Value>;

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run one Cypher statement; each row maps column name to value.
    async fn query(&self, cypher: &str, params: Map<String, Value>) -> Result<Vec<Row>>;
}

#[derive(Clone)]
pub struct Neo4jGraph {
    client: reqwest::Client,
    commit_url: String,
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TxRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Debug, Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    data: Vec<RowData>,
}

#[derive(Debug, Deserialize)]
struct RowData {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// HTTP base URL for a store address; Bolt schemes map to the default HTTP(S) ports.
pub fn http_base_url(address: &str) -> Result<String> {
    let url = Url::parse(address).map_err(|e| Error::Config(format!("invalid store url {address}: {e}")))?;
    let host = url.host_str().ok_or_else(|| Error::Config(format!("store url {address} has no host")))?;
    let base = match url.scheme() {
        "http" | "https" => address.trim_end_matches('/').to_string(),
        "bolt" | "neo4j" => format!("http://{host}:7474"),
        "bolt+s" | "neo4j+s" | "bolt+ssc" | "neo4j+ssc" => format!("https://{host}:7473"),
        other => return Err(Error::Config(format!("unsupported store url scheme {other}"))),
    };
    Ok(base)
}

fn into_rows(response: TxResponse) -> Result<Vec<Row>> {
    if let Some(err) = response.errors.into_iter().next() {
        return Err(Error::Store(format!("{}: {}", err.code, err.message)));
    }
    let Some(result) = response.results.into_iter().next() else { return Ok(Vec::new()) };
    Ok(result
        .data
        .into_iter()
        .map(|d| result.columns.iter().cloned().zip(d.row).collect::<Row>())
        .collect())
}

impl Neo4jGraph {
    pub fn new(store: &StoreConfig) -> Result<Self> {
        let base = http_base_url(&store.url)?;
        Ok(Self {
            client: http_client()?,
            commit_url: format!("{}/db/{}/tx/commit", base, store.database),
            username: store.username.clone(),
            password: store.password.clone(),
        })
    }

    pub fn commit_url(&self) -> &str { &self.commit_url }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn query(&self, cypher: &str, params: Map<String, Value>) -> Result<Vec<Row>> {
        debug!(url = %self.commit_url, "running cypher statement");
        let request = TxRequest { statements: vec![Statement { statement: cypher, parameters: params }] };
        let response = self
            .client
            .post(&self.commit_url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api { provider: "neo4j", status: status.as_u16(), message });
        }
        into_rows(response.json().await?)
    }
}
