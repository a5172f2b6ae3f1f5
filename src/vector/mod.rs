//! Retrieval over an existing Neo4j vector index.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::document::Document;
use crate::embeddings::Embeddings;
use crate::graph::{GraphStore, Row};
use crate::{Error, Result};

const EMBEDDING_NODE_PROPERTY: &str = "embedding";
const DIMENSION_PROBE: &str = "foo";

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn get_relevant_documents(&self, query: &str) -> Result<Vec<Document>>;
}

pub struct Neo4jVector {
    graph: Arc<dyn GraphStore>,
    embeddings: Arc<dyn Embeddings>,
    index_name: String,
    retrieval_query: String,
}

/// Used when no retrieval query is configured: the text property plus the node's other properties.
pub fn default_retrieval_query(text_node_property: &str) -> String {
    format!(
        "RETURN node.`{text_node_property}` AS text, score, node {{.*, `{text_node_property}`: Null, `{EMBEDDING_NODE_PROPERTY}`: Null, id: Null }} AS metadata"
    )
}

impl Neo4jVector {
    /// Attach to `index_name`, failing if it is missing or was built for another dimension.
    pub async fn from_existing_index(
        embeddings: Arc<dyn Embeddings>,
        graph: Arc<dyn GraphStore>,
        index_name: &str,
        text_node_property: &str,
        retrieval_query: &str,
    ) -> Result<Self> {
        let mut params = Map::new();
        params.insert("index_name".into(), json!(index_name));
        let rows = graph
            .query(
                "SHOW INDEXES YIELD name, type, options WHERE type = 'VECTOR' AND name = $index_name RETURN name, options",
                params,
            )
            .await?;
        let Some(index) = rows.into_iter().next() else { return Err(Error::IndexNotFound(index_name.to_string())) };

        if let Some(actual) = index_dimension(&index) {
            let expected = embeddings.embed_query(DIMENSION_PROBE).await?.len();
            if actual != expected {
                return Err(Error::DimensionMismatch { index: index_name.to_string(), expected, actual });
            }
        }

        let retrieval_query = if retrieval_query.trim().is_empty() {
            default_retrieval_query(text_node_property)
        } else {
            retrieval_query.to_string()
        };
        info!(index = %index_name, "connected to vector index");
        Ok(Self { graph, embeddings, index_name: index_name.to_string(), retrieval_query })
    }

    pub fn index_name(&self) -> &str { &self.index_name }

    pub fn search_query(&self) -> String {
        format!(
            "CALL db.index.vector.queryNodes($index, $k, $embedding) YIELD node, score\n{}",
            self.retrieval_query
        )
    }

    pub async fn similarity_search_with_score(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        let embedding = self.embeddings.embed_query(query).await?;
        let mut params = Map::new();
        params.insert("index".into(), json!(self.index_name));
        params.insert("k".into(), json!(k));
        params.insert("embedding".into(), json!(embedding));
        let rows = self.graph.query(&self.search_query(), params).await?;
        debug!(hits = rows.len(), "vector search finished");
        rows.into_iter().map(row_to_document).collect()
    }

    pub fn as_retriever(self, k: usize) -> VectorRetriever {
        VectorRetriever { store: self, k }
    }
}

fn index_dimension(index: &Row) -> Option<usize> {
    index
        .get("options")?
        .get("indexConfig")?
        .get("vector.dimensions")?
        .as_u64()
        .map(|d| d as usize)
}

fn row_to_document(mut row: Row) -> Result<Document> {
    let page_content = match row.remove("text") {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => {
            return Err(Error::Store("retrieval query must return a non-null `text` column".to_string()))
        }
        Some(other) => other.to_string(),
    };
    let metadata = match row.remove("metadata") {
        Some(Value::Object(map)) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Map::new(),
    };
    let score = row.get("score").and_then(Value::as_f64).map(|s| s as f32);
    Ok(Document { page_content, metadata, score })
}

pub struct VectorRetriever {
    store: Neo4jVector,
    k: usize,
}

impl VectorRetriever {
    pub fn k(&self) -> usize { self.k }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn get_relevant_documents(&self, query: &str) -> Result<Vec<Document>> {
        self.store.similarity_search_with_score(query, self.k).await
    }
}
