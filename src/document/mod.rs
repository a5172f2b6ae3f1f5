use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// A retrieved node: its text plus whatever the retrieval query attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub score: Option<f32>,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self { page_content: page_content.into(), metadata: Map::new(), score: None }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The `source` metadata entry, or empty when the retrieval query didn't return one.
    pub fn source(&self) -> String {
        match self.metadata.get("source") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn has_source(&self) -> bool { !self.source().is_empty() }

    pub fn token_estimate(&self) -> usize { estimate_tokens(&self.page_content) }
}

/// Very simple word-based token approximation.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn format_document(doc: &Document) -> String {
    format!("Content: {}\nSource: {}", doc.page_content, doc.source())
}

/// Concatenate every document into one prompt block.
pub fn stuff_documents(docs: &[Document]) -> String {
    let unsourced = docs.iter().filter(|d| !d.has_source()).count();
    if unsourced > 0 {
        warn!(unsourced, total = docs.len(), "documents without `source` metadata are cited with an empty source");
    }
    docs.iter().map(format_document).collect::<Vec<_>>().join("\n\n")
}

pub fn total_tokens(docs: &[Document]) -> usize {
    docs.iter().map(Document::token_estimate).sum()
}

/// Drop trailing documents until the estimate fits under `limit`.
pub fn reduce_below_limit(mut docs: Vec<Document>, limit: usize) -> Vec<Document> {
    while !docs.is_empty() && total_tokens(&docs) > limit {
        docs.pop();
    }
    docs
}
