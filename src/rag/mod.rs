//! Answer chains: the model on its own, and the model grounded in vector-index hits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{RetrievalSettings, StoreConfig};
use crate::document::{reduce_below_limit, stuff_documents, total_tokens, Document};
use crate::embeddings::Embeddings;
use crate::graph::{GraphStore, Neo4jGraph};
use crate::llm::{ChainCallback, ChatModel};
use crate::prompt::{vars_from_pairs, ChatPrompt, TemplateVars};
use crate::vector::{Neo4jVector, Retriever};
use crate::Result;

pub mod prompts;

pub const RETRIEVAL_K: usize = 2;
pub const MAX_TOKENS_LIMIT: usize = 3375;

/// Result of one chain call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOutput {
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaOutput {
    pub answer: String,
    pub sources: String,
}

/// Prompt in, model reply out, wrapped in a [`ChainOutput`].
#[derive(Clone)]
pub struct LlmOnlyChain {
    llm: Arc<dyn ChatModel>,
    prompt: ChatPrompt,
}

pub fn configure_llm_only_chain(llm: Arc<dyn ChatModel>) -> LlmOnlyChain {
    LlmOnlyChain { llm, prompt: prompts::llm_only_prompt() }
}

impl LlmOnlyChain {
    pub fn prompt(&self) -> &ChatPrompt { &self.prompt }

    /// `prompt` replaces the default historian prompt; it receives the `question` variable.
    pub async fn generate(
        &self,
        question: &str,
        callbacks: &[Arc<dyn ChainCallback>],
        prompt: Option<&ChatPrompt>,
    ) -> Result<ChainOutput> {
        self.generate_with(&vars_from_pairs(&[("question", question)]), callbacks, prompt).await
    }

    /// Like [`generate`](Self::generate) for prompts that need more than `question`.
    pub async fn generate_with(
        &self,
        vars: &TemplateVars,
        callbacks: &[Arc<dyn ChainCallback>],
        prompt: Option<&ChatPrompt>,
    ) -> Result<ChainOutput> {
        let prompt = prompt.unwrap_or(&self.prompt);
        let messages = prompt.render(vars)?;
        let response = self.llm.invoke(&messages, callbacks).await?;
        Ok(ChainOutput { answer: response.content })
    }
}

/// Stuffs every document into a single prompt and asks once.
pub struct StuffQaChain {
    llm: Arc<dyn ChatModel>,
    prompt: ChatPrompt,
    prompt_context: String,
}

impl StuffQaChain {
    pub fn new(llm: Arc<dyn ChatModel>, prompt_context: impl Into<String>) -> Self {
        Self { llm, prompt: prompts::qa_prompt(), prompt_context: prompt_context.into() }
    }

    pub async fn run(&self, docs: &[Document], question: &str, callbacks: &[Arc<dyn ChainCallback>]) -> Result<String> {
        let summaries = stuff_documents(docs);
        let vars = vars_from_pairs(&[
            ("prompt_context", self.prompt_context.as_str()),
            ("summaries", summaries.as_str()),
            ("question", question),
        ]);
        let messages = self.prompt.render(&vars)?;
        Ok(self.llm.invoke(&messages, callbacks).await?.content)
    }
}

/// Split a reply at its first `SOURCES:` marker (case-insensitive, `SOURCE:` too).
pub fn split_sources(text: &str) -> (String, String) {
    let lower = text.to_ascii_lowercase();
    let marker = lower.match_indices("source").find_map(|(i, m)| {
        let rest = &lower[i + m.len()..];
        if rest.starts_with("s:") {
            Some((i, i + m.len() + 2))
        } else if rest.starts_with(':') {
            Some((i, i + m.len() + 1))
        } else {
            None
        }
    });
    let Some((start, end)) = marker else { return (text.to_string(), String::new()) };
    let sources = text[end..].lines().next().unwrap_or("").trim().to_string();
    (text[..start].trim_end().to_string(), sources)
}

/// Retrieval-augmented QA with sources.
pub struct KnowledgeGraphQa {
    combine: StuffQaChain,
    retriever: Box<dyn Retriever>,
    reduce_k_below_max_tokens: bool,
    max_tokens_limit: usize,
}

impl KnowledgeGraphQa {
    pub fn new(combine: StuffQaChain, retriever: Box<dyn Retriever>) -> Self {
        Self { combine, retriever, reduce_k_below_max_tokens: false, max_tokens_limit: MAX_TOKENS_LIMIT }
    }

    pub fn with_token_limit(mut self, max_tokens_limit: usize, reduce_k_below_max_tokens: bool) -> Self {
        self.max_tokens_limit = max_tokens_limit;
        self.reduce_k_below_max_tokens = reduce_k_below_max_tokens;
        self
    }

    pub fn max_tokens_limit(&self) -> usize { self.max_tokens_limit }

    async fn documents(&self, question: &str) -> Result<Vec<Document>> {
        let docs = self.retriever.get_relevant_documents(question).await?;
        debug!(count = docs.len(), "retrieved documents");
        if self.reduce_k_below_max_tokens {
            return Ok(reduce_below_limit(docs, self.max_tokens_limit));
        }
        let tokens = total_tokens(&docs);
        if tokens > self.max_tokens_limit {
            warn!(tokens, limit = self.max_tokens_limit, "retrieved context exceeds the token limit, sending it unreduced");
        }
        Ok(docs)
    }

    pub async fn answer(&self, question: &str, callbacks: &[Arc<dyn ChainCallback>]) -> Result<QaOutput> {
        let docs = self.documents(question).await?;
        let reply = self.combine.run(&docs, question, callbacks).await?;
        let (answer, sources) = split_sources(&reply);
        Ok(QaOutput { answer, sources })
    }
}

/// Connects to the configured Neo4j store and its existing vector index.
pub async fn configure_qa_rag_chain(
    llm: Arc<dyn ChatModel>,
    embeddings: Arc<dyn Embeddings>,
    store: &StoreConfig,
    retrieval: &RetrievalSettings,
) -> Result<KnowledgeGraphQa> {
    let graph: Arc<dyn GraphStore> = Arc::new(Neo4jGraph::new(store)?);
    configure_qa_rag_chain_with_graph(llm, embeddings, graph, retrieval).await
}

pub async fn configure_qa_rag_chain_with_graph(
    llm: Arc<dyn ChatModel>,
    embeddings: Arc<dyn Embeddings>,
    graph: Arc<dyn GraphStore>,
    retrieval: &RetrievalSettings,
) -> Result<KnowledgeGraphQa> {
    let index_name = retrieval.index_name();
    let vector = Neo4jVector::from_existing_index(
        embeddings,
        graph,
        &index_name,
        &retrieval.property_text,
        &retrieval.retrieval_query,
    )
    .await?;
    info!(index = %index_name, k = RETRIEVAL_K, "retrieval chain ready");
    let combine = StuffQaChain::new(llm, retrieval.prompt_context.clone());
    Ok(KnowledgeGraphQa::new(combine, Box::new(vector.as_retriever(RETRIEVAL_K))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, SamplingSettings};
    use crate::prompt::{ChatMessage, MessageTemplate, Role};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct RecordingLlm {
        reply: String,
        settings: SamplingSettings,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl RecordingLlm {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: reply.to_string(), settings: SamplingSettings::deterministic(), seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ChatModel for RecordingLlm {
        fn name(&self) -> &str { "recording" }
        fn model(&self) -> &str { "recording" }
        fn settings(&self) -> &SamplingSettings { &self.settings }

        async fn invoke(&self, messages: &[ChatMessage], callbacks: &[Arc<dyn ChainCallback>]) -> Result<ChatResponse> {
            self.seen.lock().unwrap().push(messages.to_vec());
            for word in self.reply.split_inclusive(' ') {
                for cb in callbacks { cb.on_llm_new_token(word); }
            }
            Ok(ChatResponse { content: self.reply.clone() })
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<String>);

    impl ChainCallback for Collect {
        fn on_llm_new_token(&self, token: &str) { self.0.lock().unwrap().push_str(token); }
    }

    struct StaticRetriever(Vec<Document>);

    #[async_trait]
    impl Retriever for StaticRetriever {
        async fn get_relevant_documents(&self, _query: &str) -> Result<Vec<Document>> { Ok(self.0.clone()) }
    }

    #[tokio::test]
    async fn test_llm_only_output_has_single_answer_field() {
        let llm = RecordingLlm::new("Fausto Sozzini starb 1604.");
        let chain = configure_llm_only_chain(llm.clone());
        assert_eq!(chain.prompt().messages().len(), 2);
        assert_eq!(chain.prompt().messages()[1].template, prompts::QUESTION_TEMPLATE);
        let out = chain.generate("Wann starb Sozzini?", &[], None).await.unwrap();
        assert_eq!(out.answer, "Fausto Sozzini starb 1604.");

        let value = serde_json::to_value(&out).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["answer"]);

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][0].role, Role::System);
        assert!(seen[0][0].content.contains("Ich weiß es nicht"));
        assert_eq!(seen[0][1], ChatMessage::user("Wann starb Sozzini?"));
    }

    #[tokio::test]
    async fn test_llm_only_custom_prompt_and_callbacks() {
        let llm = RecordingLlm::new("kurz und bündig");
        let chain = configure_llm_only_chain(llm.clone());
        let prompt = ChatPrompt::new(vec![MessageTemplate::system("Antworte knapp."), MessageTemplate::user(">> {question}")]);
        let collector = Arc::new(Collect::default());
        let callbacks: Vec<Arc<dyn ChainCallback>> = vec![collector.clone()];

        let out = chain.generate("Was ist Rakow?", &callbacks, Some(&prompt)).await.unwrap();
        assert_eq!(out.answer, "kurz und bündig");
        assert_eq!(*collector.0.lock().unwrap(), "kurz und bündig");
        assert_eq!(llm.seen.lock().unwrap()[0], vec![ChatMessage::system("Antworte knapp."), ChatMessage::user(">> Was ist Rakow?")]);
    }

    #[test]
    fn test_split_sources() {
        let (answer, sources) = split_sources("Die Antwort.\nSOURCES: https://e.org/1, https://e.org/2\nmehr");
        assert_eq!(answer, "Die Antwort.");
        assert_eq!(sources, "https://e.org/1, https://e.org/2");

        let (answer, sources) = split_sources("Text\nSource: brief-7");
        assert_eq!((answer.as_str(), sources.as_str()), ("Text", "brief-7"));

        let (answer, sources) = split_sources("Resourceful answer without a marker");
        assert_eq!(answer, "Resourceful answer without a marker");
        assert_eq!(sources, "");
    }

    #[tokio::test]
    async fn test_qa_stuffs_documents_into_prompt() {
        let llm = RecordingLlm::new("Ruarus schrieb aus Danzig.\nSOURCES: https://e.org/12");
        let docs = vec![
            Document::new("Brief von Ruarus").with_metadata("source", "https://e.org/12"),
            Document::new("Antwort aus Rakow").with_metadata("source", "https://e.org/13"),
        ];
        let qa = KnowledgeGraphQa::new(StuffQaChain::new(llm.clone(), "dem Briefwechsel"), Box::new(StaticRetriever(docs)));
        assert_eq!(qa.max_tokens_limit(), MAX_TOKENS_LIMIT);

        let out = qa.answer("Woher schrieb Ruarus?", &[]).await.unwrap();
        assert_eq!(out, QaOutput { answer: "Ruarus schrieb aus Danzig.".into(), sources: "https://e.org/12".into() });

        let seen = llm.seen.lock().unwrap();
        let system = &seen[0][0].content;
        assert!(system.contains("Zusammenfassungen aus dem Briefwechsel sowie"));
        assert!(system.contains("----\nContent: Brief von Ruarus\nSource: https://e.org/12\n\nContent: Antwort aus Rakow\nSource: https://e.org/13\n----"));
        assert_eq!(seen[0][1].content, "Frage:```Woher schrieb Ruarus?```");
    }

    #[tokio::test]
    async fn test_token_limit_without_reduction_keeps_documents() {
        let docs = vec![Document::new("eins zwei drei"), Document::new("vier fünf")];
        let llm = RecordingLlm::new("ok");
        let qa = KnowledgeGraphQa::new(StuffQaChain::new(llm.clone(), "x"), Box::new(StaticRetriever(docs.clone()))).with_token_limit(3, false);
        assert_eq!(qa.documents("q").await.unwrap().len(), 2);

        let qa = KnowledgeGraphQa::new(StuffQaChain::new(llm, "x"), Box::new(StaticRetriever(docs))).with_token_limit(3, true);
        assert_eq!(qa.documents("q").await.unwrap().len(), 1);
    }
}
