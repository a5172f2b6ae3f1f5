use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use graphqa::config::{Config, ProviderConfig, RetrievalSettings, StoreConfig};
use graphqa::embeddings::load_embedding_model;
use graphqa::graph::Neo4jGraph;
use graphqa::llm::{load_llm, ChainCallback};
use graphqa::rag::{configure_llm_only_chain, configure_qa_rag_chain};
use graphqa::ticket::generate_ticket;

#[derive(Parser, Debug)]
#[command(name = "graphqa", about = "Question answering over a Neo4j knowledge graph")]
struct Cli {
    /// Optional path to a config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chat model: gpt-4, gpt-3.5, claudev2 or a local Ollama model name
    #[arg(long, global = true)]
    llm: Option<String>,

    /// Embedding model: openai, aws, google-genai-embedding-001 or a local model name
    #[arg(long, global = true)]
    embedding_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask the model directly, streaming the reply
    Ask { question: String },
    /// Answer from the vector index, with sources
    Rag { question: String },
    /// Rewrite a question as a ticket in the style of the top stored questions
    Ticket { question: String },
}

struct StdoutStream;

impl ChainCallback for StdoutStream {
    fn on_llm_new_token(&self, token: &str) {
        print!("{token}");
        let _ = std::io::stdout().flush();
    }

    fn on_llm_end(&self, _text: &str) {
        println!();
    }
}

fn spinner(message: &'static str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message);
    Ok(pb)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let llm_name = cli.llm.or(cfg.llm).or_else(|| std::env::var("LLM").ok()).unwrap_or_default();
    let embedding_name = cli
        .embedding_model
        .or(cfg.embedding_model)
        .or_else(|| std::env::var("EMBEDDING_MODEL").ok())
        .unwrap_or_default();
    let mut providers = ProviderConfig::from_env();
    if let Some(url) = cfg.ollama_base_url {
        providers = providers.with_ollama_base_url(url);
    }

    match cli.command {
        Commands::Ask { question } => {
            let pb = spinner("Loading chat model...")?;
            let chain = configure_llm_only_chain(load_llm(&llm_name, &providers)?);
            pb.finish_and_clear();

            println!("{}", "Answer".green().bold());
            let callbacks: Vec<Arc<dyn ChainCallback>> = vec![Arc::new(StdoutStream)];
            chain.generate(&question, &callbacks, None).await?;
        }
        Commands::Rag { question } => {
            let pb = spinner("Connecting to the vector index...")?;
            let retrieval = RetrievalSettings::from_env()?;
            let store = StoreConfig::resolve(&cfg.neo4j)?;
            let llm = load_llm(&llm_name, &providers)?;
            let (embeddings, dimension) = load_embedding_model(&embedding_name, &providers).await?;
            tracing::debug!(dimension, "embedding model ready");
            let qa = configure_qa_rag_chain(llm, embeddings, &store, &retrieval).await?;
            pb.set_message("Retrieving and answering...");
            let out = qa.answer(&question, &[]).await?;
            pb.finish_and_clear();

            println!("{}\n{}\n", "Answer".green().bold(), out.answer);
            println!("{}\n{}", "Sources".cyan().bold(), out.sources);
        }
        Commands::Ticket { question } => {
            let pb = spinner("Drafting ticket...")?;
            let store = StoreConfig::resolve(&cfg.neo4j)?;
            let graph = Neo4jGraph::new(&store)?;
            let chain = configure_llm_only_chain(load_llm(&llm_name, &providers)?);
            let ticket = generate_ticket(&graph, &chain, &question).await?;
            pb.finish_and_clear();

            println!("{} {}", "Title:".green().bold(), ticket.title);
            println!("{}\n{}", "Question:".green().bold(), ticket.question);
        }
    }

    Ok(())
}
