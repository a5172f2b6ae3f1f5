pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod llm;
pub mod prompt;
pub mod rag;
pub mod ticket;
pub mod vector;

pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
