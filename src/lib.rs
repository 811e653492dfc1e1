//! Retrieval-augmented question answering over a pre-indexed book corpus.

pub mod conversations;
pub mod core;
pub mod llm;
pub mod rag;
pub mod server;
pub mod state;
pub mod synthesis;
