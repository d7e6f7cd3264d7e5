//! Local embedding generation backing the tiered memory's vector retrieval.

pub mod embeddings;

pub use embeddings::{EmbeddingEngine, EMBEDDING_BLOB_SIZE, EMBEDDING_DIM};
