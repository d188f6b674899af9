pub mod fastembed;
pub mod hash;

use anyhow::Result;

use crate::config::{Config, EmbeddingsBackend};

pub trait Embedder {
    fn dim(&self) -> usize;
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Builds the embedder selected by `EMBEDDINGS_BACKEND`.
///
/// FastEmbed downloads its model into `embeddings_model_dir` on first use;
/// the hash backend needs no model and is what tests run with.
pub fn create_embedder(config: &Config) -> Result<Box<dyn Embedder + Send>> {
    match config.embeddings_backend {
        EmbeddingsBackend::FastEmbed => Ok(Box::new(fastembed::FastEmbedder::new(
            config.embedding_model_name(),
            config.embeddings_model_dir.as_deref(),
            config.embeddings_device,
        )?)),
        EmbeddingsBackend::Hash => Ok(Box::new(hash::HashEmbedder::new(
            config.hash_embedding_dim,
        ))),
    }
}
