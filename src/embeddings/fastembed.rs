use crate::config::EmbeddingsDevice;
use crate::embeddings::Embedder;
use anyhow::{anyhow, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::Path;

#[cfg(target_os = "macos")]
use ort::execution_providers::CoreMLExecutionProvider;

const SUPPORTED_MODELS: &[(&str, usize)] = &[
    ("BAAI/bge-base-en-v1.5", 768),
    ("BAAI/bge-small-en-v1.5", 384),
    ("sentence-transformers/all-MiniLM-L6-v2", 384),
    ("jinaai/jina-embeddings-v2-base-code", 768),
];

pub struct FastEmbedder {
    model: TextEmbedding,
    dim: usize,
}

impl FastEmbedder {
    pub fn new(
        model_name: &str,
        cache_dir: Option<&Path>,
        device: EmbeddingsDevice,
    ) -> Result<Self> {
        let model_enum = match model_name {
            "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "sentence-transformers/all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            "jinaai/jina-embeddings-v2-base-code" => EmbeddingModel::JinaEmbeddingsV2BaseCode,
            _ => {
                let supported: Vec<&str> = SUPPORTED_MODELS.iter().map(|(name, _)| *name).collect();
                return Err(anyhow!(
                    "Unsupported model for FastEmbed: {}. Supported: {}",
                    model_name,
                    supported.join(", ")
                ));
            }
        };
        let dim = SUPPORTED_MODELS
            .iter()
            .find(|(name, _)| *name == model_name)
            .map(|(_, dim)| *dim)
            .unwrap_or(768);

        let mut options = InitOptions::new(model_enum);
        if let Some(path) = cache_dir {
            options = options.with_cache_dir(path.to_path_buf());
        }

        match device {
            EmbeddingsDevice::Metal => {
                #[cfg(target_os = "macos")]
                {
                    tracing::info!("Initializing FastEmbed with Metal (CoreML) acceleration");
                    let coreml = CoreMLExecutionProvider::default();
                    options = options.with_execution_providers(vec![coreml.into()]);
                }
                #[cfg(not(target_os = "macos"))]
                {
                    tracing::warn!("Metal device requested but not on macOS - falling back to CPU");
                }
            }
            EmbeddingsDevice::Cpu => {
                tracing::debug!(model = %model_name, "Initializing FastEmbed on CPU");
            }
        }

        let model = TextEmbedding::try_new(options)
            .map_err(|e| anyhow!("Failed to initialize FastEmbed: {}", e))?;

        Ok(Self { model, dim })
    }
}

impl Embedder for FastEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| anyhow!("Embedding failed: {}", e))
    }
}
