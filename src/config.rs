use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
};

pub const DEFAULT_VECTOR_DB_PATH: &str = "./.ctxeng/vectors";
pub const DEFAULT_EMBEDDINGS_CACHE_DIR: &str = "./.ctxeng/embeddings-cache";
pub const DEFAULT_MODEL_REPO: &str = "BAAI/bge-base-en-v1.5";
pub const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &["pl", "pm", "t"];
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".ctxeng",
    "node_modules",
    "blib",
    "_build",
    "local",
    "vendor",
    "target",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingsDevice {
    Cpu,
    Metal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingsBackend {
    FastEmbed,
    Hash,
}

/// Which structure extraction strategy the engine is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntaxStrategy {
    Tree,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub base_dir: PathBuf,
    pub vector_db_path: PathBuf,
    pub vector_table: String,
    pub embeddings_backend: EmbeddingsBackend,
    pub embeddings_model_dir: Option<PathBuf>,
    pub embeddings_model_repo: Option<String>,
    pub embeddings_device: EmbeddingsDevice,
    pub embedding_batch_size: usize,
    pub hash_embedding_dim: usize,
    pub embedding_cache_entries: usize,
    pub source_extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub whole_file_max_bytes: usize,
    pub max_embed_chars: usize,
    pub syntax_strategy: SyntaxStrategy,
    pub context_lines_before: usize,
    pub context_lines_after: usize,
    pub related_code_limit: usize,
    pub project_structure_limit: usize,
    pub watch_mode: bool,
    pub watch_debounce_ms: u64,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Defaults for a workspace rooted at `base_dir`, without reading the environment.
    pub fn for_base_dir(base_dir: &Path) -> Self {
        let base_dir = dunce::canonicalize(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());
        Self {
            vector_db_path: base_dir.join(DEFAULT_VECTOR_DB_PATH),
            vector_table: "code_structures".to_string(),
            embeddings_backend: EmbeddingsBackend::Hash,
            embeddings_model_dir: None,
            embeddings_model_repo: None,
            embeddings_device: EmbeddingsDevice::Cpu,
            embedding_batch_size: 32,
            hash_embedding_dim: 64,
            embedding_cache_entries: 4096,
            source_extensions: to_strings(DEFAULT_SOURCE_EXTENSIONS),
            exclude_dirs: to_strings(DEFAULT_EXCLUDE_DIRS),
            whole_file_max_bytes: 10_000,
            max_embed_chars: 8_000,
            syntax_strategy: SyntaxStrategy::Tree,
            context_lines_before: 50,
            context_lines_after: 20,
            related_code_limit: 5,
            project_structure_limit: 200,
            watch_mode: false,
            watch_debounce_ms: 250,
            log_dir: None,
            base_dir,
        }
    }

    pub fn from_env() -> Result<Self> {
        let base_dir_raw = required_env("BASE_DIR")?;
        let base_dir = canonicalize_dir(Path::new(&base_dir_raw))
            .with_context(|| format!("Invalid BASE_DIR: {base_dir_raw}"))?;

        let mut cfg = Self::for_base_dir(&base_dir);

        cfg.vector_db_path = default_path(&base_dir, "VECTOR_DB_PATH", DEFAULT_VECTOR_DB_PATH)?;

        let embeddings_backend = optional_env("EMBEDDINGS_BACKEND")
            .as_deref()
            .map(parse_embeddings_backend)
            .transpose()?
            .unwrap_or(EmbeddingsBackend::FastEmbed);
        cfg.embeddings_backend = embeddings_backend;

        if embeddings_backend == EmbeddingsBackend::FastEmbed {
            cfg.embeddings_model_dir = Some(match optional_env("EMBEDDINGS_MODEL_DIR") {
                Some(raw) => PathBuf::from(raw),
                None => base_dir.join(DEFAULT_EMBEDDINGS_CACHE_DIR),
            });
            cfg.embeddings_model_repo = Some(
                optional_env("EMBEDDINGS_MODEL_REPO")
                    .unwrap_or_else(|| DEFAULT_MODEL_REPO.to_string()),
            );
        }

        cfg.embeddings_device = optional_env("EMBEDDINGS_DEVICE")
            .as_deref()
            .map(parse_embeddings_device)
            .transpose()?
            .unwrap_or(EmbeddingsDevice::Cpu);

        cfg.embedding_batch_size = optional_env("EMBEDDING_BATCH_SIZE")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.embedding_batch_size)
            .max(1);

        cfg.hash_embedding_dim = optional_env("HASH_EMBEDDING_DIM")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.hash_embedding_dim);

        cfg.embedding_cache_entries = optional_env("EMBEDDING_CACHE_ENTRIES")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.embedding_cache_entries);

        cfg.source_extensions = parse_csv_or_default(
            optional_env("SOURCE_EXTENSIONS").as_deref(),
            DEFAULT_SOURCE_EXTENSIONS,
        )
        .into_iter()
        .map(|ext| ext.trim_start_matches('.').to_string())
        .collect();

        cfg.exclude_dirs =
            parse_csv_or_default(optional_env("EXCLUDE_DIRS").as_deref(), DEFAULT_EXCLUDE_DIRS);

        cfg.whole_file_max_bytes = optional_env("WHOLE_FILE_MAX_BYTES")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.whole_file_max_bytes);

        cfg.max_embed_chars = optional_env("MAX_EMBED_CHARS")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.max_embed_chars);

        cfg.syntax_strategy = optional_env("SYNTAX_STRATEGY")
            .as_deref()
            .map(parse_syntax_strategy)
            .transpose()?
            .unwrap_or(SyntaxStrategy::Tree);

        cfg.context_lines_before = optional_env("CONTEXT_LINES_BEFORE")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.context_lines_before);

        cfg.context_lines_after = optional_env("CONTEXT_LINES_AFTER")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.context_lines_after);

        cfg.related_code_limit = optional_env("RELATED_CODE_LIMIT")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.related_code_limit);

        cfg.project_structure_limit = optional_env("PROJECT_STRUCTURE_LIMIT")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(cfg.project_structure_limit);

        cfg.watch_mode = optional_env("WATCH_MODE")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(true);

        cfg.watch_debounce_ms = optional_env("WATCH_DEBOUNCE_MS")
            .as_deref()
            .map(parse_u64)
            .transpose()?
            .unwrap_or(cfg.watch_debounce_ms);

        cfg.log_dir = optional_env("LOG_DIR").map(|raw| {
            let p = PathBuf::from(raw);
            if p.is_absolute() {
                p
            } else {
                base_dir.join(p)
            }
        });

        Ok(cfg)
    }

    /// Name used to scope the embedding cache and log lines.
    pub fn embedding_model_name(&self) -> &str {
        match self.embeddings_backend {
            EmbeddingsBackend::Hash => "hash",
            EmbeddingsBackend::FastEmbed => self
                .embeddings_model_repo
                .as_deref()
                .unwrap_or(DEFAULT_MODEL_REPO),
        }
    }

    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| self.source_extensions.iter().any(|e| e == ext))
    }

    pub fn is_excluded_dir_name(&self, name: &str) -> bool {
        self.exclude_dirs.iter().any(|d| d == name)
    }

    pub fn normalize_path_to_base(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("Missing required env var: {key}"))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|v| {
        let v = v.trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}

fn canonicalize_dir(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .context("Failed to get current_dir")?
            .join(path)
    };
    let meta = std::fs::metadata(&path)
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    if !meta.is_dir() {
        return Err(anyhow!("Expected directory, got file: {}", path.display()));
    }
    dunce::canonicalize(&path).with_context(|| format!("Failed to canonicalize: {}", path.display()))
}

fn default_path(base_dir: &Path, key: &str, default_rel: &str) -> Result<PathBuf> {
    let raw = optional_env(key).unwrap_or_else(|| default_rel.to_string());
    let path = Path::new(&raw);
    Ok(if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    })
}

fn parse_csv_or_default(value: Option<&str>, default: &[&str]) -> Vec<String> {
    match value {
        Some(v) => parse_csv(v),
        None => to_strings(default),
    }
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_embeddings_device(value: &str) -> Result<EmbeddingsDevice> {
    match value.trim().to_lowercase().as_str() {
        "cpu" => Ok(EmbeddingsDevice::Cpu),
        "metal" => Ok(EmbeddingsDevice::Metal),
        other => Err(anyhow!("Invalid EMBEDDINGS_DEVICE: {other}")),
    }
}

fn parse_embeddings_backend(value: &str) -> Result<EmbeddingsBackend> {
    match value.trim().to_lowercase().as_str() {
        "fastembed" => Ok(EmbeddingsBackend::FastEmbed),
        "hash" => Ok(EmbeddingsBackend::Hash),
        other => Err(anyhow!("Invalid EMBEDDINGS_BACKEND: {other}")),
    }
}

fn parse_syntax_strategy(value: &str) -> Result<SyntaxStrategy> {
    match value.trim().to_lowercase().as_str() {
        "tree" | "tree-sitter" => Ok(SyntaxStrategy::Tree),
        "pattern" | "regex" => Ok(SyntaxStrategy::Pattern),
        other => Err(anyhow!("Invalid SYNTAX_STRATEGY: {other}")),
    }
}

fn parse_usize(value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_u64(value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        other => Err(anyhow!("Invalid boolean '{other}'")),
    }
}
