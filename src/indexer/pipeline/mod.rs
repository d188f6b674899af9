pub mod locks;
pub mod scan;
pub mod stats;
pub mod utils;
pub mod watch;

use crate::{
    config::Config,
    embeddings::{create_embedder, Embedder},
    indexer::extract::{extractor_for, StructuralEntity, StructureExtractor},
    path::PathNormalizer,
    storage::{
        cache::EmbeddingCache,
        vector::{IndexRecord, Predicate, SemanticIndexStore},
    },
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use self::locks::PathLocks;
use self::scan::{is_under_excluded_dir, scan_files, should_index_file};
use self::stats::{IndexProgress, IndexRunOutcome, IndexRunStats};
use self::utils::{distance_to_score, embedding_text};
use self::watch::FsEvent;

/// A stored entity returned by semantic search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevantCode {
    pub title: String,
    pub content: String,
    pub path: String,
    pub kind: String,
    pub score: f32,
}

/// Keeps the semantic index in step with the workspace: full runs, single-file
/// updates, removals and watcher events all go through here.
#[derive(Clone)]
pub struct IndexCoordinator {
    config: Arc<Config>,
    paths: Arc<PathNormalizer>,
    extractor: Arc<dyn StructureExtractor>,
    store: Arc<SemanticIndexStore>,
    embedder: Arc<Mutex<Box<dyn Embedder + Send>>>,
    cache: Arc<EmbeddingCache>,
    locks: PathLocks,
}

impl IndexCoordinator {
    pub fn new(
        config: Arc<Config>,
        extractor: Arc<dyn StructureExtractor>,
        store: Arc<SemanticIndexStore>,
        embedder: Arc<Mutex<Box<dyn Embedder + Send>>>,
    ) -> Result<Self> {
        let paths = PathNormalizer::from_std_base(&config.base_dir)
            .context("Workspace root is not a UTF-8 path")?;
        let cache = Arc::new(EmbeddingCache::new(
            config.embedding_model_name(),
            config.embedding_cache_entries,
        ));
        Ok(Self {
            config,
            paths: Arc::new(paths),
            extractor,
            store,
            embedder,
            cache,
            locks: PathLocks::default(),
        })
    }

    /// Builds the embedder, store and extractor named by `config`.
    pub async fn open(config: Arc<Config>) -> Result<Self> {
        let embedder = create_embedder(&config)?;
        let store = SemanticIndexStore::open(
            &config.vector_db_path,
            &config.vector_table,
            embedder.dim(),
        )
        .await?;
        let extractor = extractor_for(config.syntax_strategy, config.whole_file_max_bytes);
        Self::new(
            config,
            extractor,
            Arc::new(store),
            Arc::new(Mutex::new(embedder)),
        )
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn paths(&self) -> &PathNormalizer {
        &self.paths
    }

    pub fn store(&self) -> &Arc<SemanticIndexStore> {
        &self.store
    }

    pub fn extractor(&self) -> &Arc<dyn StructureExtractor> {
        &self.extractor
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Workspace-relative key for `path`, which may be relative to the root.
    pub fn index_key(&self, path: &Path) -> Result<String> {
        let absolute = self.config.normalize_path_to_base(path);
        Ok(self.paths.index_key(&absolute)?)
    }

    pub fn discover_files(&self) -> Result<Vec<PathBuf>> {
        scan_files(&self.config, &self.config.base_dir)
    }

    /// Indexes every eligible file, reporting after each one. Cancellation is
    /// honoured between files; a completed run also drops records of files
    /// that no longer exist.
    pub async fn index_all<F>(
        &self,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<IndexRunOutcome>
    where
        F: Fn(IndexProgress) + Send + Sync,
    {
        let files = self.discover_files()?;
        let total = files.len();
        let mut stats = IndexRunStats {
            files_scanned: total,
            ..Default::default()
        };
        let mut live = HashSet::with_capacity(total);

        for (i, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(processed = i, total, "Index run cancelled");
                return Ok(IndexRunOutcome::Cancelled(stats));
            }

            if let Ok(key) = self.index_key(file) {
                live.insert(key);
            }
            match self.index_one(file).await {
                Ok(entities) => {
                    stats.files_indexed += 1;
                    stats.entities_indexed += entities;
                }
                Err(err) => {
                    stats.files_skipped += 1;
                    tracing::warn!(file = %file.display(), error = %err, "Failed to index file");
                }
            }
            on_progress(IndexProgress {
                processed: i + 1,
                total,
            });
        }

        stats.files_deleted = self.prune_missing(&live).await;

        tracing::info!(
            files_scanned = stats.files_scanned,
            files_indexed = stats.files_indexed,
            entities_indexed = stats.entities_indexed,
            files_skipped = stats.files_skipped,
            files_deleted = stats.files_deleted,
            "Index run completed"
        );
        Ok(IndexRunOutcome::Completed(stats))
    }

    /// Replaces the records for one file and returns how many were written.
    /// A file that has vanished is removed instead; ineligible files are left
    /// alone. When no entity could be embedded the stored records are kept.
    pub async fn index_one(&self, path: &Path) -> Result<usize> {
        let absolute = self.config.normalize_path_to_base(path);
        let key = self.paths.index_key(&absolute)?;
        if !should_index_file(&self.config, &absolute) {
            tracing::debug!(file = %key, "Not an indexable source file");
            return Ok(0);
        }

        let _guard = self.locks.lock(&key).await;

        let bytes = match tokio::fs::read(&absolute).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(file = %key, "File vanished, removing from index");
                self.store.try_delete_by_path(&key).await?;
                return Ok(0);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", absolute.display()))
            }
        };
        let content = String::from_utf8_lossy(&bytes);

        let entities = self.extractor.extract(&key, &content);
        let records = self.embed_entities(&key, &entities).await;
        if records.is_empty() && !entities.is_empty() {
            bail!(
                "Failed to embed any of the {} entities in {key}, keeping previous records",
                entities.len()
            );
        }

        self.store.try_delete_by_path(&key).await?;
        self.store.try_insert(&records).await?;

        tracing::debug!(file = %key, entities = records.len(), "Indexed file");
        Ok(records.len())
    }

    pub async fn remove_from_index(&self, path: &Path) -> Result<()> {
        let key = self.index_key(path)?;
        let _guard = self.locks.lock(&key).await;
        self.store.try_delete_by_path(&key).await?;
        tracing::debug!(file = %key, "Removed from index");
        Ok(())
    }

    /// Nearest stored entities to `query`, best first. Records without a path
    /// never appear.
    pub async fn find_relevant_code(&self, query: &str, limit: usize) -> Result<Vec<RelevantCode>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let vector = {
            let mut embedder = self.embedder.lock().await;
            embedder
                .embed(&[query.to_string()])?
                .pop()
                .context("Embedder returned no vector for query")?
        };

        let hits = self
            .store
            .search(&vector, limit, &Predicate::non_placeholder())
            .await;

        Ok(hits
            .into_iter()
            .filter(|hit| !hit.record.path.is_empty())
            .map(|hit| RelevantCode {
                score: distance_to_score(hit.distance),
                title: hit.record.title,
                content: hit.record.content,
                path: hit.record.path,
                kind: hit.record.kind,
            })
            .collect())
    }

    /// Applies one file-change notification. Failures are logged, never raised.
    pub async fn handle_event(&self, event: FsEvent) {
        let result = match &event {
            FsEvent::Created(path) | FsEvent::Changed(path) => {
                self.index_one(path).await.map(|_| ())
            }
            FsEvent::Deleted(path) => self.remove_deleted(path).await,
        };
        if let Err(err) = result {
            tracing::warn!(path = %event.path().display(), error = %err, "Failed to apply file change");
        }
    }

    /// A deleted source file drops its records; a deleted directory drops the
    /// records of every file under it.
    async fn remove_deleted(&self, path: &Path) -> Result<()> {
        let absolute = self.config.normalize_path_to_base(path);
        if is_under_excluded_dir(&self.config, &absolute) {
            return Ok(());
        }
        if self.config.is_source_file(path) {
            return self.remove_from_index(path).await;
        }
        let key = self.index_key(path)?;
        let prefix = if key == "." {
            String::new()
        } else {
            format!("{key}/")
        };
        for stored in self.store.list_paths().await? {
            if stored.starts_with(&prefix) {
                let _guard = self.locks.lock(&stored).await;
                self.store.try_delete_by_path(&stored).await?;
            }
        }
        Ok(())
    }

    async fn prune_missing(&self, live: &HashSet<String>) -> usize {
        let stored = match self.store.list_paths().await {
            Ok(paths) => paths,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to list indexed paths");
                return 0;
            }
        };

        let mut deleted = 0;
        for path in stored.into_iter().filter(|p| !live.contains(p)) {
            let _guard = self.locks.lock(&path).await;
            match self.store.try_delete_by_path(&path).await {
                Ok(()) => deleted += 1,
                Err(err) => {
                    tracing::warn!(file = %path, error = %err, "Failed to prune stale records")
                }
            }
        }
        deleted
    }

    /// Embeds in batches through the cache. A failed batch is retried one
    /// entity at a time so a single bad input only loses itself.
    async fn embed_entities(&self, key: &str, entities: &[StructuralEntity]) -> Vec<IndexRecord> {
        let texts: Vec<String> = entities
            .iter()
            .map(|e| embedding_text(e, self.config.max_embed_chars))
            .collect();
        let cache_keys: Vec<String> = texts.iter().map(|t| self.cache.key_for(t)).collect();
        let mut vectors: Vec<Option<Vec<f32>>> =
            cache_keys.iter().map(|k| self.cache.get(k)).collect();

        let missing: Vec<usize> = (0..entities.len())
            .filter(|&i| vectors[i].is_none())
            .collect();
        let batch_size = self.config.embedding_batch_size.max(1);

        for chunk in missing.chunks(batch_size) {
            let batch: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
            let result = {
                let mut embedder = self.embedder.lock().await;
                embedder.embed(&batch)
            };
            match result {
                Ok(out) if out.len() == chunk.len() => {
                    for (&i, v) in chunk.iter().zip(out) {
                        vectors[i] = Some(v);
                    }
                }
                other => {
                    if let Err(err) = other {
                        tracing::warn!(file = %key, error = %err, "Batch embedding failed, retrying per entity");
                    } else {
                        tracing::warn!(file = %key, "Embedder returned wrong batch size, retrying per entity");
                    }
                    for &i in chunk {
                        let single = {
                            let mut embedder = self.embedder.lock().await;
                            embedder.embed(std::slice::from_ref(&texts[i]))
                        };
                        match single {
                            Ok(mut out) if out.len() == 1 => vectors[i] = out.pop(),
                            Ok(_) => {
                                tracing::warn!(file = %key, entity = %entities[i].name, "Embedder returned no vector")
                            }
                            Err(err) => {
                                tracing::warn!(file = %key, entity = %entities[i].name, error = %err, "Failed to embed entity")
                            }
                        }
                    }
                }
            }
        }

        let dim = self.store.vector_dim();
        let mut records = Vec::with_capacity(entities.len());
        for ((entity, cache_key), vector) in entities.iter().zip(cache_keys).zip(vectors) {
            let Some(vector) = vector else { continue };
            if vector.len() != dim {
                tracing::warn!(
                    file = %key,
                    entity = %entity.name,
                    expected = dim,
                    actual = vector.len(),
                    "Embedding dimension mismatch"
                );
                continue;
            }
            self.cache.put(cache_key.clone(), vector.clone());
            records.push(IndexRecord {
                path: key.to_string(),
                cache_key,
                content: entity.content.clone(),
                title: entity.name.clone(),
                vector,
                kind: entity.kind.as_str().to_string(),
            });
        }
        records
    }
}
