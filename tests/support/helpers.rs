//! Procedural helpers for integration tests.

use codebase_context_engine::Engine;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Writes `contents` to `rel` under `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

/// Runs a full index to completion, ignoring progress.
pub async fn index_everything(engine: &Engine) {
    let outcome = engine
        .index_all(|_| {}, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.is_cancelled());
}

pub async fn indexed_paths(engine: &Engine) -> BTreeSet<String> {
    engine.coordinator().store().list_paths().await.unwrap()
}

pub async fn row_count(engine: &Engine) -> usize {
    engine.coordinator().store().count_rows().await
}
