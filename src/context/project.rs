use crate::indexer::pipeline::IndexCoordinator;
use anyhow::{Context, Result};

/// Workspace-relative source paths, sorted, at most `limit` of them.
pub async fn project_structure(coordinator: &IndexCoordinator, limit: usize) -> Result<Vec<String>> {
    let coordinator = coordinator.clone();
    tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        let files = coordinator.discover_files()?;
        Ok(files
            .iter()
            .filter_map(|f| coordinator.index_key(f).ok())
            .take(limit)
            .collect())
    })
    .await
    .context("Project scan task failed")?
}
