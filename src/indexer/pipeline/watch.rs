use super::IndexCoordinator;
use anyhow::{Context, Result};
use notify_debouncer_full::{
    new_debouncer,
    notify::{RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// File-change notification, whether from the watcher or an editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Changed(PathBuf),
    Deleted(PathBuf),
}

impl FsEvent {
    /// Debounced events lose their original kind; what is on disk now decides.
    pub fn from_current_state(path: PathBuf) -> Self {
        if path.exists() {
            FsEvent::Changed(path)
        } else {
            FsEvent::Deleted(path)
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            FsEvent::Created(p) | FsEvent::Changed(p) | FsEvent::Deleted(p) => p,
        }
    }
}

/// Keeps the OS watcher alive. Dropping it stops delivery; `stop` also ends
/// the consumer task.
pub struct WatchHandle {
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub async fn join(self) {
        let WatchHandle { _debouncer, task } = self;
        let _ = task.await;
    }
}

pub fn spawn_watch(coordinator: IndexCoordinator) -> Result<WatchHandle> {
    let root = coordinator.config().base_dir.clone();
    let debounce = Duration::from_millis(coordinator.config().watch_debounce_ms.max(50));
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();

    let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events
                    .iter()
                    .flat_map(|event| event.paths.iter().cloned())
                    .collect();
                if !paths.is_empty() {
                    let _ = tx.send(paths);
                }
            }
            Err(errors) => {
                for err in errors {
                    tracing::warn!(error = %err, "File watcher error");
                }
            }
        }
    })
    .context("Failed to create file watcher")?;

    debouncer
        .watcher()
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch directory: {}", root.display()))?;

    tracing::info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "Watching for changes");

    let task = tokio::spawn(async move {
        while let Some(paths) = rx.recv().await {
            let unique: BTreeSet<PathBuf> = paths.into_iter().collect();
            for path in unique {
                coordinator
                    .handle_event(FsEvent::from_current_state(path))
                    .await;
            }
        }
        tracing::debug!("Watch channel closed");
    });

    Ok(WatchHandle {
        _debouncer: debouncer,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_existence() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("A.pm");
        std::fs::write(&present, "1;").unwrap();
        let missing = dir.path().join("B.pm");

        assert_eq!(
            FsEvent::from_current_state(present.clone()),
            FsEvent::Changed(present)
        );
        assert_eq!(
            FsEvent::from_current_state(missing.clone()),
            FsEvent::Deleted(missing)
        );
    }
}
