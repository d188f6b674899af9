use std::sync::Arc;
use thiserror::Error;

use crate::document::Position;

/// Failures surfaced to the caller of an interactive engine operation.
///
/// Indexing and advanced-context failures never show up here: they are logged
/// and degrade instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to assemble context for {path}: {reason}")]
    BasicContext { path: String, reason: String },

    #[error("no assistant backend configured")]
    NoBackend,

    #[error("assistant backend request failed: {0}")]
    Backend(#[source] anyhow::Error),

    /// Failure of a request shared between several single-flight callers.
    #[error("{0}")]
    Shared(Arc<anyhow::Error>),
}

impl EngineError {
    /// Basic-context failure for a cursor below the last line.
    pub fn out_of_range(path: &str, position: Position, line_count: usize) -> Self {
        Self::BasicContext {
            path: path.to_string(),
            reason: format!(
                "cursor {}:{} is outside the document ({} lines)",
                position.line, position.character, line_count
            ),
        }
    }
}
