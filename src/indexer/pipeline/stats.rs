#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexRunStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub entities_indexed: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IndexProgress {
    pub processed: usize,
    pub total: usize,
}

impl IndexProgress {
    /// `processed / total`, with an empty workspace counting as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

/// How a full index run ended. Files finished before a cancellation stay indexed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", content = "stats", rename_all = "snake_case")]
pub enum IndexRunOutcome {
    Completed(IndexRunStats),
    Cancelled(IndexRunStats),
}

impl IndexRunOutcome {
    pub fn stats(&self) -> &IndexRunStats {
        match self {
            IndexRunOutcome::Completed(s) | IndexRunOutcome::Cancelled(s) => s,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexRunOutcome::Cancelled(_))
    }
}
