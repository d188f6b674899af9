use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Identity of one background check. Starting a newer check cancels the
/// token of every older one.
#[derive(Debug, Clone)]
pub struct CheckEpoch {
    id: u64,
    token: CancellationToken,
}

impl CheckEpoch {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome<T> {
    Published(T),
    Discarded,
}

impl<T> CheckOutcome<T> {
    pub fn published(self) -> Option<T> {
        match self {
            CheckOutcome::Published(v) => Some(v),
            CheckOutcome::Discarded => None,
        }
    }
}

struct CurrentCheck {
    id: u64,
    token: CancellationToken,
}

/// Only the most recent check may publish its result.
pub struct CheckCoordinator {
    current: Mutex<CurrentCheck>,
}

impl Default for CheckCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckCoordinator {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(CurrentCheck {
                id: 0,
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn begin(&self) -> CheckEpoch {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        current.token.cancel();
        current.id += 1;
        current.token = CancellationToken::new();
        tracing::debug!(epoch = current.id, "Started check");
        CheckEpoch {
            id: current.id,
            token: current.token.clone(),
        }
    }

    pub fn is_current(&self, epoch: &CheckEpoch) -> bool {
        let current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        current.id == epoch.id && !epoch.token.is_cancelled()
    }

    /// Hands `value` back for publishing when `epoch` is still the newest
    /// check; otherwise the value is dropped.
    pub fn publish<T>(&self, epoch: &CheckEpoch, value: T) -> CheckOutcome<T> {
        if self.is_current(epoch) {
            CheckOutcome::Published(value)
        } else {
            tracing::debug!(epoch = epoch.id, "Discarding stale check result");
            CheckOutcome::Discarded
        }
    }

    /// Cancels the running check without starting another.
    pub fn cancel_current(&self) {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .token
            .cancel();
    }
}
