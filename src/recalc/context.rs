use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Why a run stopped before exhausting its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TimedOut,
}

/// Stop conditions consulted at every batch boundary.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, budget: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + budget,
        }
    }

    /// A context that only stops on its time budget.
    pub fn with_budget(budget: Duration) -> Self {
        Self::new(CancellationToken::new(), budget)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancellation wins over the deadline when both have fired.
    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(StopReason::TimedOut)
        } else {
            None
        }
    }
}
