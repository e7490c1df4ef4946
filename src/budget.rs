//! Cancellation and deadline for a single analysis call
//!
//! Analyses are synchronous and CPU bound, so cancellation is cooperative: long
//! loops call [`AnalysisBudget::check`] between units of work.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::ComputeError;

/// Cooperative cancellation token plus an optional wall-clock deadline
#[derive(Debug, Clone)]
pub struct AnalysisBudget {
    token: CancellationToken,
    started: Instant,
    deadline: Option<Instant>,
}

impl Default for AnalysisBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl AnalysisBudget {
    /// Never expires unless cancelled
    pub fn unbounded() -> Self {
        Self {
            token: CancellationToken::new(),
            started: Instant::now(),
            deadline: None,
        }
    }

    /// Expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            token: CancellationToken::new(),
            started,
            deadline: started.checked_add(timeout),
        }
    }

    /// Share an externally owned token, e.g. one tied to a request
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fail if the budget has been cancelled or its deadline passed
    pub fn check(&self) -> Result<(), ComputeError> {
        if self.token.is_cancelled() {
            return Err(ComputeError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ComputeError::DeadlineExceeded(self.elapsed().as_millis()));
            }
        }
        Ok(())
    }
}
