//! Deadline Supervisor - dead man's switch for one decision attempt
//!
//! The attempt runs as its own task with a cancellation token and is raced
//! against a timer. If the timer wins, the token is cancelled, the task is
//! aborted and its eventual result is discarded. Control returns to the
//! caller no later than the budget plus scheduling overhead, whatever the
//! attempt is doing.

use crate::error::SignalError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default decision budget
pub const DEFAULT_BUDGET: Duration = Duration::from_millis(200);

/// Outcome of a supervised attempt
#[derive(Debug)]
pub enum Supervised<T> {
    /// The attempt finished within budget
    Completed {
        /// Value produced by the attempt
        value: T,
        /// Time taken
        elapsed: Duration,
    },
    /// The budget ran out; the attempt was cancelled
    Expired {
        /// Time until the supervisor gave up
        elapsed: Duration,
    },
    /// The attempt panicked or was cancelled externally
    Faulted {
        /// What went wrong
        reason: String,
        /// Time until the fault surfaced
        elapsed: Duration,
    },
}

impl<T> Supervised<T> {
    /// Time spent supervising
    pub fn elapsed(&self) -> Duration {
        match self {
            Supervised::Completed { elapsed, .. }
            | Supervised::Expired { elapsed }
            | Supervised::Faulted { elapsed, .. } => *elapsed,
        }
    }

    /// Whether the attempt finished in time
    pub fn is_completed(&self) -> bool {
        matches!(self, Supervised::Completed { .. })
    }

    /// The value, if the attempt finished in time
    pub fn into_value(self) -> Option<T> {
        match self {
            Supervised::Completed { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Races decision attempts against a fixed budget
#[derive(Debug, Clone, Copy)]
pub struct DeadlineSupervisor {
    budget: Duration,
}

impl DeadlineSupervisor {
    /// Create a supervisor with `budget`
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// Create a supervisor with a budget in milliseconds
    pub fn from_millis(budget_ms: u64) -> Self {
        Self::new(Duration::from_millis(budget_ms))
    }

    /// The budget
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Error describing a miss after `elapsed`
    pub fn miss(&self, elapsed: Duration) -> SignalError {
        SignalError::DeadlineExceeded {
            budget_ms: self.budget.as_millis() as u64,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Run `attempt` under the budget.
    ///
    /// `attempt` receives a token that is cancelled when the budget expires;
    /// long-running attempts can poll it to stop early, but the supervisor
    /// never relies on it: the task is aborted regardless.
    pub async fn supervise<F, Fut, T>(&self, attempt: F) -> Supervised<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let started = Instant::now();
        let mut handle = tokio::spawn(attempt(token.child_token()));

        tokio::select! {
            biased;

            _ = tokio::time::sleep(self.budget) => {
                token.cancel();
                handle.abort();
                let elapsed = started.elapsed();
                tracing::warn!(
                    "Decision attempt exceeded budget of {}ms, abandoned after {}ms",
                    self.budget.as_millis(),
                    elapsed.as_millis()
                );
                Supervised::Expired { elapsed }
            }
            joined = &mut handle => {
                let elapsed = started.elapsed();
                match joined {
                    Ok(value) => Supervised::Completed { value, elapsed },
                    Err(e) => {
                        token.cancel();
                        let reason = if e.is_panic() {
                            "decision attempt panicked".to_string()
                        } else {
                            format!("decision attempt cancelled: {}", e)
                        };
                        tracing::error!("{} after {}ms", reason, elapsed.as_millis());
                        Supervised::Faulted { reason, elapsed }
                    }
                }
            }
        }
    }
}

impl Default for DeadlineSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET)
    }
}
