//! Request-scoped background work (spec.md §4.9 step 2/12, §5).
//!
//! A [`BackgroundTaskGroup`] is opened at the start of a request and closed
//! just before the response is emitted. Tasks spawned onto it run
//! concurrently with the hot path but are joined — and any failure
//! re-raised — before the handler returns. Exposure-event recording tasks
//! are the one exception spec.md calls out as safe to swallow; callers mark
//! those with [`BackgroundTaskGroup::spawn_best_effort`].

use std::time::Instant;

use crate::error::{Error, Result};
use tokio::task::JoinSet;

/// A single request's scoped pool of background work.
pub struct BackgroundTaskGroup {
    tasks: JoinSet<TaskOutcome>,
    started: Instant,
}

struct TaskOutcome {
    best_effort: bool,
    result: Result<()>,
}

impl BackgroundTaskGroup {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            started: Instant::now(),
        }
    }

    /// Spawn a task whose failure must propagate at [`Self::join`].
    pub fn spawn(&mut self, fut: impl std::future::Future<Output = Result<()>> + Send + 'static) {
        self.tasks.spawn(async move {
            TaskOutcome {
                best_effort: false,
                result: fut.await,
            }
        });
    }

    /// Spawn a task whose failure is logged but never fails the request
    /// (used for experiment-exposure recording, per spec.md §4.3/§7).
    pub fn spawn_best_effort(
        &mut self,
        fut: impl std::future::Future<Output = Result<()>> + Send + 'static,
    ) {
        self.tasks.spawn(async move {
            TaskOutcome {
                best_effort: true,
                result: fut.await,
            }
        });
    }

    /// Join every outstanding task, propagating the first non-best-effort
    /// failure. Always drains the full set first so no task is left
    /// dangling, matching the cancellation-safety requirement in spec.md §5.
    pub async fn join(mut self) -> Result<()> {
        let mut first_failure: Option<Error> = None;
        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => TaskOutcome {
                    best_effort: false,
                    result: Err(Error::Internal(format!(
                        "background task panicked: {join_err}"
                    ))),
                },
            };
            if let Err(e) = outcome.result {
                if outcome.best_effort {
                    tracing::warn!(error = %e, "background task failed (swallowed)");
                } else if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
        tracing::debug!(elapsed_ms = self.started.elapsed().as_millis() as u64, "background task group closed");
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for BackgroundTaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_succeeds_with_no_tasks() {
        let group = BackgroundTaskGroup::new();
        assert!(group.join().await.is_ok());
    }

    #[tokio::test]
    async fn join_propagates_failure() {
        let mut group = BackgroundTaskGroup::new();
        group.spawn(async { Err(Error::Internal("boom".into())) });
        assert!(group.join().await.is_err());
    }

    #[tokio::test]
    async fn best_effort_failure_is_swallowed() {
        let mut group = BackgroundTaskGroup::new();
        group.spawn_best_effort(async { Err(Error::Internal("exposure failed".into())) });
        assert!(group.join().await.is_ok());
    }

    #[tokio::test]
    async fn mixed_tasks_report_the_non_best_effort_failure() {
        let mut group = BackgroundTaskGroup::new();
        group.spawn_best_effort(async { Err(Error::Internal("exposure failed".into())) });
        group.spawn(async { Err(Error::Internal("real failure".into())) });
        group.spawn(async { Ok(()) });
        let err = group.join().await.unwrap_err();
        assert!(err.to_string().contains("real failure"));
    }
}
