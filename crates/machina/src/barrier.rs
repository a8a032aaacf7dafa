//! Completion barriers.
//!
//! A barrier tracks the tasks launched by one scope (a machine, the
//! controller, a single broadcast) and lets that scope wait for all of them.
//! Barriers are never shared between scopes.

use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tracing::warn;

use crate::error::KernelError;

pub struct CompletionBarrier {
    scope: String,
    tasks: JoinSet<Result<(), KernelError>>,
    first_failure: Option<KernelError>,
}

impl CompletionBarrier {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            tasks: JoinSet::new(),
            first_failure: None,
        }
    }

    /// Launch `task` and count it towards this barrier.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), KernelError>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Tasks not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Join the tasks that have already finished without waiting for the
    /// rest. A failure among them is kept for [`wait`](Self::wait).
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(joined) = self.tasks.try_join_next() {
            self.settle(joined);
            reaped += 1;
        }
        reaped
    }

    /// Wait for every tracked task.
    ///
    /// All tasks are joined even when some fail; the first failure is
    /// returned afterwards.
    pub async fn wait(mut self) -> Result<(), KernelError> {
        while let Some(joined) = self.tasks.join_next().await {
            self.settle(joined);
        }
        self.first_failure.map_or(Ok(()), Err)
    }

    fn settle(&mut self, joined: Result<Result<(), KernelError>, JoinError>) {
        let failure = match joined {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(source) => KernelError::TaskFailed {
                scope: self.scope.clone(),
                source,
            },
        };
        warn!(scope = %self.scope, error = %failure, "barrier task failed");
        self.first_failure.get_or_insert(failure);
    }
}
