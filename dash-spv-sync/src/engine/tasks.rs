//! Supervision of detached engine tasks.
//!
//! Sync continuations, inventory routing and the false positive tracker run
//! detached from whoever triggered them. Each one is wrapped so that an error
//! or a panic is logged instead of propagating, and so that engine shutdown
//! cancels it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::SyncResult;

#[derive(Debug, Clone)]
pub(crate) struct TaskSupervisor {
    tasks: Arc<Mutex<JoinSet<()>>>,
    shutdown: CancellationToken,
}

impl TaskSupervisor {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run `task` detached. Returns `false` if the engine is shutting down and
    /// the task was dropped without running.
    pub(crate) async fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = SyncResult<()>> + Send + 'static,
    {
        if self.is_shutting_down() {
            tracing::debug!("Not starting {} task, engine is shutting down", name);
            return false;
        }

        let mut tasks = self.tasks.lock().await;
        if self.is_shutting_down() {
            tracing::debug!("Not starting {} task, engine is shutting down", name);
            return false;
        }

        while let Some(result) = tasks.try_join_next() {
            log_join_error(result);
        }

        let shutdown = self.shutdown.clone();
        tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::trace!("Task {} cancelled", name);
                }
                result = AssertUnwindSafe(task).catch_unwind() => match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(category = e.category(), "Task {} failed: {}", name, e);
                    }
                    Err(panic) => {
                        let message = panic_message(&*panic);
                        tracing::error!("Unhandled panic in {} task: {}", name, message);
                    }
                }
            }
        });
        true
    }

    /// Number of tasks not yet reaped.
    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Cancel every task and wait for all of them to finish.
    pub(crate) async fn shutdown(&self) {
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            log_join_error(result);
        }
    }
}

fn log_join_error(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!("Task join error: {}", e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
