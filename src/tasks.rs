use std::{future::Future, sync::Arc};

use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;

use crate::error::{ExportError, ExportResult};

/// Bounded group of post-processing tasks with a final barrier.
///
/// At most `limit` tasks run at once; `spawn` waits for a free slot. The first
/// failure cancels the group and is returned by the next `spawn` or by `join`.
pub struct TaskGroup<T> {
    set: JoinSet<ExportResult<T>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    results: Vec<T>,
    failure: Option<ExportError>,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(limit: usize, cancel: CancellationToken) -> Self {
        Self {
            set: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
            cancel,
            results: Vec::new(),
            failure: None,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn spawn<F>(&mut self, task: F) -> ExportResult<()>
    where
        F: Future<Output = ExportResult<T>> + Send + 'static,
    {
        self.reap()?;
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => Some(permit),
        };
        let Some(permit) = permit else {
            return Err(self.take_failure());
        };
        let permit = permit.map_err(|_| anyhow::anyhow!("task group closed"))?;
        let cancel = self.cancel.clone();
        self.set.spawn(async move {
            let _permit = permit;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ExportError::Cancelled),
                result = task => result,
            }
        });
        Ok(())
    }

    /// Cancels the group and waits until every task has been dropped.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let running = self.set.len();
        self.set.shutdown().await;
        log::debug!("task group shut down, {} tasks stopped", running);
    }

    /// Waits for every spawned task; surfaces the first failure.
    pub async fn join(mut self) -> ExportResult<Vec<T>> {
        while let Some(joined) = self.set.join_next().await {
            self.record(joined);
        }
        match self.failure {
            Some(err) => Err(err),
            None if self.cancel.is_cancelled() => Err(ExportError::Cancelled),
            None => Ok(self.results),
        }
    }

    fn reap(&mut self) -> ExportResult<()> {
        while let Some(joined) = self.set.try_join_next() {
            self.record(joined);
        }
        match self.failure {
            Some(_) => Err(self.take_failure()),
            None => Ok(()),
        }
    }

    fn record(&mut self, joined: Result<ExportResult<T>, JoinError>) {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(anyhow::anyhow!("task panicked: {}", e).into()),
            Err(_) => Err(ExportError::Cancelled),
        };
        match result {
            Ok(value) => self.results.push(value),
            Err(err) => {
                // keep the root cause; cancellations that follow it are noise
                let replace = match &self.failure {
                    None => true,
                    Some(existing) => existing.is_cancelled() && !err.is_cancelled(),
                };
                if replace {
                    log::debug!("task group failure: {}", err);
                    self.failure = Some(err);
                }
                self.cancel.cancel();
            }
        }
    }

    fn take_failure(&mut self) -> ExportError {
        self.failure.take().unwrap_or(ExportError::Cancelled)
    }
}

#[cfg(test)]
#[path = "tasks_test.rs"]
mod tasks_test;
