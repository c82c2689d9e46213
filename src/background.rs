//! Detached work that must never affect the request that triggered it.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct Background {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// Decrements the in-flight count even if the task is cancelled or panics.
struct InFlight {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl Background {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Runs `task` on the runtime without waiting for it. Errors and panics
    /// end up in the log and nowhere else.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight {
            count: self.in_flight.clone(),
            idle: self.idle.clone(),
        };
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(task = name, "background pool closed; task dropped");
                return;
            };
            match tokio::spawn(task).await {
                Ok(Ok(())) => debug!(task = name, "background task finished"),
                Ok(Err(e)) => error!(task = name, error = %e, "background task failed"),
                Err(e) if e.is_panic() => error!(task = name, "background task panicked"),
                Err(e) => warn!(task = name, error = %e, "background task cancelled"),
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Waits until every spawned task has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
