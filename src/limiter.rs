//! # Concurrency Limiter
//!
//! One bounded pool of permits shared by every external call the engine
//! makes, plus the set of watch jobs currently being processed. Permits are
//! held for the duration of a single call and released before any backoff
//! sleep, so a job waiting on its own batches never holds capacity.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use metrics::gauge;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("concurrency limiter is closed")]
pub struct LimiterClosed;

#[derive(Clone)]
pub struct Limiter {
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    capacity: usize,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run one external call while holding a permit.
    pub async fn run<F, T>(&self, call: F) -> Result<T, LimiterClosed>
    where
        F: Future<Output = T>,
    {
        let _permit = self.permits.acquire().await.map_err(|_| LimiterClosed)?;
        Ok(call.await)
    }

    /// Wait until at least one permit is free, without keeping it.
    pub async fn wait_for_capacity(&self) -> Result<(), LimiterClosed> {
        self.permits
            .acquire()
            .await
            .map(drop)
            .map_err(|_| LimiterClosed)
    }

    /// Stop handing out permits; pending and future acquisitions fail.
    ///
    /// Called once the orchestrator has drained, so nothing sharing this
    /// limiter reaches an external service after shutdown.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Mark a job as in flight. Returns `None` when it already is.
    pub fn try_claim(&self, job_id: Uuid) -> Option<InFlightGuard> {
        let mut in_flight = self.lock_in_flight();
        if !in_flight.insert(job_id) {
            return None;
        }
        gauge!("batchwatch_jobs_in_flight").set(in_flight.len() as f64);
        Some(InFlightGuard {
            job_id,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Snapshot of the jobs currently being processed.
    pub fn in_flight_ids(&self) -> Vec<Uuid> {
        self.lock_in_flight().iter().copied().collect()
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Removes its job from the in-flight set when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    job_id: Uuid,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        in_flight.remove(&self.job_id);
        gauge!("batchwatch_jobs_in_flight").set(in_flight.len() as f64);
    }
}
