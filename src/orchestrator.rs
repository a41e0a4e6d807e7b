//! # Orchestrator
//!
//! Background loop that selects due watch jobs, hands each one to the job
//! coordinator under the shared concurrency limiter, and sleeps until the
//! next job becomes due. A job already in flight is never dispatched twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::job_coordinator::{JobCoordinator, JobOutcome};
use crate::limiter::Limiter;
use crate::repositories::WatchJobRepository;

/// Polling loop service.
pub struct Orchestrator {
    config: OrchestratorConfig,
    jobs: WatchJobRepository,
    coordinator: Arc<JobCoordinator>,
    limiter: Limiter,
}

/// Counters for one scheduling pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub jobs_due: u64,
    pub jobs_dispatched: u64,
    pub jobs_skipped_in_flight: u64,
    pub query_errors: u64,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        jobs: WatchJobRepository,
        coordinator: Arc<JobCoordinator>,
    ) -> Self {
        let limiter = coordinator.limiter().clone();
        Self {
            config,
            jobs,
            coordinator,
            limiter,
        }
    }

    /// Run the polling loop until `shutdown` fires.
    ///
    /// On shutdown no new jobs are dispatched; in-flight jobs get the
    /// configured grace period before they are aborted.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            max_concurrency = self.limiter.capacity(),
            tick_interval_seconds = self.config.tick_interval_seconds,
            "Starting orchestrator"
        );
        let mut tasks: JoinSet<JobOutcome> = JoinSet::new();

        while !shutdown.is_cancelled() {
            while let Some(joined) = tasks.try_join_next() {
                record_completion(joined);
            }

            let tick_started = Instant::now();
            let stats = self.tick(&mut tasks, &shutdown).await;
            histogram!("batchwatch_orchestrator_tick_duration_ms")
                .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
            gauge!("batchwatch_orchestrator_in_flight_tasks").set(tasks.len() as f64);
            if stats.jobs_due > 0 {
                debug!(?stats, in_flight = tasks.len(), "Orchestrator tick complete");
            }

            let pause = self.sleep_duration().await;
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = sleep(pause) => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    record_completion(joined);
                }
            }
        }

        info!(in_flight = tasks.len(), "Orchestrator shutdown requested");
        self.drain(tasks).await;
        info!("Orchestrator stopped");
    }

    /// Dispatch every due job once and wait for all of them to finish.
    pub async fn run_once(&self) -> TickStats {
        let mut tasks = JoinSet::new();
        let stats = self.tick(&mut tasks, &CancellationToken::new()).await;
        while let Some(joined) = tasks.join_next().await {
            record_completion(joined);
        }
        stats
    }

    async fn tick(
        &self,
        tasks: &mut JoinSet<JobOutcome>,
        shutdown: &CancellationToken,
    ) -> TickStats {
        let mut stats = TickStats::default();

        let due = match self
            .jobs
            .due_jobs(Utc::now(), self.config.due_batch_limit)
            .await
        {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "Failed to load due jobs");
                counter!("batchwatch_orchestrator_query_errors_total").increment(1);
                stats.query_errors += 1;
                return stats;
            }
        };
        stats.jobs_due = due.len() as u64;

        for job in due {
            let Some(guard) = self.limiter.try_claim(job.id) else {
                stats.jobs_skipped_in_flight += 1;
                continue;
            };

            let admitted = tokio::select! {
                _ = shutdown.cancelled() => false,
                ready = self.limiter.wait_for_capacity() => ready.is_ok(),
            };
            if !admitted {
                break;
            }

            let coordinator = Arc::clone(&self.coordinator);
            tasks.spawn(async move {
                let _in_flight = guard;
                coordinator.process(&job).await
            });
            stats.jobs_dispatched += 1;
        }

        counter!("batchwatch_jobs_dispatched_total").increment(stats.jobs_dispatched);
        stats
    }

    /// Time until the next check of a job that is not in flight, bounded by
    /// the tick interval and the minimum sleep. A finishing in-flight job
    /// wakes the loop through its join handle instead.
    async fn sleep_duration(&self) -> Duration {
        let tick = self.config.tick_interval();
        let floor = self.config.min_sleep();
        let in_flight = self.limiter.in_flight_ids();

        match self.jobs.next_check_time(&in_flight).await {
            Ok(Some(next)) => (next - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(tick)
                .max(floor),
            Ok(None) => tick,
            Err(err) => {
                warn!(error = %err, "Failed to compute next wake time");
                tick
            }
        }
    }

    async fn drain(&self, mut tasks: JoinSet<JobOutcome>) {
        if !tasks.is_empty() {
            self.wait_or_abort(&mut tasks).await;
        }
        self.limiter.close();
    }

    async fn wait_or_abort(&self, tasks: &mut JoinSet<JobOutcome>) {
        let grace = self.config.shutdown_grace();
        let waited = timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                record_completion(joined);
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_seconds = grace.as_secs(),
                "Grace period elapsed, aborting in-flight jobs"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

fn record_completion(joined: Result<JobOutcome, JoinError>) {
    match joined {
        Ok(outcome) => debug!(outcome = outcome.label(), "Job cycle finished"),
        Err(err) if err.is_cancelled() => debug!("Job cycle aborted"),
        Err(err) => {
            counter!("batchwatch_job_task_panics_total").increment(1);
            error!(error = %err, "Job task panicked");
        }
    }
}
