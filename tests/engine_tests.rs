//! Integration tests for the polling engine: batch checks, job cycles, the
//! trigger guarantee, and concurrent dispatch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use batchwatch::batch_checker::BatchCheckOutcome;
use batchwatch::config::OrchestratorConfig;
use batchwatch::integrations::{FailureKind, ProbeError, RemoteBatchState, TriggerError};
use batchwatch::job_coordinator::JobOutcome;
use batchwatch::limiter::{Limiter, LimiterClosed};
use batchwatch::models::{BatchStatus, JobStatus, LogCategory};
use batchwatch::orchestrator::Orchestrator;
use batchwatch::repositories::{BatchWatchRepository, CheckLogRepository, WatchJobRepository};
use chrono::Utc;
use sea_orm::ConnectionTrait;
use tokio_util::sync::CancellationToken;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{RecordingTrigger, ScriptedProbe, coordinator, create_job, setup_test_db};

async fn set_batch_status(
    db: &sea_orm::DatabaseConnection,
    job_id: uuid::Uuid,
    remote_batch_id: &str,
    status: BatchStatus,
) -> Result<()> {
    let repo = BatchWatchRepository::new(db.clone());
    let batch = repo
        .list_for_job(job_id)
        .await?
        .into_iter()
        .find(|batch| batch.remote_batch_id == remote_batch_id)
        .expect("batch exists");
    assert!(repo.record_status(batch.id, status, Utc::now()).await?);
    Ok(())
}

#[tokio::test]
async fn all_completed_batches_complete_the_job() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a", "batch_b"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "completed");
    probe.set_status("batch_b", "completed");
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe.clone(), trigger.clone(), Limiter::new(10));

    let outcome = coordinator.process(&details.job).await;

    assert!(matches!(
        outcome,
        JobOutcome::Triggered {
            status: JobStatus::Completed,
            ..
        }
    ));
    let job = WatchJobRepository::new(db.clone())
        .find(details.job.id)
        .await?
        .unwrap();
    assert_eq!(job.job_status(), JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert!(job.next_check_at.is_none());

    let invocations = trigger.invocations();
    assert_eq!(invocations.len(), 1);
    let (target, metadata) = &invocations[0];
    assert_eq!(target.configuration_id, "987654");
    assert_eq!(
        target.tag.as_deref(),
        Some(format!("batchwatch-{}", details.job.id).as_str())
    );
    assert_eq!(metadata.batch_count_total, 2);
    assert_eq!(metadata.batch_count_completed, 2);
    assert_eq!(metadata.batch_count_failed, 0);
    assert_eq!(metadata.batch_ids_completed, vec!["batch_a", "batch_b"]);
    assert!(metadata.batch_ids_failed.is_empty());

    let logs = CheckLogRepository::new(db.clone());
    assert_eq!(
        logs.list_by_category(details.job.id, LogCategory::Triggered)
            .await?
            .len(),
        1
    );
    assert_eq!(
        logs.list_by_category(details.job.id, LogCategory::Success)
            .await?
            .len(),
        2
    );
    Ok(())
}

#[tokio::test]
async fn any_failed_batch_completes_with_failures() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a", "batch_b", "batch_c"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "completed");
    probe.script(
        "batch_b",
        vec![Ok(RemoteBatchState {
            status: "failed".to_string(),
            error_message: Some("invalid_jsonl: bad line 3".to_string()),
        })],
    );
    probe.set_status("batch_c", "cancelled");
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe, trigger.clone(), Limiter::new(10));

    let outcome = coordinator.process(&details.job).await;

    assert!(matches!(
        outcome,
        JobOutcome::Triggered {
            status: JobStatus::CompletedWithFailures,
            ..
        }
    ));
    let (_, metadata) = trigger.invocations().remove(0);
    assert_eq!(metadata.batch_count_completed, 1);
    assert_eq!(metadata.batch_count_failed, 2);
    assert_eq!(metadata.batch_ids_completed, vec!["batch_a"]);
    assert_eq!(metadata.batch_ids_failed, vec!["batch_b", "batch_c"]);

    let failed_logs = CheckLogRepository::new(db.clone())
        .list_by_category(details.job.id, LogCategory::Failed)
        .await?;
    assert_eq!(failed_logs.len(), 2);
    assert!(
        failed_logs
            .iter()
            .any(|entry| entry.message.contains("invalid_jsonl"))
    );

    let job = WatchJobRepository::new(db).find(details.job.id).await?.unwrap();
    assert!(job.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn trigger_fires_at_most_once_across_cycles() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "completed");
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe.clone(), trigger.clone(), Limiter::new(10));

    coordinator.process(&details.job).await;
    let second = coordinator.process(&details.job).await;
    let third = coordinator.process(&details.job).await;

    assert_eq!(second, JobOutcome::Skipped);
    assert_eq!(third, JobOutcome::Skipped);
    assert_eq!(trigger.count(), 1);
    assert_eq!(probe.calls_for("batch_a"), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_cycles_on_a_finished_job_trigger_once() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a", "batch_b"]).await?;
    set_batch_status(&db, details.job.id, "batch_a", BatchStatus::Completed).await?;
    set_batch_status(&db, details.job.id, "batch_b", BatchStatus::Completed).await?;
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(
        &db,
        Arc::new(ScriptedProbe::new()),
        trigger.clone(),
        Limiter::new(10),
    );

    let (first, second) = tokio::join!(
        coordinator.process(&details.job),
        coordinator.process(&details.job)
    );

    let triggered = [&first, &second]
        .iter()
        .filter(|outcome| matches!(outcome, JobOutcome::Triggered { .. }))
        .count();
    assert_eq!(triggered, 1);
    assert_eq!(trigger.count(), 1);
    Ok(())
}

#[tokio::test]
async fn one_cycle_completing_the_rest_triggers_once() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a", "batch_b", "batch_c"]).await?;
    set_batch_status(&db, details.job.id, "batch_c", BatchStatus::Completed).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "completed");
    probe.set_status("batch_b", "completed");
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe.clone(), trigger.clone(), Limiter::new(10));

    coordinator.process(&details.job).await;

    assert_eq!(trigger.count(), 1);
    let (_, metadata) = trigger.invocations().remove(0);
    assert_eq!(metadata.batch_count_completed, 3);
    assert_eq!(metadata.batch_count_failed, 0);
    assert_eq!(probe.calls_for("batch_c"), 0);
    Ok(())
}

#[tokio::test]
async fn all_terminal_job_triggers_without_probing() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a", "batch_b", "batch_c"]).await?;
    set_batch_status(&db, details.job.id, "batch_a", BatchStatus::Failed).await?;
    set_batch_status(&db, details.job.id, "batch_b", BatchStatus::Expired).await?;
    set_batch_status(&db, details.job.id, "batch_c", BatchStatus::Completed).await?;
    let probe = Arc::new(ScriptedProbe::new());
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe.clone(), trigger.clone(), Limiter::new(10));

    let outcome = coordinator.process(&details.job).await;

    assert!(matches!(
        outcome,
        JobOutcome::Triggered {
            status: JobStatus::CompletedWithFailures,
            ..
        }
    ));
    assert_eq!(probe.total_calls(), 0);
    let (_, metadata) = trigger.invocations().remove(0);
    assert_eq!(metadata.batch_ids_failed, vec!["batch_a", "batch_b"]);
    assert_eq!(metadata.batch_ids_completed, vec!["batch_c"]);
    Ok(())
}

#[tokio::test]
async fn terminal_batches_are_never_rechecked() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a", "batch_b"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "completed");
    probe.set_status("batch_b", "finalizing");
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe.clone(), trigger.clone(), Limiter::new(10));

    let first = coordinator.process(&details.job).await;
    assert!(matches!(first, JobOutcome::Rescheduled { .. }));

    // The provider now misreports the finished batch
    probe.set_status("batch_a", "failed");
    coordinator.process(&details.job).await;

    assert_eq!(probe.calls_for("batch_a"), 1);
    assert_eq!(probe.calls_for("batch_b"), 2);
    let batches = BatchWatchRepository::new(db.clone())
        .list_for_job(details.job.id)
        .await?;
    let batch_a = batches
        .iter()
        .find(|batch| batch.remote_batch_id == "batch_a")
        .unwrap();
    assert_eq!(batch_a.batch_status(), BatchStatus::Completed);
    assert!(batch_a.completed_at.is_some());
    assert_eq!(trigger.count(), 0);
    Ok(())
}

#[tokio::test]
async fn in_progress_cycle_reschedules_by_poll_interval() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "validating");
    let coordinator = coordinator(
        &db,
        probe,
        Arc::new(RecordingTrigger::succeeding()),
        Limiter::new(10),
    );

    let before = Utc::now();
    let outcome = coordinator.process(&details.job).await;

    let JobOutcome::Rescheduled { next_check_at } = outcome else {
        panic!("expected reschedule, got {outcome:?}");
    };
    assert!(next_check_at >= before + chrono::Duration::seconds(60));

    let job = WatchJobRepository::new(db.clone())
        .find(details.job.id)
        .await?
        .unwrap();
    assert_eq!(job.job_status(), JobStatus::Active);
    assert!(job.last_check_at.is_some());
    assert!(
        WatchJobRepository::new(db.clone())
            .due_jobs(Utc::now(), 50)
            .await?
            .is_empty()
    );

    let checking = CheckLogRepository::new(db)
        .list_by_category(details.job.id, LogCategory::Checking)
        .await?;
    assert_eq!(checking.len(), 1);
    assert_eq!(
        checking[0].message,
        "Checked 1 batch(es): 0 completed, 0 failed, 1 in progress"
    );
    Ok(())
}

#[tokio::test]
async fn transient_failure_then_success_leaves_no_error_log() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a", "batch_b"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.script(
        "batch_a",
        vec![
            Err(ProbeError::from_status(503, "service unavailable")),
            Ok(RemoteBatchState::new("completed")),
        ],
    );
    probe.set_status("batch_b", "in_progress");
    let coordinator = coordinator(
        &db,
        probe.clone(),
        Arc::new(RecordingTrigger::succeeding()),
        Limiter::new(10),
    );

    coordinator.process(&details.job).await;

    assert_eq!(probe.calls_for("batch_a"), 2);
    let errors = CheckLogRepository::new(db.clone())
        .list_by_category(details.job.id, LogCategory::Error)
        .await?;
    assert!(errors.is_empty());
    let batches = BatchWatchRepository::new(db)
        .list_for_job(details.job.id)
        .await?;
    assert_eq!(batches[0].batch_status(), BatchStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_log_one_error_without_status_change() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.script(
        "batch_a",
        vec![Err(ProbeError::transient("connection reset by peer"))],
    );
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe.clone(), trigger.clone(), Limiter::new(10));

    let outcome = coordinator.process(&details.job).await;

    assert!(matches!(outcome, JobOutcome::Rescheduled { .. }));
    assert_eq!(probe.calls_for("batch_a"), 3);
    let errors = CheckLogRepository::new(db.clone())
        .list_by_category(details.job.id, LogCategory::Error)
        .await?;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("after 3 attempt(s)"));

    let batches = BatchWatchRepository::new(db)
        .list_for_job(details.job.id)
        .await?;
    assert_eq!(batches[0].batch_status(), BatchStatus::InProgress);
    assert!(batches[0].completed_at.is_none());
    assert_eq!(trigger.count(), 0);
    Ok(())
}

#[tokio::test]
async fn permanent_probe_failure_is_not_retried() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.script(
        "batch_a",
        vec![Err(ProbeError::from_status(404, "no such batch"))],
    );
    let limiter = Limiter::new(10);
    let coordinator = coordinator(
        &db,
        probe.clone(),
        Arc::new(RecordingTrigger::succeeding()),
        limiter,
    );

    coordinator.process(&details.job).await;

    assert_eq!(probe.calls_for("batch_a"), 1);
    let errors = CheckLogRepository::new(db)
        .list_by_category(details.job.id, LogCategory::Error)
        .await?;
    assert_eq!(errors.len(), 1);
    Ok(())
}

#[tokio::test]
async fn batch_checker_reports_tagged_outcomes() -> Result<()> {
    use batchwatch::batch_checker::BatchChecker;
    use batchwatch::integrations::Credentials;

    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a", "batch_b"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "expired");
    probe.script("batch_b", vec![Err(ProbeError::permanent("malformed"))]);
    let checker = BatchChecker::new(
        probe,
        Credentials::new("sk-test"),
        test_utils::fast_retry_policy(3),
        Limiter::new(2),
        BatchWatchRepository::new(db.clone()),
        CheckLogRepository::new(db.clone()),
    );

    let expired = checker.check(&details.batches[0]).await;
    let gave_up = checker.check(&details.batches[1]).await;

    assert_eq!(
        expired,
        BatchCheckOutcome::Transitioned {
            to: BatchStatus::Expired
        }
    );
    assert!(matches!(
        gave_up,
        BatchCheckOutcome::GaveUp {
            kind: FailureKind::Permanent,
            attempts: 1,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn trigger_failure_marks_job_failed_without_retry() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "completed");
    let trigger = Arc::new(RecordingTrigger::failing(TriggerError::from_status(
        500,
        "storage API unavailable",
    )));
    let coordinator = coordinator(&db, probe, trigger.clone(), Limiter::new(10));

    let outcome = coordinator.process(&details.job).await;
    assert!(matches!(outcome, JobOutcome::TriggerFailed { .. }));
    assert_eq!(coordinator.process(&details.job).await, JobOutcome::Skipped);

    assert_eq!(trigger.count(), 1);
    let job = WatchJobRepository::new(db.clone())
        .find(details.job.id)
        .await?
        .unwrap();
    assert_eq!(job.job_status(), JobStatus::Failed);
    assert!(job.next_check_at.is_none());
    let errors = CheckLogRepository::new(db)
        .list_by_category(details.job.id, LogCategory::Error)
        .await?;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("storage API unavailable"));
    Ok(())
}

#[tokio::test]
async fn batch_fan_out_respects_the_limiter() -> Result<()> {
    let db = setup_test_db().await?;
    let ids: Vec<String> = (0..10).map(|i| format!("batch_{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let details = create_job(&db, &id_refs).await?;
    let probe = Arc::new(ScriptedProbe::new().with_delay(Duration::from_millis(30)));
    for id in &ids {
        probe.set_status(id, "completed");
    }
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe.clone(), trigger.clone(), Limiter::new(3));

    coordinator.process(&details.job).await;

    assert_eq!(probe.total_calls(), 10);
    assert!(probe.peak_concurrency() <= 3);
    assert_eq!(trigger.count(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_ticks_never_process_a_job_twice() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    let probe = Arc::new(ScriptedProbe::new().with_delay(Duration::from_millis(200)));
    probe.set_status("batch_a", "in_progress");
    let coordinator = Arc::new(coordinator(
        &db,
        probe.clone(),
        Arc::new(RecordingTrigger::succeeding()),
        Limiter::new(10),
    ));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        WatchJobRepository::new(db.clone()),
        coordinator,
    );

    let (first, second) = tokio::join!(orchestrator.run_once(), orchestrator.run_once());

    assert_eq!(first.jobs_dispatched + second.jobs_dispatched, 1);
    assert_eq!(probe.calls_for("batch_a"), 1);
    let job = WatchJobRepository::new(db)
        .find(details.job.id)
        .await?
        .unwrap();
    assert!(job.next_check_at.unwrap() > Utc::now().fixed_offset());
    Ok(())
}

#[tokio::test]
async fn running_loop_skips_jobs_in_flight_and_stops_on_cancel() -> Result<()> {
    let db = setup_test_db().await?;
    create_job(&db, &["batch_a"]).await?;
    let probe = Arc::new(ScriptedProbe::new().with_delay(Duration::from_millis(300)));
    probe.set_status("batch_a", "in_progress");
    let limiter = Limiter::new(10);
    let coordinator = Arc::new(coordinator(
        &db,
        probe.clone(),
        Arc::new(RecordingTrigger::succeeding()),
        limiter.clone(),
    ));
    let config = OrchestratorConfig {
        tick_interval_seconds: 1,
        min_sleep_ms: 10,
        shutdown_grace_seconds: 5,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(config, WatchJobRepository::new(db.clone()), coordinator);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(orchestrator.run(shutdown.clone()));

    // Many ticks elapse while the only job is still in flight
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(probe.calls_for("batch_a"), 1);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;

    assert_eq!(probe.calls_for("batch_a"), 1);
    assert!(limiter.in_flight_ids().is_empty());
    // Nothing sharing the limiter may call out after shutdown
    assert_eq!(limiter.wait_for_capacity().await, Err(LimiterClosed));
    Ok(())
}

#[tokio::test]
async fn paused_jobs_are_not_due_until_resumed() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    let repo = WatchJobRepository::new(db.clone());

    let paused = repo.pause(details.job.id).await?;
    assert_eq!(paused.job_status(), JobStatus::Paused);
    assert!(paused.next_check_at.is_none());
    assert!(repo.due_jobs(Utc::now(), 50).await?.is_empty());

    let probe = Arc::new(ScriptedProbe::new());
    let coordinator = coordinator(
        &db,
        probe.clone(),
        Arc::new(RecordingTrigger::succeeding()),
        Limiter::new(10),
    );
    assert_eq!(coordinator.process(&details.job).await, JobOutcome::Skipped);
    assert_eq!(probe.total_calls(), 0);

    let resumed = repo.resume(details.job.id).await?;
    assert_eq!(resumed.job_status(), JobStatus::Active);
    let due = repo.due_jobs(Utc::now(), 50).await?;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, details.job.id);
    Ok(())
}

#[tokio::test]
async fn resume_during_a_cycle_keeps_the_job_due() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    let repo = WatchJobRepository::new(db.clone());
    let probe = Arc::new(ScriptedProbe::new().with_delay(Duration::from_millis(200)));
    probe.set_status("batch_a", "in_progress");
    let coordinator = coordinator(
        &db,
        probe.clone(),
        Arc::new(RecordingTrigger::succeeding()),
        Limiter::new(10),
    );

    let (outcome, toggled) = tokio::join!(coordinator.process(&details.job), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        repo.pause(details.job.id).await?;
        repo.resume(details.job.id).await
    });
    toggled?;

    assert_eq!(outcome, JobOutcome::Skipped);
    assert_eq!(probe.calls_for("batch_a"), 1);
    let due = repo.due_jobs(Utc::now(), 50).await?;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, details.job.id);
    Ok(())
}

#[tokio::test]
async fn failed_batch_status_write_is_logged_as_error() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    db.execute_unprepared(
        "CREATE TRIGGER block_batch_updates BEFORE UPDATE ON batch_watches \
         BEGIN SELECT RAISE(ABORT, 'batch_watches is read-only'); END;",
    )
    .await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "completed");
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(&db, probe.clone(), trigger.clone(), Limiter::new(10));

    let outcome = coordinator.process(&details.job).await;

    assert!(matches!(outcome, JobOutcome::Rescheduled { .. }));
    assert_eq!(trigger.count(), 0);
    let errors = CheckLogRepository::new(db.clone())
        .list_by_category(details.job.id, LogCategory::Error)
        .await?;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Failed to record status completed"));
    assert!(errors[0].message.contains("batch_a"));

    let batches = BatchWatchRepository::new(db.clone())
        .list_for_job(details.job.id)
        .await?;
    assert_eq!(batches[0].batch_status(), BatchStatus::InProgress);
    Ok(())
}

#[tokio::test]
async fn failed_reschedule_is_logged_as_error() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    db.execute_unprepared(
        "CREATE TRIGGER block_job_updates BEFORE UPDATE ON watch_jobs \
         BEGIN SELECT RAISE(ABORT, 'watch_jobs is read-only'); END;",
    )
    .await?;
    let probe = Arc::new(ScriptedProbe::new());
    probe.set_status("batch_a", "in_progress");
    let coordinator = coordinator(
        &db,
        probe.clone(),
        Arc::new(RecordingTrigger::succeeding()),
        Limiter::new(10),
    );

    let outcome = coordinator.process(&details.job).await;

    assert!(matches!(outcome, JobOutcome::PersistFailed { .. }));
    let errors = CheckLogRepository::new(db.clone())
        .list_by_category(details.job.id, LogCategory::Error)
        .await?;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Failed to schedule next check"));
    Ok(())
}

#[tokio::test]
async fn failed_trigger_claim_is_logged_as_error() -> Result<()> {
    let db = setup_test_db().await?;
    let details = create_job(&db, &["batch_a"]).await?;
    set_batch_status(&db, details.job.id, "batch_a", BatchStatus::Completed).await?;
    db.execute_unprepared(
        "CREATE TRIGGER block_job_updates BEFORE UPDATE ON watch_jobs \
         BEGIN SELECT RAISE(ABORT, 'watch_jobs is read-only'); END;",
    )
    .await?;
    let trigger = Arc::new(RecordingTrigger::succeeding());
    let coordinator = coordinator(
        &db,
        Arc::new(ScriptedProbe::new()),
        trigger.clone(),
        Limiter::new(10),
    );

    let outcome = coordinator.process(&details.job).await;

    assert!(matches!(outcome, JobOutcome::PersistFailed { .. }));
    assert_eq!(trigger.count(), 0);
    let errors = CheckLogRepository::new(db.clone())
        .list_by_category(details.job.id, LogCategory::Error)
        .await?;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Failed to claim job for trigger"));
    Ok(())
}
