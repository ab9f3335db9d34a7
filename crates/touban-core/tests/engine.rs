//! End-to-end scheduler behavior against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use touban_core::{
    BatchProgress, ConfigError, InMemoryJobStore, JobCatalog, JobDefinition, JobError, JobState,
    JobStore, LeaseHolder, RecurringJob, Scheduler, SchedulerConfig, SchedulerConfigBuilder,
    TASK_CLEANUP, WORKBASKET_CLEANUP,
};

/// Job with a fixed pool of candidates, processed `batch_size` at a time.
struct CountingJob {
    remaining: AtomicU32,
    batch_calls: AtomicU32,
    processed: AtomicU32,
}

impl CountingJob {
    fn with_candidates(candidates: u32) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicU32::new(candidates),
            batch_calls: AtomicU32::new(0),
            processed: AtomicU32::new(0),
        })
    }
}

#[async_trait::async_trait]
impl RecurringJob for CountingJob {
    async fn run_batch(&self, batch_size: u32) -> Result<BatchProgress, JobError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.remaining.load(Ordering::SeqCst);
        let take = remaining.min(batch_size);
        self.remaining.fetch_sub(take, Ordering::SeqCst);
        self.processed.fetch_add(take, Ordering::SeqCst);
        if remaining <= batch_size {
            Ok(BatchProgress::Done)
        } else {
            Ok(BatchProgress::More)
        }
    }
}

struct AlwaysFailJob {
    attempts: AtomicU32,
}

#[async_trait::async_trait]
impl RecurringJob for AlwaysFailJob {
    async fn run_batch(&self, _batch_size: u32) -> Result<BatchProgress, JobError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err("simulated batch failure".into())
    }
}

fn past() -> SystemTime {
    SystemTime::now() - Duration::from_secs(3_600)
}

/// Builder with all built-ins off and a fast tick, for focused scenarios.
fn fast_config() -> SchedulerConfigBuilder {
    let mut builder = SchedulerConfig::builder()
        .initial_start_delay(Duration::from_millis(5))
        .tick_period(Duration::from_millis(15));
    for job_type in [
        touban_core::TASK_CLEANUP,
        touban_core::WORKBASKET_CLEANUP,
        touban_core::HISTORY_CLEANUP,
        touban_core::TASK_PRIORITY_RECOMPUTE,
        touban_core::USER_INFO_REFRESH,
    ] {
        builder = builder.job(JobDefinition::new(job_type).enabled(false));
    }
    builder
}

fn one_hour_job(job_type: &str) -> JobDefinition {
    JobDefinition::new(job_type)
        .first_run(past())
        .run_every(Duration::from_secs(3_600))
        .lock_expiration(Duration::from_secs(30))
}

#[tokio::test]
async fn concurrent_acquisition_has_at_most_one_winner() {
    let store = InMemoryJobStore::new();
    store.ensure_registered("task-cleanup", past()).await.unwrap();

    for _round in 0..20 {
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let holder = LeaseHolder::generate();
                let won = store
                    .try_acquire("task-cleanup", holder, Duration::from_secs(30))
                    .await
                    .unwrap();
                (holder, won)
            }));
        }
        let mut winners = Vec::new();
        for handle in handles {
            let (holder, won) = handle.await.unwrap();
            if won {
                winners.push(holder);
            }
        }
        assert_eq!(winners.len(), 1, "exactly one holder per round");
        store.release("task-cleanup", winners[0]).await.unwrap();
    }
}

#[tokio::test]
async fn two_engines_shared_store_execute_each_job_once() {
    let store = InMemoryJobStore::new();
    let job = CountingJob::with_candidates(0);

    let mut schedulers = Vec::new();
    for _ in 0..2 {
        let config = fast_config()
            .job(one_hour_job("counting").batch_size(10))
            .custom_job("counting")
            .build()
            .unwrap();
        let mut catalog = JobCatalog::new();
        catalog.register("counting", job.clone()).unwrap();
        schedulers.push(Scheduler::new(config, store.clone(), catalog).unwrap());
    }

    let mut handles = Vec::new();
    for scheduler in schedulers {
        handles.push(tokio::spawn(
            scheduler
                .with_graceful_shutdown(tokio::time::sleep(Duration::from_millis(150)))
                .run(),
        ));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Due once, executed once, even with two racing engines ticking fast.
    assert_eq!(job.batch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn candidates_are_processed_in_bounded_batches() {
    let store = InMemoryJobStore::new();
    let job = CountingJob::with_candidates(5);

    let config = fast_config()
        .job(one_hour_job("counting").batch_size(2))
        .custom_job("counting")
        .build()
        .unwrap();
    let mut catalog = JobCatalog::new();
    catalog.register("counting", job.clone()).unwrap();

    Scheduler::new(config, store.clone(), catalog)
        .unwrap()
        .with_graceful_shutdown(tokio::time::sleep(Duration::from_millis(100)))
        .run()
        .await;

    // 5 candidates at batch size 2: three committed batches (2, 2, 1).
    assert_eq!(job.batch_calls.load(Ordering::SeqCst), 3);
    assert_eq!(job.processed.load(Ordering::SeqCst), 5);

    let status = store.job_state("counting").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Due);
    assert_eq!(status.retry_count, 0);
    assert!(status.next_due > SystemTime::now());
}

#[tokio::test]
async fn interrupted_run_keeps_committed_batches_and_stays_due() {
    let store = InMemoryJobStore::new();
    let holder = LeaseHolder::generate();
    let job = CountingJob::with_candidates(5);
    store.ensure_registered("counting", past()).await.unwrap();

    // Process two batches, then the holder vanishes without finalizing,
    // as a killed process would.
    assert!(store
        .try_acquire("counting", holder, Duration::from_millis(20))
        .await
        .unwrap());
    assert_eq!(job.run_batch(2).await.unwrap(), BatchProgress::More);
    assert_eq!(job.run_batch(2).await.unwrap(), BatchProgress::More);
    assert_eq!(job.processed.load(Ordering::SeqCst), 4);

    tokio::time::sleep(Duration::from_millis(40)).await;

    // A clean death is not an execution failure: no retry counted, and the
    // job is acquirable again once the lease lapsed.
    let status = store.job_state("counting").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Due);
    assert_eq!(status.retry_count, 0);

    let second = LeaseHolder::generate();
    assert!(store
        .try_acquire("counting", second, Duration::from_secs(30))
        .await
        .unwrap());
    assert_eq!(job.run_batch(2).await.unwrap(), BatchProgress::Done);
    assert_eq!(job.processed.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn exhausted_retries_freeze_the_job() {
    let store = InMemoryJobStore::new();
    let job = Arc::new(AlwaysFailJob {
        attempts: AtomicU32::new(0),
    });

    let config = fast_config()
        .max_job_retries(2)
        .job(one_hour_job("flaky"))
        .custom_job("flaky")
        .build()
        .unwrap();
    let mut catalog = JobCatalog::new();
    catalog.register("flaky", job.clone()).unwrap();

    Scheduler::new(config, store.clone(), catalog)
        .unwrap()
        .with_graceful_shutdown(tokio::time::sleep(Duration::from_millis(200)))
        .run()
        .await;

    // Two failed attempts, then frozen; later ticks never selected it again.
    assert_eq!(job.attempts.load(Ordering::SeqCst), 2);
    let status = store.job_state("flaky").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::FailedPermanent);
    assert_eq!(status.retry_count, 2);
}

#[tokio::test]
async fn per_job_enable_flags_are_independent() {
    let store = InMemoryJobStore::new();
    let task_cleanup = CountingJob::with_candidates(0);
    let workbasket_cleanup = CountingJob::with_candidates(0);

    let config = fast_config()
        .job(one_hour_job(TASK_CLEANUP).enabled(false))
        .job(one_hour_job(WORKBASKET_CLEANUP))
        .build()
        .unwrap();
    let mut catalog = JobCatalog::new();
    catalog.register(TASK_CLEANUP, task_cleanup.clone()).unwrap();
    catalog
        .register(WORKBASKET_CLEANUP, workbasket_cleanup.clone())
        .unwrap();

    Scheduler::new(config, store.clone(), catalog)
        .unwrap()
        .with_graceful_shutdown(tokio::time::sleep(Duration::from_millis(100)))
        .run()
        .await;

    assert_eq!(task_cleanup.batch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(workbasket_cleanup.batch_calls.load(Ordering::SeqCst), 1);
    // The disabled job never even got a row.
    assert!(store.job_state(TASK_CLEANUP).await.unwrap().is_none());
}

#[tokio::test]
async fn next_due_stays_on_the_first_run_grid() {
    let store = InMemoryJobStore::new();
    let job = CountingJob::with_candidates(0);
    let first_run = SystemTime::now() - Duration::from_millis(330);
    let run_every = Duration::from_millis(250);

    let config = fast_config()
        .job(
            JobDefinition::new("grid")
                .first_run(first_run)
                .run_every(run_every),
        )
        .custom_job("grid")
        .build()
        .unwrap();
    let mut catalog = JobCatalog::new();
    catalog.register("grid", job.clone()).unwrap();

    Scheduler::new(config, store.clone(), catalog)
        .unwrap()
        .with_graceful_shutdown(tokio::time::sleep(Duration::from_millis(400)))
        .run()
        .await;

    assert!(job.batch_calls.load(Ordering::SeqCst) >= 1);
    let status = store.job_state("grid").await.unwrap().unwrap();
    let offset = status.next_due.duration_since(first_run).unwrap();
    // first_run + n * run_every exactly, no drift from execution latency.
    assert_eq!(offset.as_nanos() % run_every.as_nanos(), 0);
    assert!(status.next_due > SystemTime::now() - run_every);
}

#[tokio::test]
async fn disabled_scheduler_never_starts() {
    let store = InMemoryJobStore::new();
    let job = CountingJob::with_candidates(0);

    let config = fast_config()
        .enabled(false)
        .job(one_hour_job("counting"))
        .custom_job("counting")
        .build()
        .unwrap();
    let mut catalog = JobCatalog::new();
    catalog.register("counting", job.clone()).unwrap();

    // `run` returns immediately instead of looping forever.
    tokio::time::timeout(
        Duration::from_millis(100),
        Scheduler::new(config, store.clone(), catalog).unwrap().run(),
    )
    .await
    .unwrap();

    assert_eq!(job.batch_calls.load(Ordering::SeqCst), 0);
    assert!(store.job_state("counting").await.unwrap().is_none());
}

#[tokio::test]
async fn unresolved_jobs_fail_at_construction() {
    let store = InMemoryJobStore::new();

    let config = fast_config().custom_job("ghost").build().unwrap();
    let err = Scheduler::new(config, store.clone(), JobCatalog::new()).unwrap_err();
    assert!(matches!(err, ConfigError::UnresolvedJob { ref job_type } if job_type == "ghost"));

    // Same for an enabled built-in with no implementation registered.
    let config = fast_config().job(one_hour_job(TASK_CLEANUP)).build().unwrap();
    let err = Scheduler::new(config, store, JobCatalog::new()).unwrap_err();
    assert!(matches!(err, ConfigError::UnresolvedJob { ref job_type } if job_type == TASK_CLEANUP));
}
