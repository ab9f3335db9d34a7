//! Runs one acquired job to completion in bounded batches.

use std::time::{Duration, SystemTime};

use crate::catalog::{BatchProgress, RecurringJob};
use crate::config::JobDefinition;
use crate::store::{FailureDisposition, JobStore, LeaseHolder};

/// Outcome of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All batches committed; the job was rescheduled on its grid.
    Completed,
    /// A batch failed; the job stays due and retries on a later tick.
    RetryScheduled,
    /// A batch failed with the retry budget exhausted; the job is frozen.
    FailedPermanent,
}

/// Drive `job` through batches of `batch_size` until exhaustion or failure,
/// then write the outcome back through `store`.
///
/// A thrown batch aborts the whole attempt; committed batches stay committed.
pub(crate) async fn run_job<S>(
    store: &S,
    job_type: &str,
    holder: LeaseHolder,
    job: &dyn RecurringJob,
    def: &JobDefinition,
    batch_size: u32,
    max_retries: u32,
) -> RunOutcome
where
    S: JobStore,
{
    let mut batches: u64 = 0;
    loop {
        match job.run_batch(batch_size).await {
            Ok(BatchProgress::More) => {
                batches += 1;
            }
            Ok(BatchProgress::Done) => {
                batches += 1;
                break;
            }
            Err(error) => {
                tracing::error!(error = %error, job_type = job_type, batches = batches, "job batch failed");
                let disposition = store
                    .record_failure(job_type, holder, max_retries)
                    .await
                    .inspect_err(
                        |error| tracing::error!(error = %error, job_type = job_type, "failed to record job failure"),
                    );
                return match disposition {
                    Ok(FailureDisposition::FailedPermanent) => {
                        tracing::error!(
                            job_type = job_type,
                            max_retries = max_retries,
                            "retry budget exhausted; job frozen until operator reset"
                        );
                        RunOutcome::FailedPermanent
                    }
                    Ok(FailureDisposition::RetryScheduled) | Err(_) => RunOutcome::RetryScheduled,
                };
            }
        }
    }

    let next_due = next_on_grid(def.first_run, def.run_every, SystemTime::now());
    let _ = store
        .complete(job_type, holder, next_due)
        .await
        .inspect_err(
            |error| tracing::error!(error = %error, job_type = job_type, "failed to complete job"),
        );
    tracing::debug!(
        job_type = job_type,
        batches = batches,
        next_due = ?next_due,
        "job completed"
    );
    RunOutcome::Completed
}

/// Next instant strictly after `now` on the `first_run + n * run_every` grid.
///
/// Schedules stay aligned to the anchor even when a run finishes late.
pub(crate) fn next_on_grid(
    first_run: SystemTime,
    run_every: Duration,
    now: SystemTime,
) -> SystemTime {
    let elapsed = match now.duration_since(first_run) {
        Ok(elapsed) => elapsed,
        // Anchor still ahead of us.
        Err(_) => return first_run,
    };
    let periods = elapsed.as_nanos() / run_every.as_nanos() + 1;
    let offset = u64::try_from(periods * run_every.as_nanos()).unwrap_or(u64::MAX);
    first_run + Duration::from_nanos(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_anchored_at_first_run() {
        let first_run = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let run_every = Duration::from_secs(60);

        // Mid-interval: next slot is the following one, not now + run_every.
        let now = first_run + Duration::from_secs(150);
        let next = next_on_grid(first_run, run_every, now);
        assert_eq!(next, first_run + Duration::from_secs(180));

        // Exactly on a slot: advance to the next slot, never reschedule in place.
        let now = first_run + Duration::from_secs(120);
        let next = next_on_grid(first_run, run_every, now);
        assert_eq!(next, first_run + Duration::from_secs(180));
    }

    #[test]
    fn grid_before_anchor_keeps_first_run() {
        let first_run = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let now = SystemTime::UNIX_EPOCH;
        assert_eq!(
            next_on_grid(first_run, Duration::from_secs(60), now),
            first_run
        );
    }

    #[test]
    fn grid_does_not_drift_after_many_periods() {
        let first_run = SystemTime::UNIX_EPOCH;
        let run_every = Duration::from_millis(50);
        let now = first_run + Duration::from_millis(50 * 1_000 + 7);
        let next = next_on_grid(first_run, run_every, now);
        let offset = next.duration_since(first_run).unwrap();
        assert_eq!(offset.as_nanos() % run_every.as_nanos(), 0);
        assert!(next > now);
        assert!(next <= now + run_every);
    }
}
