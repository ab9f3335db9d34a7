//! Store contract: one row per job type, mutated only through conditional
//! updates.
//!
//! Why: the shared row is the sole cross-process coordination primitive.
//! - Acquisition must be a single atomic conditional write; two engines
//!   racing on the same tick cannot both win.
//! - Nothing may assume it still holds a lease without re-verifying through
//!   the same conditional-write mechanism.
//! - An expired lease is logically due; expiry is evaluated lazily at
//!   acquisition time, never by a separate sweep.

use std::time::{Duration, SystemTime};

use uuid::Uuid;

/// Opaque per-process token identifying the lease holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseHolder(Uuid);

impl LeaseHolder {
    /// Generate a fresh holder token (one per engine process).
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for LeaseHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Persisted state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobState {
    /// Eligible for acquisition once `next_due` has passed.
    Due,
    /// Held by some process with a non-expired lease.
    Leased,
    /// Retry budget exhausted; requires operator intervention.
    FailedPermanent,
}

/// Snapshot of a job row for observability and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    /// Effective state: a row whose lease already expired reports [`JobState::Due`].
    pub state: JobState,
    pub next_due: SystemTime,
    pub retry_count: u32,
}

/// What a recorded batch failure did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Retry budget remains; the row is due again on the next tick.
    RetryScheduled,
    /// The row froze in [`JobState::FailedPermanent`].
    FailedPermanent,
}

mod tmp {
    use super::{FailureDisposition, JobStatus, LeaseHolder};
    use std::time::{Duration, SystemTime};

    /// Job record store + lease manager.
    ///
    /// Implementations express every mutation as one atomic conditional
    /// write; zero rows affected on acquisition is the normal lost-the-race
    /// outcome, while zero rows on finalization means the lease was lost to
    /// another process and surfaces as the implementation's error.
    #[trait_variant::make(JobStore: Send)]
    pub trait LocalJobStore {
        type Error: std::error::Error + Send;

        /// Create the row for `job_type` if it does not exist yet. Idempotent.
        #[allow(unused)]
        async fn ensure_registered(
            &self,
            job_type: &str,
            first_due: SystemTime,
        ) -> Result<(), Self::Error>;

        /// Attempt to lease `job_type` for `lease`.
        ///
        /// Succeeds only if the row is due and either unleased or its stored
        /// lease has expired. `Ok(false)` is a normal contention outcome.
        #[allow(unused)]
        async fn try_acquire(
            &self,
            job_type: &str,
            holder: LeaseHolder,
            lease: Duration,
        ) -> Result<bool, Self::Error>;

        /// Clear the lease if `holder` still owns it; a stale holder is a
        /// silent no-op.
        #[allow(unused)]
        async fn release(&self, job_type: &str, holder: LeaseHolder) -> Result<(), Self::Error>;

        /// Record a fully successful run: reschedule to `next_due`, reset the
        /// retry count, clear the lease. Fails if `holder` lost the lease.
        #[allow(unused)]
        async fn complete(
            &self,
            job_type: &str,
            holder: LeaseHolder,
            next_due: SystemTime,
        ) -> Result<(), Self::Error>;

        /// Record a failed run attempt: bump the retry count, freeze the row
        /// once `max_retries` is reached, clear the lease.
        #[allow(unused)]
        async fn record_failure(
            &self,
            job_type: &str,
            holder: LeaseHolder,
            max_retries: u32,
        ) -> Result<FailureDisposition, Self::Error>;

        /// Current row snapshot, `None` if the job type was never registered.
        #[allow(unused)]
        async fn job_state(&self, job_type: &str) -> Result<Option<JobStatus>, Self::Error>;
    }
}

pub use tmp::JobStore;
