//! In-memory job store.
//!
//! Same conditional-update semantics as the Postgres store, guarded by one
//! mutex instead of row-level atomicity. Used by the test suite and by
//! single-process hosts that do not want a relational store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use crate::store::{FailureDisposition, JobState, JobStatus, JobStore, LeaseHolder};

/// Finalization failed because the caller no longer holds the lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostLease {
    job_type: String,
}

impl std::fmt::Display for LostLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lost lease for job `{}`", self.job_type)
    }
}

impl std::error::Error for LostLease {}

#[derive(Debug, Clone)]
struct Row {
    state: JobState,
    next_due: SystemTime,
    retry_count: u32,
    lease_holder: Option<LeaseHolder>,
    lease_expires_at: Option<SystemTime>,
}

impl Row {
    fn new(first_due: SystemTime) -> Self {
        Self {
            state: JobState::Due,
            next_due: first_due,
            retry_count: 0,
            lease_holder: None,
            lease_expires_at: None,
        }
    }

    fn lease_expired(&self, now: SystemTime) -> bool {
        self.lease_expires_at.is_none_or(|expires| expires <= now)
    }

    fn holds(&self, holder: LeaseHolder) -> bool {
        self.lease_holder == Some(holder)
    }

    fn clear_lease(&mut self) {
        self.lease_holder = None;
        self.lease_expires_at = None;
    }
}

/// Shared-map store; clones share state the way pool handles do.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    rows: Arc<Mutex<HashMap<String, Row>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, Row>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Operator reset for a permanently failed job: back to due, retry count
    /// cleared. Mirrors the out-of-band intervention the design requires.
    pub fn reset_job(&self, job_type: &str, next_due: SystemTime) {
        if let Some(row) = self.rows().get_mut(job_type) {
            row.state = JobState::Due;
            row.next_due = next_due;
            row.retry_count = 0;
            row.clear_lease();
        }
    }
}

impl JobStore for InMemoryJobStore {
    type Error = LostLease;

    async fn ensure_registered(
        &self,
        job_type: &str,
        first_due: SystemTime,
    ) -> Result<(), Self::Error> {
        self.rows()
            .entry(job_type.to_owned())
            .or_insert_with(|| Row::new(first_due));
        Ok(())
    }

    async fn try_acquire(
        &self,
        job_type: &str,
        holder: LeaseHolder,
        lease: Duration,
    ) -> Result<bool, Self::Error> {
        let now = SystemTime::now();
        let mut rows = self.rows();
        let Some(row) = rows.get_mut(job_type) else {
            return Ok(false);
        };
        if row.state == JobState::FailedPermanent {
            return Ok(false);
        }
        if row.next_due > now {
            return Ok(false);
        }
        if row.lease_holder.is_some() && !row.lease_expired(now) {
            return Ok(false);
        }

        row.state = JobState::Leased;
        row.lease_holder = Some(holder);
        row.lease_expires_at = Some(now + lease);
        Ok(true)
    }

    async fn release(&self, job_type: &str, holder: LeaseHolder) -> Result<(), Self::Error> {
        let mut rows = self.rows();
        if let Some(row) = rows.get_mut(job_type) {
            if row.holds(holder) {
                row.state = JobState::Due;
                row.clear_lease();
            }
        }
        Ok(())
    }

    async fn complete(
        &self,
        job_type: &str,
        holder: LeaseHolder,
        next_due: SystemTime,
    ) -> Result<(), Self::Error> {
        let mut rows = self.rows();
        let row = rows.get_mut(job_type).filter(|row| row.holds(holder));
        let Some(row) = row else {
            return Err(LostLease {
                job_type: job_type.to_owned(),
            });
        };
        row.state = JobState::Due;
        row.next_due = next_due;
        row.retry_count = 0;
        row.clear_lease();
        Ok(())
    }

    async fn record_failure(
        &self,
        job_type: &str,
        holder: LeaseHolder,
        max_retries: u32,
    ) -> Result<FailureDisposition, Self::Error> {
        let mut rows = self.rows();
        let row = rows.get_mut(job_type).filter(|row| row.holds(holder));
        let Some(row) = row else {
            return Err(LostLease {
                job_type: job_type.to_owned(),
            });
        };
        row.retry_count += 1;
        row.clear_lease();
        if row.retry_count >= max_retries {
            row.state = JobState::FailedPermanent;
            Ok(FailureDisposition::FailedPermanent)
        } else {
            row.state = JobState::Due;
            Ok(FailureDisposition::RetryScheduled)
        }
    }

    async fn job_state(&self, job_type: &str) -> Result<Option<JobStatus>, Self::Error> {
        let now = SystemTime::now();
        let rows = self.rows();
        Ok(rows.get(job_type).map(|row| {
            let state = match row.state {
                // Expired leases are logically due; no sweeper runs.
                JobState::Leased if row.lease_expired(now) => JobState::Due,
                state => state,
            };
            JobStatus {
                state,
                next_due: row.next_due,
                retry_count: row.retry_count,
            }
        }))
    }
}
