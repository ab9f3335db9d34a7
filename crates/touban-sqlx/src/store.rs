//! Postgres job store.
//!
//! Lease semantics live in the SQL: acquisition and every finalization are
//! single conditional UPDATEs, so racing engine processes resolve on the
//! row itself. `rows_affected() == 0` on acquisition is losing the race;
//! on finalization it means the lease expired and moved on.

use std::time::{Duration, SystemTime};

use sqlx::Row as _;
use touban_core::store::{FailureDisposition, JobState, JobStatus, JobStore, LeaseHolder};

use crate::queries;
use crate::time::PgTimestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// Categorization of store failures.
pub enum ErrorKind {
    /// Errors originating from database interactions.
    Database,
    /// The caller lost its lease (holder mismatch or 0 rows affected).
    LostLease,
    /// The row was malformed (unknown state value).
    Decode,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: Box<dyn std::error::Error + Send + 'static>,
}

impl Error {
    fn new_database(error: Box<dyn std::error::Error + Send + 'static>) -> Self {
        Error {
            kind: ErrorKind::Database,
            inner: error,
        }
    }

    fn lost_lease(job_type: &str) -> Self {
        Error {
            kind: ErrorKind::LostLease,
            inner: Box::new(LostLeaseError {
                job_type: job_type.to_owned(),
            }),
        }
    }

    fn decode(message: String) -> Self {
        Error {
            kind: ErrorKind::Decode,
            inner: Box::new(DecodeError(message)),
        }
    }

    /// Return the category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Self::new_database(Box::new(value))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[derive(Debug)]
struct LostLeaseError {
    job_type: String,
}

impl std::fmt::Display for LostLeaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lost lease for job `{}`", self.job_type)
    }
}

impl std::error::Error for LostLeaseError {}

#[derive(Debug)]
struct DecodeError(String);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DecodeError {}

fn state_from_column(state: &str) -> Result<JobState, Error> {
    match state {
        "due" => Ok(JobState::Due),
        "leased" => Ok(JobState::Leased),
        "failed_permanent" => Ok(JobState::FailedPermanent),
        other => Err(Error::decode(format!("unknown job state `{other}`"))),
    }
}

fn lease_interval(lease: Duration) -> Result<sqlx::postgres::types::PgInterval, Error> {
    sqlx::postgres::types::PgInterval::try_from(lease).map_err(|error| Error::new_database(error))
}

/// Job record store backed by `touban_scheduled_job`.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: sqlx::PgPool,
}

impl PgJobStore {
    pub const fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    /// Operator reset for a permanently failed job: back to due with a fresh
    /// `next_due` and a cleared retry count.
    pub async fn reset_job(&self, job_type: &str, next_due: SystemTime) -> Result<(), Error> {
        sqlx::query(queries::RESET_JOB)
            .bind(job_type)
            .bind(PgTimestamp(next_due))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl JobStore for PgJobStore {
    type Error = Error;

    async fn ensure_registered(
        &self,
        job_type: &str,
        first_due: SystemTime,
    ) -> Result<(), Self::Error> {
        sqlx::query(queries::ENSURE_REGISTERED)
            .bind(job_type)
            .bind(PgTimestamp(first_due))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_acquire(
        &self,
        job_type: &str,
        holder: LeaseHolder,
        lease: Duration,
    ) -> Result<bool, Self::Error> {
        let lease = lease_interval(lease)?;
        let res = sqlx::query(queries::TRY_ACQUIRE)
            .bind(job_type)
            .bind(holder.as_uuid())
            .bind(&lease)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn release(&self, job_type: &str, holder: LeaseHolder) -> Result<(), Self::Error> {
        // Zero rows means someone else took over; that is the expected
        // outcome for a stale holder.
        sqlx::query(queries::RELEASE)
            .bind(job_type)
            .bind(holder.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete(
        &self,
        job_type: &str,
        holder: LeaseHolder,
        next_due: SystemTime,
    ) -> Result<(), Self::Error> {
        let res = sqlx::query(queries::COMPLETE)
            .bind(job_type)
            .bind(holder.as_uuid())
            .bind(PgTimestamp(next_due))
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::lost_lease(job_type));
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        job_type: &str,
        holder: LeaseHolder,
        max_retries: u32,
    ) -> Result<FailureDisposition, Self::Error> {
        let max_retries = i32::try_from(max_retries).unwrap_or(i32::MAX);
        let row = sqlx::query(queries::RECORD_FAILURE)
            .bind(job_type)
            .bind(holder.as_uuid())
            .bind(max_retries)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(Error::lost_lease(job_type));
        };
        let state: String = row.try_get("state")?;
        match state_from_column(&state)? {
            JobState::FailedPermanent => Ok(FailureDisposition::FailedPermanent),
            _ => Ok(FailureDisposition::RetryScheduled),
        }
    }

    async fn job_state(&self, job_type: &str) -> Result<Option<JobStatus>, Self::Error> {
        let row = sqlx::query(queries::JOB_STATE)
            .bind(job_type)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let state: String = row.try_get("state")?;
        let mut state = state_from_column(&state)?;
        let lease_expired: bool = row.try_get("lease_expired")?;
        if state == JobState::Leased && lease_expired {
            state = JobState::Due;
        }
        let next_due: PgTimestamp = row.try_get("next_due")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(Some(JobStatus {
            state,
            next_due: next_due.0,
            retry_count: retry_count.unsigned_abs(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_column_round_trip() {
        assert_eq!(state_from_column("due").unwrap(), JobState::Due);
        assert_eq!(state_from_column("leased").unwrap(), JobState::Leased);
        assert_eq!(
            state_from_column("failed_permanent").unwrap(),
            JobState::FailedPermanent
        );
        let err = state_from_column("??").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
