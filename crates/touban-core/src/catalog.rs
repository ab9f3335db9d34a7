//! Registry mapping job-type ids to executable units.
//!
//! Built-in and custom jobs are registered through the same call; resolution
//! happens once at engine construction, so a missing identifier is a startup
//! error rather than a scheduling-time surprise.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ConfigError;

/// Error type carried out of a job batch.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Whether a batch left work behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchProgress {
    /// More candidates remain; the executor will run another batch.
    More,
    /// The candidate queue is exhausted for this run.
    Done,
}

/// One recurring unit of background work.
///
/// A batch is one atomic unit: select up to `batch_size` candidates, process
/// them, commit. Batches must be idempotent criteria-based steps (delete
/// rows matching a predicate, write only when changed) so that a duplicate
/// run after a lease handover wastes work but cannot corrupt.
#[async_trait::async_trait]
pub trait RecurringJob: Send + Sync {
    async fn run_batch(&self, batch_size: u32) -> Result<BatchProgress, JobError>;
}

/// Job-type id → implementation registry.
#[derive(Default, Clone)]
pub struct JobCatalog {
    jobs: HashMap<String, Arc<dyn RecurringJob>>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation for `job_type`. Registering the same id
    /// twice is a configuration error.
    pub fn register(
        &mut self,
        job_type: impl Into<String>,
        job: Arc<dyn RecurringJob>,
    ) -> Result<(), ConfigError> {
        let job_type = job_type.into();
        if self.jobs.contains_key(&job_type) {
            return Err(ConfigError::DuplicateJob { job_type });
        }
        self.jobs.insert(job_type, job);
        Ok(())
    }

    pub fn get(&self, job_type: &str) -> Option<&Arc<dyn RecurringJob>> {
        self.jobs.get(job_type)
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl std::fmt::Debug for JobCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types = self.jobs.keys().collect::<Vec<_>>();
        types.sort();
        f.debug_struct("JobCatalog").field("jobs", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopJob;

    #[async_trait::async_trait]
    impl RecurringJob for NoopJob {
        async fn run_batch(&self, _batch_size: u32) -> Result<BatchProgress, JobError> {
            Ok(BatchProgress::Done)
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut catalog = JobCatalog::new();
        catalog.register("nightly-export", Arc::new(NoopJob)).unwrap();
        let err = catalog
            .register("nightly-export", Arc::new(NoopJob))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateJob { ref job_type } if job_type == "nightly-export"));
        assert_eq!(catalog.len(), 1);
    }
}
