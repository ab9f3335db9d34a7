//! Scheduler and per-job configuration.
//!
//! Every recognized option is validated when the configuration is built;
//! invalid values surface as a [`ConfigError`] before the engine starts,
//! never at first use. Deserialization funnels through the builder, so a
//! config read from a file meets the same bar as one built in code.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Job-type id of the built-in completed-task cleanup job.
pub const TASK_CLEANUP: &str = "task-cleanup";
/// Job-type id of the built-in workbasket cleanup job.
pub const WORKBASKET_CLEANUP: &str = "workbasket-cleanup";
/// Job-type id of the built-in history-event cleanup job.
pub const HISTORY_CLEANUP: &str = "history-cleanup";
/// Job-type id of the built-in task-priority recompute job.
pub const TASK_PRIORITY_RECOMPUTE: &str = "task-priority-recompute";
/// Job-type id of the built-in user-info refresh job.
pub const USER_INFO_REFRESH: &str = "user-info-refresh";

const BUILT_IN_JOB_TYPES: [&str; 5] = [
    TASK_CLEANUP,
    WORKBASKET_CLEANUP,
    HISTORY_CLEANUP,
    TASK_PRIORITY_RECOMPUTE,
    USER_INFO_REFRESH,
];

/// Errors raised while building a [`SchedulerConfig`].
///
/// All of these are fatal: the engine refuses to start rather than carry a
/// definition it cannot honor.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("tick_period must be a positive duration")]
    PeriodNotPositive,
    #[error("max_job_retries must be greater than zero")]
    RetriesNotPositive,
    #[error("default_batch_size must be greater than zero")]
    DefaultBatchSizeNotPositive,
    #[error("default_lock_expiration must be a positive duration")]
    DefaultLockExpirationNotPositive,
    #[error("job `{job_type}`: run_every must be a positive duration")]
    RunEveryNotPositive { job_type: String },
    #[error("job `{job_type}`: batch_size must be greater than zero")]
    BatchSizeNotPositive { job_type: String },
    #[error("job `{job_type}`: lock_expiration must be a positive duration")]
    LockExpirationNotPositive { job_type: String },
    #[error("job `{job_type}` is registered more than once")]
    DuplicateJob { job_type: String },
    #[error("no implementation registered for job type `{job_type}`")]
    UnresolvedJob { job_type: String },
}

/// Configuration of a single recurring job type.
///
/// Definitions are created once at engine start and are immutable for the
/// process lifetime. The `minimum_age` and `all_in_group_terminal` fields
/// only matter to cleanup-style jobs; other jobs ignore them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_type: String,
    pub enabled: bool,
    /// Rows processed per committed batch; `None` falls back to the
    /// scheduler-wide default.
    pub batch_size: Option<u32>,
    /// Anchor instant of the recurrence grid (`first_run + n * run_every`).
    pub first_run: SystemTime,
    pub run_every: Duration,
    /// Lease length; `None` falls back to the scheduler-wide default.
    pub lock_expiration: Option<Duration>,
    /// Eligibility cutoff for cleanup jobs.
    pub minimum_age: Duration,
    /// Restrict cleanup to tasks whose whole business-process group is
    /// terminal.
    pub all_in_group_terminal: bool,
}

impl JobDefinition {
    pub const DEFAULT_RUN_EVERY: Duration = Duration::from_secs(60 * 60 * 24);
    pub const DEFAULT_MINIMUM_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 14);

    /// Create a definition with defaults: enabled, daily cadence anchored at
    /// `now`, scheduler-wide lease length, 14-day minimum age.
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            enabled: true,
            batch_size: None,
            first_run: SystemTime::now(),
            run_every: Self::DEFAULT_RUN_EVERY,
            lock_expiration: None,
            minimum_age: Self::DEFAULT_MINIMUM_AGE,
            all_in_group_terminal: false,
        }
    }

    pub fn enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn batch_size(self, batch_size: u32) -> Self {
        Self {
            batch_size: Some(batch_size),
            ..self
        }
    }

    pub fn first_run(self, first_run: SystemTime) -> Self {
        Self { first_run, ..self }
    }

    pub fn run_every(self, run_every: Duration) -> Self {
        Self { run_every, ..self }
    }

    pub fn lock_expiration(self, lock_expiration: Duration) -> Self {
        Self {
            lock_expiration: Some(lock_expiration),
            ..self
        }
    }

    pub fn minimum_age(self, minimum_age: Duration) -> Self {
        Self {
            minimum_age,
            ..self
        }
    }

    pub fn all_in_group_terminal(self, all_in_group_terminal: bool) -> Self {
        Self {
            all_in_group_terminal,
            ..self
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.run_every.is_zero() {
            return Err(ConfigError::RunEveryNotPositive {
                job_type: self.job_type.clone(),
            });
        }
        if self.lock_expiration == Some(Duration::ZERO) {
            return Err(ConfigError::LockExpirationNotPositive {
                job_type: self.job_type.clone(),
            });
        }
        if self.batch_size == Some(0) {
            return Err(ConfigError::BatchSizeNotPositive {
                job_type: self.job_type.clone(),
            });
        }
        Ok(())
    }
}

/// Validated engine configuration. Construct via [`SchedulerConfigBuilder`];
/// deserialization routes through the builder as well, so every instance of
/// this type has passed validation. Fields are read-only for the same
/// reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchedulerConfigBuilder")]
pub struct SchedulerConfig {
    enabled: bool,
    initial_start_delay: Duration,
    tick_period: Duration,
    max_job_retries: u32,
    default_batch_size: u32,
    default_lock_expiration: Duration,
    jobs: Vec<JobDefinition>,
    custom_jobs: BTreeSet<String>,
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    /// Master on/off switch.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn initial_start_delay(&self) -> Duration {
        self.initial_start_delay
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    pub fn max_job_retries(&self) -> u32 {
        self.max_job_retries
    }

    pub fn default_batch_size(&self) -> u32 {
        self.default_batch_size
    }

    pub fn default_lock_expiration(&self) -> Duration {
        self.default_lock_expiration
    }

    /// All job definitions, built-in and custom, in registration order.
    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    /// Identifiers of operator-declared custom jobs.
    pub fn custom_jobs(&self) -> &BTreeSet<String> {
        &self.custom_jobs
    }

    pub fn definition(&self, job_type: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|def| def.job_type == job_type)
    }

    /// Effective batch size for a definition.
    pub fn batch_size_for(&self, def: &JobDefinition) -> u32 {
        def.batch_size.unwrap_or(self.default_batch_size)
    }

    /// Effective lease length for a definition.
    pub fn lock_expiration_for(&self, def: &JobDefinition) -> Duration {
        def.lock_expiration.unwrap_or(self.default_lock_expiration)
    }
}

impl TryFrom<SchedulerConfigBuilder> for SchedulerConfig {
    type Error = ConfigError;

    fn try_from(builder: SchedulerConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

/// Builder for [`SchedulerConfig`]; `build` performs all validation.
///
/// The five built-in job types are pre-registered with default definitions
/// so each can be toggled or tuned independently.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigBuilder {
    enabled: bool,
    initial_start_delay: Duration,
    tick_period: Duration,
    max_job_retries: u32,
    default_batch_size: u32,
    default_lock_expiration: Duration,
    jobs: Vec<JobDefinition>,
    custom_jobs: BTreeSet<String>,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            enabled: true,
            initial_start_delay: Duration::from_millis(100),
            tick_period: Duration::from_secs(5 * 60),
            max_job_retries: 3,
            default_batch_size: 100,
            default_lock_expiration: Duration::from_secs(60),
            jobs: BUILT_IN_JOB_TYPES.map(JobDefinition::new).to_vec(),
            custom_jobs: BTreeSet::new(),
        }
    }

    /// Master on/off switch; a disabled scheduler never starts its loop.
    pub fn enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn initial_start_delay(self, initial_start_delay: Duration) -> Self {
        Self {
            initial_start_delay,
            ..self
        }
    }

    pub fn tick_period(self, tick_period: Duration) -> Self {
        Self {
            tick_period,
            ..self
        }
    }

    pub fn max_job_retries(self, max_job_retries: u32) -> Self {
        Self {
            max_job_retries,
            ..self
        }
    }

    pub fn default_batch_size(self, default_batch_size: u32) -> Self {
        Self {
            default_batch_size,
            ..self
        }
    }

    /// Scheduler-wide lease length; per-job `lock_expiration` overrides it.
    pub fn default_lock_expiration(self, default_lock_expiration: Duration) -> Self {
        Self {
            default_lock_expiration,
            ..self
        }
    }

    /// Add or replace a job definition. Replacement keyed by `job_type`, so
    /// tuning a built-in is the same call as declaring a new type.
    pub fn job(mut self, def: JobDefinition) -> Self {
        match self.jobs.iter_mut().find(|d| d.job_type == def.job_type) {
            Some(existing) => *existing = def,
            None => self.jobs.push(def),
        }
        self
    }

    /// Declare an operator-supplied custom job type. A default definition is
    /// created unless one was already provided via [`Self::job`].
    pub fn custom_job(mut self, job_type: impl Into<String>) -> Self {
        let job_type = job_type.into();
        if !self.jobs.iter().any(|d| d.job_type == job_type) {
            self.jobs.push(JobDefinition::new(job_type.clone()));
        }
        self.custom_jobs.insert(job_type);
        self
    }

    pub fn build(self) -> Result<SchedulerConfig, ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::PeriodNotPositive);
        }
        if self.max_job_retries == 0 {
            return Err(ConfigError::RetriesNotPositive);
        }
        if self.default_batch_size == 0 {
            return Err(ConfigError::DefaultBatchSizeNotPositive);
        }
        if self.default_lock_expiration.is_zero() {
            return Err(ConfigError::DefaultLockExpirationNotPositive);
        }
        let mut seen = BTreeSet::new();
        for def in &self.jobs {
            def.validate()?;
            if !seen.insert(def.job_type.as_str()) {
                return Err(ConfigError::DuplicateJob {
                    job_type: def.job_type.clone(),
                });
            }
        }

        Ok(SchedulerConfig {
            enabled: self.enabled,
            initial_start_delay: self.initial_start_delay,
            tick_period: self.tick_period,
            max_job_retries: self.max_job_retries,
            default_batch_size: self.default_batch_size,
            default_lock_expiration: self.default_lock_expiration,
            jobs: self.jobs,
            custom_jobs: self.custom_jobs,
        })
    }
}
