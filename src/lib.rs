pub use touban_core::{
    BatchProgress, CombineRule, ConfigError, FailureDisposition, InMemoryJobStore, JobCatalog,
    JobDefinition, JobError, JobState, JobStatus, JobStore, LeaseHolder, PriorityServiceManager,
    PriorityServiceProvider, RecurringJob, Scheduler, SchedulerConfig,
    SchedulerConfigBuilder, SchedulerWithGracefulShutdown, TaskSummary, UserLookup, UserRecord,
};
pub use touban_core::{
    HISTORY_CLEANUP, TASK_CLEANUP, TASK_PRIORITY_RECOMPUTE, USER_INFO_REFRESH, WORKBASKET_CLEANUP,
};
pub use touban_core::{catalog, config, memory, priority, scheduler, store, users};

#[cfg(feature = "postgres")]
pub use touban_sqlx::{
    HistoryCleanupJob, PgJobStore, PriorityRecomputeJob, TaskCleanupJob, UserInfoRefreshJob,
    WorkbasketCleanupJob, run_migrations,
};
