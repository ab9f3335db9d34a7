//! Core contract of the recurring-job engine.
//!
//! Why: make recurring maintenance work boring and auditable.
//! - One row per job type in a shared store is the only cross-process state;
//!   every mutation is a conditional write, so racing engines cannot both win.
//! - The scheduler runs acquired jobs synchronously within its tick; the
//!   trade is throughput for a loop an operator can reason about.
//! - Failures are counted, bounded, and frozen at the ceiling; nothing
//!   retries forever or recovers silently.
pub mod catalog;
pub mod config;
mod executor;
pub mod memory;
pub mod priority;
pub mod scheduler;
pub mod store;
pub mod users;
pub mod utils;

pub use catalog::{BatchProgress, JobCatalog, JobError, RecurringJob};
pub use config::{ConfigError, JobDefinition, SchedulerConfig, SchedulerConfigBuilder};
pub use config::{
    HISTORY_CLEANUP, TASK_CLEANUP, TASK_PRIORITY_RECOMPUTE, USER_INFO_REFRESH, WORKBASKET_CLEANUP,
};
pub use memory::InMemoryJobStore;
pub use priority::{CombineRule, PriorityServiceManager, PriorityServiceProvider, TaskSummary};
pub use scheduler::{Scheduler, SchedulerWithGracefulShutdown};
pub use store::{FailureDisposition, JobState, JobStatus, JobStore, LeaseHolder};
pub use users::{UserLookup, UserRecord};
