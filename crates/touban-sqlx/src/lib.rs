//! PostgreSQL backing for the touban engine.
//!
//! The scheduler row lives in `touban_scheduled_job`; the built-in jobs
//! operate on the engine-owned domain tables created by the embedded
//! migrations.

pub use sqlx::PgPool;
pub use touban_core;

mod queries;
mod time;

pub mod jobs;
pub mod store;

pub use jobs::{
    HistoryCleanupJob, PriorityRecomputeJob, TaskCleanupJob, UserInfoRefreshJob,
    WorkbasketCleanupJob,
};
pub use store::{Error, ErrorKind, PgJobStore};

/// Apply the embedded migrations (scheduler table + domain tables).
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!().run(pool).await
}
