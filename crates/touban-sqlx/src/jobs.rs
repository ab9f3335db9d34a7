//! Built-in recurring jobs over the engine-owned Postgres tables.
//!
//! Every batch is one idempotent criteria-based statement (or a keyset page
//! of them), so a duplicate run after a lease handover only wastes work.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sqlx::Row as _;
use touban_core::catalog::{BatchProgress, JobError, RecurringJob};
use touban_core::config::JobDefinition;
use touban_core::priority::{PriorityServiceManager, TaskSummary};
use touban_core::users::UserLookup;

use crate::queries;
use crate::time::PgTimestamp;

fn minimum_age_interval(age: Duration) -> Result<sqlx::postgres::types::PgInterval, JobError> {
    Ok(sqlx::postgres::types::PgInterval::try_from(age)?)
}

fn progress(affected: u64, batch_size: u32) -> BatchProgress {
    if affected < u64::from(batch_size) {
        BatchProgress::Done
    } else {
        BatchProgress::More
    }
}

/// Deletes completed tasks older than the configured minimum age.
pub struct TaskCleanupJob {
    pool: sqlx::PgPool,
    minimum_age: Duration,
    all_in_group_terminal: bool,
}

impl TaskCleanupJob {
    pub fn new(pool: sqlx::PgPool, minimum_age: Duration, all_in_group_terminal: bool) -> Self {
        Self {
            pool,
            minimum_age,
            all_in_group_terminal,
        }
    }

    pub fn from_definition(pool: sqlx::PgPool, def: &JobDefinition) -> Self {
        Self::new(pool, def.minimum_age, def.all_in_group_terminal)
    }
}

#[async_trait::async_trait]
impl RecurringJob for TaskCleanupJob {
    async fn run_batch(&self, batch_size: u32) -> Result<BatchProgress, JobError> {
        let age = minimum_age_interval(self.minimum_age)?;
        let res = sqlx::query(queries::TASK_CLEANUP_DELETE)
            .bind(&age)
            .bind(self.all_in_group_terminal)
            .bind(i64::from(batch_size))
            .execute(&self.pool)
            .await?;
        tracing::debug!(deleted = res.rows_affected(), "task cleanup batch committed");
        Ok(progress(res.rows_affected(), batch_size))
    }
}

/// Deletes workbaskets marked for deletion once no tasks remain in them.
pub struct WorkbasketCleanupJob {
    pool: sqlx::PgPool,
}

impl WorkbasketCleanupJob {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecurringJob for WorkbasketCleanupJob {
    async fn run_batch(&self, batch_size: u32) -> Result<BatchProgress, JobError> {
        let res = sqlx::query(queries::WORKBASKET_CLEANUP_DELETE)
            .bind(i64::from(batch_size))
            .execute(&self.pool)
            .await?;
        tracing::debug!(
            deleted = res.rows_affected(),
            "workbasket cleanup batch committed"
        );
        Ok(progress(res.rows_affected(), batch_size))
    }
}

/// Deletes task history events older than the job's own minimum age.
pub struct HistoryCleanupJob {
    pool: sqlx::PgPool,
    minimum_age: Duration,
}

impl HistoryCleanupJob {
    pub fn new(pool: sqlx::PgPool, minimum_age: Duration) -> Self {
        Self { pool, minimum_age }
    }

    pub fn from_definition(pool: sqlx::PgPool, def: &JobDefinition) -> Self {
        Self::new(pool, def.minimum_age)
    }
}

#[async_trait::async_trait]
impl RecurringJob for HistoryCleanupJob {
    async fn run_batch(&self, batch_size: u32) -> Result<BatchProgress, JobError> {
        let age = minimum_age_interval(self.minimum_age)?;
        let res = sqlx::query(queries::HISTORY_CLEANUP_DELETE)
            .bind(&age)
            .bind(i64::from(batch_size))
            .execute(&self.pool)
            .await?;
        tracing::debug!(
            deleted = res.rows_affected(),
            "history cleanup batch committed"
        );
        Ok(progress(res.rows_affected(), batch_size))
    }
}

fn cursor_value(cursor: &Mutex<String>) -> MutexGuard<'_, String> {
    cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Walks non-terminal tasks and asks the registered priority providers for
/// new values.
///
/// The keyset cursor spans the batches of one run; batches are sequential
/// within a run, so plain interior mutability is enough.
pub struct PriorityRecomputeJob {
    pool: sqlx::PgPool,
    manager: PriorityServiceManager,
    cursor: Mutex<String>,
}

impl PriorityRecomputeJob {
    pub fn new(pool: sqlx::PgPool, manager: PriorityServiceManager) -> Self {
        Self {
            pool,
            manager,
            cursor: Mutex::new(String::new()),
        }
    }
}

#[async_trait::async_trait]
impl RecurringJob for PriorityRecomputeJob {
    async fn run_batch(&self, batch_size: u32) -> Result<BatchProgress, JobError> {
        if !self.manager.is_enabled() {
            tracing::debug!("no priority providers registered; skipping recompute");
            return Ok(BatchProgress::Done);
        }

        let after = cursor_value(&self.cursor).clone();
        let rows = sqlx::query(queries::PRIORITY_CANDIDATES)
            .bind(&after)
            .bind(i64::from(batch_size))
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            cursor_value(&self.cursor).clear();
            return Ok(BatchProgress::Done);
        }

        let full_batch = rows.len() == batch_size as usize;
        let mut last_id = after;
        let mut updated = 0u64;
        for row in rows {
            let id: String = row.try_get("id")?;
            let priority: i32 = row.try_get("priority")?;
            let created: Option<PgTimestamp> = row.try_get("created")?;
            let due: Option<PgTimestamp> = row.try_get("due")?;
            let task = TaskSummary {
                id: id.clone(),
                priority,
                created: created.map(|ts| ts.0),
                due: due.map(|ts| ts.0),
            };

            if let Some(new_priority) = self.manager.calculate_priority(&task) {
                if new_priority != priority {
                    let res = sqlx::query(queries::PRIORITY_UPDATE)
                        .bind(&id)
                        .bind(new_priority)
                        .execute(&self.pool)
                        .await?;
                    updated += res.rows_affected();
                }
            }
            last_id = id;
        }
        tracing::debug!(updated = updated, "priority recompute batch committed");

        let mut cursor = cursor_value(&self.cursor);
        if full_batch {
            *cursor = last_id;
            Ok(BatchProgress::More)
        } else {
            cursor.clear();
            Ok(BatchProgress::Done)
        }
    }
}

/// Re-pulls identity and group data through the host-supplied directory.
pub struct UserInfoRefreshJob {
    pool: sqlx::PgPool,
    lookup: Arc<dyn UserLookup>,
    cursor: Mutex<String>,
}

impl UserInfoRefreshJob {
    pub fn new(pool: sqlx::PgPool, lookup: Arc<dyn UserLookup>) -> Self {
        Self {
            pool,
            lookup,
            cursor: Mutex::new(String::new()),
        }
    }
}

#[async_trait::async_trait]
impl RecurringJob for UserInfoRefreshJob {
    async fn run_batch(&self, batch_size: u32) -> Result<BatchProgress, JobError> {
        let after = cursor_value(&self.cursor).clone();
        let rows = sqlx::query(queries::USER_IDS)
            .bind(&after)
            .bind(i64::from(batch_size))
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            cursor_value(&self.cursor).clear();
            return Ok(BatchProgress::Done);
        }

        let full_batch = rows.len() == batch_size as usize;
        let mut last_id = after;
        for row in rows {
            let user_id: String = row.try_get("user_id")?;
            match self.lookup.fetch_user(&user_id).await? {
                Some(record) => {
                    sqlx::query(queries::USER_UPDATE)
                        .bind(&user_id)
                        .bind(&record.full_name)
                        .bind(&record.groups)
                        .execute(&self.pool)
                        .await?;
                }
                None => {
                    tracing::debug!(user_id = %user_id, "user no longer in directory; record left as is");
                }
            }
            last_id = user_id;
        }

        let mut cursor = cursor_value(&self.cursor);
        if full_batch {
            *cursor = last_id;
            Ok(BatchProgress::More)
        } else {
            cursor.clear();
            Ok(BatchProgress::Done)
        }
    }
}
