//! SQL statements for the scheduler table and the built-in jobs.
//!
//! Every scheduler mutation is a single conditional UPDATE; the caller reads
//! `rows_affected` to learn whether it still owned the row. Job statements
//! are criteria-based and safe to repeat after a lease handover.

/// Lazy row creation; losing the insert race is fine.
pub(crate) const ENSURE_REGISTERED: &str = r#"
INSERT INTO touban_scheduled_job (job_type, state, next_due, retry_count)
VALUES ($1, 'due', $2, 0)
ON CONFLICT (job_type) DO NOTHING
"#;

/// The acquisition CAS: due, not frozen, and unleased or expired.
pub(crate) const TRY_ACQUIRE: &str = r#"
UPDATE touban_scheduled_job
SET state = 'leased', lease_holder = $2, lease_expires_at = now() + $3
WHERE job_type = $1
  AND state <> 'failed_permanent'
  AND next_due <= now()
  AND (lease_holder IS NULL OR lease_expires_at <= now())
"#;

pub(crate) const RELEASE: &str = r#"
UPDATE touban_scheduled_job
SET state = 'due', lease_holder = NULL, lease_expires_at = NULL
WHERE job_type = $1 AND lease_holder = $2
"#;

pub(crate) const COMPLETE: &str = r#"
UPDATE touban_scheduled_job
SET state = 'due', next_due = $3, retry_count = 0,
    lease_holder = NULL, lease_expires_at = NULL
WHERE job_type = $1 AND lease_holder = $2
"#;

pub(crate) const RECORD_FAILURE: &str = r#"
UPDATE touban_scheduled_job
SET retry_count = retry_count + 1,
    state = CASE WHEN retry_count + 1 >= $3 THEN 'failed_permanent' ELSE 'due' END,
    lease_holder = NULL, lease_expires_at = NULL
WHERE job_type = $1 AND lease_holder = $2
RETURNING state
"#;

pub(crate) const JOB_STATE: &str = r#"
SELECT state, next_due, retry_count,
       (state = 'leased' AND (lease_expires_at IS NULL OR lease_expires_at <= now()))
           AS lease_expired
FROM touban_scheduled_job
WHERE job_type = $1
"#;

/// Operator reset of a permanently failed job.
pub(crate) const RESET_JOB: &str = r#"
UPDATE touban_scheduled_job
SET state = 'due', next_due = $2, retry_count = 0,
    lease_holder = NULL, lease_expires_at = NULL
WHERE job_type = $1
"#;

pub(crate) const TASK_CLEANUP_DELETE: &str = r#"
DELETE FROM touban_task
WHERE id IN (
    SELECT t.id
    FROM touban_task t
    WHERE t.state = 'completed'
      AND t.completed IS NOT NULL
      AND t.completed < now() - $1
      AND (NOT $2 OR NOT EXISTS (
          SELECT 1
          FROM touban_task s
          WHERE s.business_process_id = t.business_process_id
            AND s.state NOT IN ('completed', 'cancelled', 'terminated')
      ))
    LIMIT $3
)
"#;

pub(crate) const WORKBASKET_CLEANUP_DELETE: &str = r#"
DELETE FROM touban_workbasket
WHERE id IN (
    SELECT w.id
    FROM touban_workbasket w
    WHERE w.marked_for_deletion
      AND NOT EXISTS (
          SELECT 1 FROM touban_task t WHERE t.workbasket_id = w.id
      )
    LIMIT $1
)
"#;

pub(crate) const HISTORY_CLEANUP_DELETE: &str = r#"
DELETE FROM touban_task_history_event
WHERE id IN (
    SELECT id
    FROM touban_task_history_event
    WHERE created < now() - $1
    LIMIT $2
)
"#;

/// Keyset page of non-terminal tasks for the priority recompute walk.
pub(crate) const PRIORITY_CANDIDATES: &str = r#"
SELECT id, priority, created, due
FROM touban_task
WHERE state NOT IN ('completed', 'cancelled', 'terminated')
  AND id > $1
ORDER BY id
LIMIT $2
"#;

/// Write-only-if-changed keeps a repeated batch idempotent.
pub(crate) const PRIORITY_UPDATE: &str = r#"
UPDATE touban_task
SET priority = $2
WHERE id = $1 AND priority <> $2
"#;

pub(crate) const USER_IDS: &str = r#"
SELECT user_id
FROM touban_user_info
WHERE user_id > $1
ORDER BY user_id
LIMIT $2
"#;

pub(crate) const USER_UPDATE: &str = r#"
UPDATE touban_user_info
SET full_name = $2, groups = $3, refreshed_at = now()
WHERE user_id = $1
"#;
