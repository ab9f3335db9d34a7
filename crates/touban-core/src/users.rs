//! Identity lookup SPI consumed by the user-info refresh job.
//!
//! The directory itself (LDAP or otherwise) lives in the host process; the
//! job only re-pulls records through this seam.

use crate::catalog::JobError;

/// Identity and group data for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: String,
    pub full_name: String,
    pub groups: Vec<String>,
}

/// Host-supplied directory access.
#[async_trait::async_trait]
pub trait UserLookup: Send + Sync {
    /// Fetch the current record for `user_id`; `None` if the directory no
    /// longer knows the user.
    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserRecord>, JobError>;
}
