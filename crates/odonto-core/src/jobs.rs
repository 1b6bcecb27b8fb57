//! Scheduled maintenance: account expiry and database backups.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::db::{Database, DbError};
use crate::models::ROLE_ADMIN;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type JobResult<T> = Result<T, JobError>;

/// A finished backup file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupReport {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// File name for a backup taken at `now`.
pub fn backup_file_name(now: NaiveDateTime) -> String {
    format!("backup_{}.sqlite", now.format("%Y-%m-%d_%H%M%S"))
}

/// Deactivate active accounts whose validity ended before `today`.
/// Administrators are never deactivated.
pub fn deactivate_expired_accounts(db: &Database, today: NaiveDate) -> JobResult<usize> {
    let expired = db.list_expired_active_users(today)?;

    let mut count = 0;
    for user in expired {
        if user.has_role(ROLE_ADMIN) {
            info!(user_id = %user.id, email = %user.email, "Skipping expired administrator");
            continue;
        }
        db.set_user_active(&user.id, false)?;
        info!(
            user_id = %user.id,
            email = %user.email,
            valid_until = ?user.valid_until,
            "Expired account deactivated"
        );
        count += 1;
    }

    info!(count, %today, "Account expiry finished");
    Ok(count)
}

/// Write a consistent copy of the database into `dir`.
pub fn backup_database(db: &Database, dir: &Path, now: NaiveDateTime) -> JobResult<BackupReport> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(backup_file_name(now));

    if let Err(e) = db.vacuum_into(&path) {
        error!(path = %path.display(), error = %e, "Backup failed");
        return Err(e.into());
    }

    let size_bytes = std::fs::metadata(&path)?.len();
    info!(path = %path.display(), size_bytes, "Backup written");
    Ok(BackupReport { path, size_bytes })
}
