//! Database layer for the clinic.
//!
//! One file per aggregate, each adding `impl Database` methods. Every `get_*` and
//! `list_*` query skips soft-deleted rows.

mod schema;
mod appointments;
mod chat;
mod inventory;
mod invoices;
mod odontogram;
mod patients;
mod procedures;
mod roles;
mod treatments;
mod users;

pub use schema::*;

use std::path::Path;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Audit, UnknownVariant};

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

impl From<UnknownVariant> for DbError {
    fn from(e: UnknownVariant) -> Self {
        DbError::InvalidValue(e.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
    /// Email written to `created_by` / `updated_by`
    actor: Option<String>,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn, actor: None };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, actor: None };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema and reference data.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.seed_reference_data()?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Set the user recorded in audit columns for subsequent writes.
    pub fn set_actor(&mut self, email: Option<String>) {
        self.actor = email;
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Run `f` inside a transaction, rolling back on error.
    ///
    /// Calls nested inside an open transaction join it.
    pub fn atomic<T, E>(&self, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        let tx = self.conn.unchecked_transaction().map_err(DbError::from)?;
        let value = f(self)?;
        tx.commit().map_err(DbError::from)?;
        Ok(value)
    }

    /// Copy the whole database into a new file.
    pub fn vacuum_into<P: AsRef<Path>>(&self, target: P) -> DbResult<()> {
        let target = target.as_ref().to_string_lossy().to_string();
        self.conn.execute("VACUUM INTO ?1", [target])?;
        Ok(())
    }
}

/// Current timestamp in the format used for audit columns.
pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Read a decimal stored as text.
pub(crate) fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        Decimal::from_str(&r)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read an enum stored by its code.
pub(crate) fn code_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read the four audit columns starting at `start`.
pub(crate) fn audit_cols(row: &Row<'_>, start: usize) -> rusqlite::Result<Audit> {
    Ok(Audit {
        created_at: row.get(start)?,
        updated_at: row.get(start + 1)?,
        created_by: row.get(start + 2)?,
        updated_by: row.get(start + 3)?,
    })
}

/// Map a UNIQUE failure to a readable constraint error.
pub(crate) fn unique_violation(err: rusqlite::Error, what: &str) -> DbError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!("{} already exists", what))
        }
        other => DbError::Sqlite(other),
    }
}

/// `LIKE` pattern matching anywhere in the column.
pub(crate) fn contains_pattern(keyword: &str) -> String {
    format!("%{}%", keyword.trim().to_lowercase())
}
