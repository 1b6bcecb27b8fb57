//! Odontogram database operations.

use rusqlite::{params, OptionalExtension};

use super::{code_col, Database, DbResult};
use crate::models::{ToothHistoryEntry, ToothRecord, ToothState};

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToothRecord> {
    Ok(ToothRecord {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        tooth: row.get(2)?,
        state: code_col(row, 3)?,
        surfaces: row.get(4)?,
        notes: row.get(5)?,
        audit: super::audit_cols(row, 6)?,
    })
}

fn history_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToothHistoryEntry> {
    let previous: Option<String> = row.get(3)?;
    let previous_state = previous
        .map(|p| {
            p.parse::<ToothState>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })
        })
        .transpose()?;

    Ok(ToothHistoryEntry {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        tooth: row.get(2)?,
        previous_state,
        new_state: code_col(row, 4)?,
        notes: row.get(5)?,
        changed_at: row.get(6)?,
        changed_by: row.get(7)?,
        performed_treatment_id: row.get(8)?,
    })
}

impl Database {
    /// All recorded teeth of a patient, ordered by FDI number.
    pub fn tooth_records(&self, patient_id: &str) -> DbResult<Vec<ToothRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, patient_id, tooth, state, surfaces, notes,
                   created_at, updated_at, created_by, updated_by
            FROM tooth_records
            WHERE patient_id = ?
            ORDER BY tooth
            "#,
        )?;
        let rows = stmt.query_map([patient_id], record_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_tooth_record(&self, patient_id: &str, tooth: u8) -> DbResult<Option<ToothRecord>> {
        self.conn
            .query_row(
                r#"
                SELECT id, patient_id, tooth, state, surfaces, notes,
                       created_at, updated_at, created_by, updated_by
                FROM tooth_records
                WHERE patient_id = ?1 AND tooth = ?2
                "#,
                params![patient_id, tooth],
                record_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert the tooth or overwrite its state, surfaces and notes.
    pub fn upsert_tooth_record(&self, record: &ToothRecord) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO tooth_records (
                id, patient_id, tooth, state, surfaces, notes,
                created_at, updated_at, created_by, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT(patient_id, tooth) DO UPDATE SET
                state = excluded.state,
                surfaces = excluded.surfaces,
                notes = excluded.notes,
                updated_at = datetime('now'),
                updated_by = excluded.updated_by
            "#,
            params![
                record.id,
                record.patient_id,
                record.tooth,
                record.state.as_str(),
                record.surfaces,
                record.notes,
                record.audit.created_at,
                record.audit.updated_at,
                self.actor,
            ],
        )?;
        Ok(())
    }

    pub fn insert_tooth_history(&self, entry: &ToothHistoryEntry) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO tooth_history (
                id, patient_id, tooth, previous_state, new_state, notes,
                changed_at, changed_by, performed_treatment_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.id,
                entry.patient_id,
                entry.tooth,
                entry.previous_state.map(|s| s.as_str()),
                entry.new_state.as_str(),
                entry.notes,
                entry.changed_at,
                entry.changed_by,
                entry.performed_treatment_id,
            ],
        )?;
        Ok(())
    }

    /// State changes of a patient's teeth (or one tooth), newest first.
    pub fn tooth_history(&self, patient_id: &str, tooth: Option<u8>) -> DbResult<Vec<ToothHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, patient_id, tooth, previous_state, new_state, notes,
                   changed_at, changed_by, performed_treatment_id
            FROM tooth_history
            WHERE patient_id = ?1 AND (?2 IS NULL OR tooth = ?2)
            ORDER BY changed_at DESC, rowid DESC
            "#,
        )?;
        let rows = stmt.query_map(params![patient_id, tooth], history_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
