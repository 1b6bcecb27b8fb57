//! Patient database operations.

use rusqlite::{params, OptionalExtension};

use super::{contains_pattern, timestamp, unique_violation, Database, DbResult};
use crate::models::{Page, PageRequest, Patient};

const PATIENT_COLUMNS: &str = r#"
    id, user_id, document_type, document_number, full_name, email, phone,
    birth_date, address, allergies, medical_history,
    created_at, updated_at, created_by, updated_by
"#;

fn patient_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        user_id: row.get(1)?,
        document_type: row.get(2)?,
        document_number: row.get(3)?,
        full_name: row.get(4)?,
        email: row.get(5)?,
        phone: row.get(6)?,
        birth_date: row.get(7)?,
        address: row.get(8)?,
        allergies: row.get(9)?,
        medical_history: row.get(10)?,
        audit: super::audit_cols(row, 11)?,
    })
}

impl Database {
    /// Insert a new patient.
    pub fn insert_patient(&self, patient: &Patient) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO patients (
                    id, user_id, document_type, document_number, full_name, email, phone,
                    birth_date, address, allergies, medical_history,
                    created_at, updated_at, created_by, updated_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
                "#,
                params![
                    patient.id,
                    patient.user_id,
                    patient.document_type,
                    patient.document_number,
                    patient.full_name,
                    patient.email,
                    patient.phone,
                    patient.birth_date,
                    patient.address,
                    patient.allergies,
                    patient.medical_history,
                    patient.audit.created_at,
                    patient.audit.updated_at,
                    self.actor,
                ],
            )
            .map_err(|e| {
                unique_violation(
                    e,
                    &format!(
                        "patient with document {} {}",
                        patient.document_type, patient.document_number
                    ),
                )
            })?;
        Ok(())
    }

    /// Update an existing patient.
    pub fn update_patient(&self, patient: &Patient) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE patients SET
                    user_id = ?2,
                    document_type = ?3,
                    document_number = ?4,
                    full_name = ?5,
                    email = ?6,
                    phone = ?7,
                    birth_date = ?8,
                    address = ?9,
                    allergies = ?10,
                    medical_history = ?11,
                    updated_at = datetime('now'),
                    updated_by = ?12
                WHERE id = ?1 AND deleted = 0
                "#,
                params![
                    patient.id,
                    patient.user_id,
                    patient.document_type,
                    patient.document_number,
                    patient.full_name,
                    patient.email,
                    patient.phone,
                    patient.birth_date,
                    patient.address,
                    patient.allergies,
                    patient.medical_history,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, "patient with that document or email"))?;
        Ok(rows_affected > 0)
    }

    /// Get patient by ID.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<Patient>> {
        let sql = format!("SELECT {} FROM patients WHERE id = ? AND deleted = 0", PATIENT_COLUMNS);
        self.conn
            .query_row(&sql, [id], patient_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Get the patient linked to a portal account.
    pub fn get_patient_by_user(&self, user_id: &str) -> DbResult<Option<Patient>> {
        let sql = format!(
            "SELECT {} FROM patients WHERE user_id = ? AND deleted = 0",
            PATIENT_COLUMNS
        );
        self.conn
            .query_row(&sql, [user_id], patient_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn get_patient_by_document(&self, document_type: &str, document_number: &str) -> DbResult<Option<Patient>> {
        let sql = format!(
            r#"
            SELECT {} FROM patients
            WHERE document_type = ?1 AND document_number = ?2 AND deleted = 0
            "#,
            PATIENT_COLUMNS
        );
        self.conn
            .query_row(
                &sql,
                params![document_type.trim().to_uppercase(), document_number.trim()],
                patient_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Search by name, document number or email, ordered by name.
    pub fn search_patients(&self, keyword: &str, page: PageRequest) -> DbResult<Page<Patient>> {
        let pattern = contains_pattern(keyword);

        let total: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM patients
            WHERE deleted = 0 AND (
                lower(full_name) LIKE ?1 OR document_number LIKE ?1 OR lower(email) LIKE ?1
            )
            "#,
            [&pattern],
            |row| row.get(0),
        )?;

        let sql = format!(
            r#"
            SELECT {} FROM patients
            WHERE deleted = 0 AND (
                lower(full_name) LIKE ?1 OR document_number LIKE ?1 OR lower(email) LIKE ?1
            )
            ORDER BY full_name
            LIMIT ?2 OFFSET ?3
            "#,
            PATIENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern, page.limit(), page.offset()], patient_from_row)?;
        let patients = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(patients, total as u64, page))
    }

    /// All live patients, ordered by name.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        let sql = format!(
            "SELECT {} FROM patients WHERE deleted = 0 ORDER BY full_name",
            PATIENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], patient_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Get a patient whether or not it was soft-deleted, with its deleted flag.
    pub fn get_patient_any(&self, id: &str) -> DbResult<Option<(Patient, bool)>> {
        let sql = format!("SELECT {}, deleted FROM patients WHERE id = ?", PATIENT_COLUMNS);
        self.conn
            .query_row(&sql, [id], |row| Ok((patient_from_row(row)?, row.get(15)?)))
            .optional()
            .map_err(Into::into)
    }

    /// Find any patient, live or deleted, holding a document.
    pub fn find_patient_by_document_any(
        &self,
        document_type: &str,
        document_number: &str,
    ) -> DbResult<Option<(Patient, bool)>> {
        let sql = format!(
            r#"
            SELECT {}, deleted FROM patients
            WHERE document_type = ?1 AND document_number = ?2
            ORDER BY deleted
            LIMIT 1
            "#,
            PATIENT_COLUMNS
        );
        self.conn
            .query_row(
                &sql,
                params![document_type.trim().to_uppercase(), document_number.trim()],
                |row| Ok((patient_from_row(row)?, row.get(15)?)),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Find any patient, live or deleted, registered with an email.
    pub fn find_patient_by_email_any(&self, email: &str) -> DbResult<Option<(Patient, bool)>> {
        let sql = format!(
            r#"
            SELECT {}, deleted FROM patients
            WHERE lower(email) = ?1
            ORDER BY deleted
            LIMIT 1
            "#,
            PATIENT_COLUMNS
        );
        self.conn
            .query_row(&sql, [email.trim().to_lowercase()], |row| {
                Ok((patient_from_row(row)?, row.get(15)?))
            })
            .optional()
            .map_err(Into::into)
    }

    /// Undo a soft delete.
    pub fn restore_patient(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE patients SET deleted = 0, deleted_at = NULL,
                    updated_at = datetime('now'), updated_by = ?2
                WHERE id = ?1 AND deleted = 1
                "#,
                params![id, self.actor],
            )
            .map_err(|e| unique_violation(e, "patient with that document or email"))?;
        Ok(rows_affected > 0)
    }

    pub fn count_patients(&self) -> DbResult<u64> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patients WHERE deleted = 0", [], |row| row.get(0))?;
        Ok(total as u64)
    }

    /// Live patients whose record was created in a `YYYY-MM` month.
    pub fn count_patients_created_in_month(&self, month: &str) -> DbResult<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM patients WHERE deleted = 0 AND substr(created_at, 1, 7) = ?1",
            [month],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    /// Soft delete patient.
    pub fn soft_delete_patient(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE patients SET deleted = 1, deleted_at = ?2, updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, timestamp(), self.actor],
        )?;
        Ok(rows_affected > 0)
    }
}
