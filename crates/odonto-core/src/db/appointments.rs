//! Appointment database operations.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

use super::{code_col, timestamp, Database, DbResult};
use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, Page, PageRequest};

const APPOINTMENT_COLUMNS: &str = r#"
    id, patient_id, dentist_id, procedure_id, start_at, end_at, duration_minutes,
    status, reason, notes, cancellation_reason, rescheduled_to,
    created_at, updated_at, created_by, updated_by
"#;

/// Statuses that no longer hold the dentist's time.
const RELEASED_STATUSES: &str = "('CANCELADA_PACIENTE', 'CANCELADA_CLINICA', 'REPROGRAMADA')";

fn appointment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        dentist_id: row.get(2)?,
        procedure_id: row.get(3)?,
        start: row.get(4)?,
        end: row.get(5)?,
        duration_minutes: row.get(6)?,
        status: code_col(row, 7)?,
        reason: row.get(8)?,
        notes: row.get(9)?,
        cancellation_reason: row.get(10)?,
        rescheduled_to: row.get(11)?,
        audit: super::audit_cols(row, 12)?,
    })
}

impl Database {
    /// Insert a new appointment.
    pub fn insert_appointment(&self, appt: &Appointment) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO appointments (
                id, patient_id, dentist_id, procedure_id, start_at, end_at, duration_minutes,
                status, reason, notes, cancellation_reason, rescheduled_to,
                created_at, updated_at, created_by, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
            "#,
            params![
                appt.id,
                appt.patient_id,
                appt.dentist_id,
                appt.procedure_id,
                appt.start,
                appt.end,
                appt.duration_minutes,
                appt.status.as_str(),
                appt.reason,
                appt.notes,
                appt.cancellation_reason,
                appt.rescheduled_to,
                appt.audit.created_at,
                appt.audit.updated_at,
                self.actor,
            ],
        )?;
        Ok(())
    }

    /// Persist status, notes and rescheduling links.
    pub fn update_appointment(&self, appt: &Appointment) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE appointments SET
                dentist_id = ?2,
                start_at = ?3,
                end_at = ?4,
                duration_minutes = ?5,
                status = ?6,
                reason = ?7,
                notes = ?8,
                cancellation_reason = ?9,
                rescheduled_to = ?10,
                updated_at = datetime('now'),
                updated_by = ?11
            WHERE id = ?1 AND deleted = 0
            "#,
            params![
                appt.id,
                appt.dentist_id,
                appt.start,
                appt.end,
                appt.duration_minutes,
                appt.status.as_str(),
                appt.reason,
                appt.notes,
                appt.cancellation_reason,
                appt.rescheduled_to,
                self.actor,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get appointment by ID.
    pub fn get_appointment(&self, id: &str) -> DbResult<Option<Appointment>> {
        let sql = format!(
            "SELECT {} FROM appointments WHERE id = ? AND deleted = 0",
            APPOINTMENT_COLUMNS
        );
        self.conn
            .query_row(&sql, [id], appointment_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Appointments of a dentist still holding time and overlapping `[from, to)`.
    pub fn blocking_appointments(
        &self,
        dentist_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        exclude_id: Option<&str>,
    ) -> DbResult<Vec<Appointment>> {
        let sql = format!(
            r#"
            SELECT {} FROM appointments
            WHERE dentist_id = ?1 AND deleted = 0
              AND start_at < ?3 AND end_at > ?2
              AND status NOT IN {}
              AND (?4 IS NULL OR id != ?4)
            ORDER BY start_at
            "#,
            APPOINTMENT_COLUMNS, RELEASED_STATUSES
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![dentist_id, from, to, exclude_id], appointment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Filtered listing, newest first.
    pub fn list_appointments(&self, filter: &AppointmentFilter, page: PageRequest) -> DbResult<Page<Appointment>> {
        const WHERE: &str = r#"
            WHERE deleted = 0
              AND (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR dentist_id = ?2)
              AND (?3 IS NULL OR patient_id = ?3)
              AND (?4 IS NULL OR start_at >= ?4)
              AND (?5 IS NULL OR start_at <= ?5)
        "#;

        let status = filter.status.map(|s| s.as_str());
        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM appointments {}", WHERE),
            params![status, filter.dentist_id, filter.patient_id, filter.from, filter.to],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM appointments {} ORDER BY start_at DESC, rowid DESC LIMIT ?6 OFFSET ?7",
            APPOINTMENT_COLUMNS, WHERE
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                status,
                filter.dentist_id,
                filter.patient_id,
                filter.from,
                filter.to,
                page.limit(),
                page.offset(),
            ],
            appointment_from_row,
        )?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total as u64, page))
    }

    /// Appointments starting within `[from, to]` that still hold time, oldest first.
    pub fn calendar_appointments(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        dentist_id: Option<&str>,
    ) -> DbResult<Vec<Appointment>> {
        let sql = format!(
            r#"
            SELECT {} FROM appointments
            WHERE deleted = 0 AND start_at >= ?1 AND start_at <= ?2
              AND (?3 IS NULL OR dentist_id = ?3)
              AND status NOT IN {}
            ORDER BY start_at
            "#,
            APPOINTMENT_COLUMNS, RELEASED_STATUSES
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![from, to, dentist_id], appointment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Pending or confirmed appointments of a patient from `now` on, soonest first.
    pub fn upcoming_appointments(
        &self,
        patient_id: &str,
        now: NaiveDateTime,
        limit: u32,
    ) -> DbResult<Vec<Appointment>> {
        let sql = format!(
            r#"
            SELECT {} FROM appointments
            WHERE patient_id = ?1 AND deleted = 0 AND start_at >= ?2
              AND status IN ('PENDIENTE', 'CONFIRMADA')
            ORDER BY start_at
            LIMIT ?3
            "#,
            APPOINTMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![patient_id, now, limit], appointment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Pending or confirmed appointments a patient still holds.
    pub fn count_open_appointments_for_patient(&self, patient_id: &str) -> DbResult<u64> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM appointments
            WHERE patient_id = ?1 AND deleted = 0 AND status IN ('PENDIENTE', 'CONFIRMADA')
            "#,
            [patient_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Appointments of any status starting within `[from, to)`.
    pub fn count_appointments_starting_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> DbResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM appointments WHERE deleted = 0 AND start_at >= ?1 AND start_at < ?2",
            params![from, to],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Clinic-wide pending or confirmed appointments within `[from, to]`, soonest first.
    pub fn upcoming_clinic_appointments(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        limit: u32,
    ) -> DbResult<Vec<Appointment>> {
        let sql = format!(
            r#"
            SELECT {} FROM appointments
            WHERE deleted = 0 AND start_at >= ?1 AND start_at <= ?2
              AND status IN ('PENDIENTE', 'CONFIRMADA')
            ORDER BY start_at
            LIMIT ?3
            "#,
            APPOINTMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![from, to, limit], appointment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Count appointments by status.
    pub fn count_appointments_with_status(&self, status: AppointmentStatus) -> DbResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM appointments WHERE status = ? AND deleted = 0",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn soft_delete_appointment(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE appointments SET deleted = 1, deleted_at = ?2, updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, timestamp(), self.actor],
        )?;
        Ok(rows_affected > 0)
    }
}
