//! Planned and performed treatment database operations.

use rusqlite::{params, OptionalExtension};

use super::{code_col, opt_decimal_col, timestamp, Database, DbResult};
use crate::models::{PerformedTreatment, PlanStatus, PlannedTreatment};

const PLANNED_COLUMNS: &str = r#"
    id, patient_id, procedure_id, dentist_id, teeth, description, planned_for,
    status, appointment_id, performed_treatment_id,
    created_at, updated_at, created_by, updated_by
"#;

const PERFORMED_COLUMNS: &str = r#"
    id, appointment_id, patient_id, procedure_id, dentist_id, teeth, description,
    performed_at, adjusted_supply_id, adjusted_quantity,
    created_at, updated_at, created_by, updated_by
"#;

fn planned_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlannedTreatment> {
    Ok(PlannedTreatment {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        procedure_id: row.get(2)?,
        dentist_id: row.get(3)?,
        teeth: row.get(4)?,
        description: row.get(5)?,
        planned_for: row.get(6)?,
        status: code_col(row, 7)?,
        appointment_id: row.get(8)?,
        performed_treatment_id: row.get(9)?,
        audit: super::audit_cols(row, 10)?,
    })
}

fn performed_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PerformedTreatment> {
    Ok(PerformedTreatment {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        patient_id: row.get(2)?,
        procedure_id: row.get(3)?,
        dentist_id: row.get(4)?,
        teeth: row.get(5)?,
        description: row.get(6)?,
        performed_at: row.get(7)?,
        adjusted_supply_id: row.get(8)?,
        adjusted_quantity: opt_decimal_col(row, 9)?,
        audit: super::audit_cols(row, 10)?,
    })
}

impl Database {
    // =========================================================================
    // Planned treatments
    // =========================================================================

    pub fn insert_planned_treatment(&self, plan: &PlannedTreatment) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO planned_treatments (
                id, patient_id, procedure_id, dentist_id, teeth, description, planned_for,
                status, appointment_id, performed_treatment_id,
                created_at, updated_at, created_by, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            "#,
            params![
                plan.id,
                plan.patient_id,
                plan.procedure_id,
                plan.dentist_id,
                plan.teeth,
                plan.description,
                plan.planned_for,
                plan.status.as_str(),
                plan.appointment_id,
                plan.performed_treatment_id,
                plan.audit.created_at,
                plan.audit.updated_at,
                self.actor,
            ],
        )?;
        Ok(())
    }

    pub fn update_planned_treatment(&self, plan: &PlannedTreatment) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE planned_treatments SET
                dentist_id = ?2,
                teeth = ?3,
                description = ?4,
                planned_for = ?5,
                status = ?6,
                appointment_id = ?7,
                performed_treatment_id = ?8,
                updated_at = datetime('now'),
                updated_by = ?9
            WHERE id = ?1 AND deleted = 0
            "#,
            params![
                plan.id,
                plan.dentist_id,
                plan.teeth,
                plan.description,
                plan.planned_for,
                plan.status.as_str(),
                plan.appointment_id,
                plan.performed_treatment_id,
                self.actor,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    pub fn get_planned_treatment(&self, id: &str) -> DbResult<Option<PlannedTreatment>> {
        let sql = format!(
            "SELECT {} FROM planned_treatments WHERE id = ? AND deleted = 0",
            PLANNED_COLUMNS
        );
        self.conn
            .query_row(&sql, [id], planned_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// The plan linked to an appointment, if any.
    pub fn get_plan_for_appointment(&self, appointment_id: &str) -> DbResult<Option<PlannedTreatment>> {
        let sql = format!(
            r#"
            SELECT {} FROM planned_treatments
            WHERE appointment_id = ? AND deleted = 0
            ORDER BY rowid DESC
            LIMIT 1
            "#,
            PLANNED_COLUMNS
        );
        self.conn
            .query_row(&sql, [appointment_id], planned_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Plans of a patient, optionally restricted to one status, oldest first.
    pub fn list_planned_treatments(
        &self,
        patient_id: &str,
        status: Option<PlanStatus>,
    ) -> DbResult<Vec<PlannedTreatment>> {
        let sql = format!(
            r#"
            SELECT {} FROM planned_treatments
            WHERE patient_id = ?1 AND deleted = 0 AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at, rowid
            "#,
            PLANNED_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![patient_id, status.map(|s| s.as_str())],
            planned_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn soft_delete_planned_treatment(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE planned_treatments SET deleted = 1, deleted_at = ?2, updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, timestamp(), self.actor],
        )?;
        Ok(rows_affected > 0)
    }

    // =========================================================================
    // Performed treatments
    // =========================================================================

    pub fn insert_performed_treatment(&self, treatment: &PerformedTreatment) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO performed_treatments (
                id, appointment_id, patient_id, procedure_id, dentist_id, teeth, description,
                performed_at, adjusted_supply_id, adjusted_quantity,
                created_at, updated_at, created_by, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            "#,
            params![
                treatment.id,
                treatment.appointment_id,
                treatment.patient_id,
                treatment.procedure_id,
                treatment.dentist_id,
                treatment.teeth,
                treatment.description,
                treatment.performed_at,
                treatment.adjusted_supply_id,
                treatment.adjusted_quantity.map(|q| q.to_string()),
                treatment.audit.created_at,
                treatment.audit.updated_at,
                self.actor,
            ],
        )?;
        Ok(())
    }

    pub fn get_performed_treatment(&self, id: &str) -> DbResult<Option<PerformedTreatment>> {
        let sql = format!(
            "SELECT {} FROM performed_treatments WHERE id = ?",
            PERFORMED_COLUMNS
        );
        self.conn
            .query_row(&sql, [id], performed_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn list_treatments_for_appointment(&self, appointment_id: &str) -> DbResult<Vec<PerformedTreatment>> {
        let sql = format!(
            r#"
            SELECT {} FROM performed_treatments
            WHERE appointment_id = ?
            ORDER BY performed_at, rowid
            "#,
            PERFORMED_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([appointment_id], performed_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Most recent treatments of a patient, newest first.
    pub fn recent_treatments(&self, patient_id: &str, limit: u32) -> DbResult<Vec<PerformedTreatment>> {
        let sql = format!(
            r#"
            SELECT {} FROM performed_treatments
            WHERE patient_id = ?1
            ORDER BY performed_at DESC, rowid DESC
            LIMIT ?2
            "#,
            PERFORMED_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![patient_id, limit], performed_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Appointment;
    use crate::test_support::{at, clinic, monday};
    use rust_decimal::Decimal;

    #[test]
    fn test_planned_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);

        let mut plan = PlannedTreatment::new(c.patient.id.clone(), c.procedure.id.clone());
        plan.teeth = Some("16,17".into());
        db.insert_planned_treatment(&plan).unwrap();

        let appt = Appointment::new(
            c.patient.id.clone(),
            c.dentist.id.clone(),
            c.procedure.id.clone(),
            at(monday(), 9, 0),
            30,
        );
        db.insert_appointment(&appt).unwrap();

        plan.status = PlanStatus::InProgress;
        plan.appointment_id = Some(appt.id.clone());
        db.update_planned_treatment(&plan).unwrap();

        let linked = db.get_plan_for_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(linked.id, plan.id);
        assert_eq!(linked.status, PlanStatus::InProgress);

        assert_eq!(
            db.list_planned_treatments(&c.patient.id, Some(PlanStatus::Planned))
                .unwrap()
                .len(),
            0
        );
        assert_eq!(db.list_planned_treatments(&c.patient.id, None).unwrap().len(), 1);

        assert!(db.soft_delete_planned_treatment(&plan.id).unwrap());
        assert!(db.get_planned_treatment(&plan.id).unwrap().is_none());
    }

    #[test]
    fn test_performed_round_trip_and_recent() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);

        for day in 0..3 {
            let mut t = PerformedTreatment::new(
                c.patient.id.clone(),
                c.procedure.id.clone(),
                c.dentist.id.clone(),
                at(monday() + chrono::Duration::days(day), 10, 0),
            );
            t.adjusted_quantity = Some(Decimal::new(15, 1));
            db.insert_performed_treatment(&t).unwrap();
        }

        let recent = db.recent_treatments(&c.patient.id, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].performed_at, at(monday() + chrono::Duration::days(2), 10, 0));
        assert_eq!(recent[0].adjusted_quantity, Some(Decimal::new(15, 1)));

        let fetched = db.get_performed_treatment(&recent[1].id).unwrap().unwrap();
        assert_eq!(fetched, recent[1]);
    }
}
