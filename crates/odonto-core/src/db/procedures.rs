//! Procedure (service catalog) database operations.

use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

use super::{contains_pattern, decimal_col, timestamp, unique_violation, Database, DbResult};
use crate::models::{Procedure, ProcedureSupply};

const PROCEDURE_COLUMNS: &str = r#"
    id, code, name, description, base_price, duration_minutes, category, active,
    created_at, updated_at, created_by, updated_by
"#;

fn procedure_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Procedure> {
    Ok(Procedure {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        base_price: decimal_col(row, 4)?,
        duration_minutes: row.get(5)?,
        category: row.get(6)?,
        active: row.get(7)?,
        audit: super::audit_cols(row, 8)?,
    })
}

impl Database {
    pub fn insert_procedure(&self, procedure: &Procedure) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO procedures (
                    id, code, name, description, base_price, duration_minutes, category, active,
                    created_at, updated_at, created_by, updated_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                "#,
                params![
                    procedure.id,
                    procedure.code,
                    procedure.name,
                    procedure.description,
                    procedure.base_price.to_string(),
                    procedure.duration_minutes,
                    procedure.category,
                    procedure.active,
                    procedure.audit.created_at,
                    procedure.audit.updated_at,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, &format!("procedure {}", procedure.code)))?;
        Ok(())
    }

    pub fn update_procedure(&self, procedure: &Procedure) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE procedures SET
                    code = ?2,
                    name = ?3,
                    description = ?4,
                    base_price = ?5,
                    duration_minutes = ?6,
                    category = ?7,
                    active = ?8,
                    updated_at = datetime('now'),
                    updated_by = ?9
                WHERE id = ?1 AND deleted = 0
                "#,
                params![
                    procedure.id,
                    procedure.code,
                    procedure.name,
                    procedure.description,
                    procedure.base_price.to_string(),
                    procedure.duration_minutes,
                    procedure.category,
                    procedure.active,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, &format!("procedure {}", procedure.code)))?;
        Ok(rows_affected > 0)
    }

    pub fn get_procedure(&self, id: &str) -> DbResult<Option<Procedure>> {
        let sql = format!(
            "SELECT {} FROM procedures WHERE id = ? AND deleted = 0",
            PROCEDURE_COLUMNS
        );
        self.conn
            .query_row(&sql, [id], procedure_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Procedures ordered by name, optionally only active ones.
    pub fn list_procedures(&self, only_active: bool) -> DbResult<Vec<Procedure>> {
        let sql = format!(
            r#"
            SELECT {} FROM procedures
            WHERE deleted = 0 AND (?1 = 0 OR active = 1)
            ORDER BY name
            "#,
            PROCEDURE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([only_active], procedure_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Substring search over name and code.
    pub fn search_procedures(&self, keyword: &str) -> DbResult<Vec<Procedure>> {
        let sql = format!(
            r#"
            SELECT {} FROM procedures
            WHERE deleted = 0 AND (lower(name) LIKE ?1 OR lower(code) LIKE ?1)
            ORDER BY name
            "#,
            PROCEDURE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([contains_pattern(keyword)], procedure_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn soft_delete_procedure(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE procedures SET deleted = 1, active = 0, deleted_at = ?2, updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, timestamp(), self.actor],
        )?;
        Ok(rows_affected > 0)
    }

    // =========================================================================
    // Default supplies
    // =========================================================================

    /// Set (or replace) the default quantity of a supply consumed by a procedure.
    pub fn set_procedure_supply(&self, procedure_id: &str, supply_id: &str, quantity: Decimal) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO procedure_supplies (procedure_id, supply_id, default_quantity)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(procedure_id, supply_id) DO UPDATE SET
                default_quantity = excluded.default_quantity
            "#,
            params![procedure_id, supply_id, quantity.to_string()],
        )?;
        Ok(())
    }

    pub fn remove_procedure_supply(&self, procedure_id: &str, supply_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM procedure_supplies WHERE procedure_id = ?1 AND supply_id = ?2",
            [procedure_id, supply_id],
        )?;
        Ok(rows_affected > 0)
    }

    pub fn procedure_supplies(&self, procedure_id: &str) -> DbResult<Vec<ProcedureSupply>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT ps.procedure_id, ps.supply_id, ps.default_quantity
            FROM procedure_supplies ps
            JOIN supplies s ON s.id = ps.supply_id
            WHERE ps.procedure_id = ? AND s.deleted = 0
            ORDER BY s.name
            "#,
        )?;
        let rows = stmt.query_map([procedure_id], |row| {
            Ok(ProcedureSupply {
                procedure_id: row.get(0)?,
                supply_id: row.get(1)?,
                default_quantity: decimal_col(row, 2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Supply;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let mut proc = Procedure::new("PRO-001".into(), "Limpieza dental".into(), Decimal::new(8000, 2), 45);
        proc.category = Some("Preventivo".into());
        db.insert_procedure(&proc).unwrap();

        let retrieved = db.get_procedure(&proc.id).unwrap().unwrap();
        assert_eq!(retrieved.base_price, Decimal::new(8000, 2));
        assert_eq!(retrieved.duration_minutes, 45);
        assert_eq!(retrieved.category.as_deref(), Some("Preventivo"));
    }

    #[test]
    fn test_list_only_active() {
        let db = setup_db();
        let a = Procedure::new("A".into(), "Resina".into(), Decimal::from(120), 30);
        let mut b = Procedure::new("B".into(), "Blanqueamiento".into(), Decimal::from(300), 60);
        b.active = false;
        db.insert_procedure(&a).unwrap();
        db.insert_procedure(&b).unwrap();

        assert_eq!(db.list_procedures(false).unwrap().len(), 2);
        let active = db.list_procedures(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Resina");

        assert_eq!(db.search_procedures("blanq").unwrap().len(), 1);
    }

    #[test]
    fn test_default_supplies() {
        let db = setup_db();
        let proc = Procedure::new("P".into(), "Extracción".into(), Decimal::from(150), 30);
        db.insert_procedure(&proc).unwrap();
        let supply = Supply::new("INS-1".into(), "Anestesia".into(), "cartucho".into());
        db.insert_supply(&supply).unwrap();

        db.set_procedure_supply(&proc.id, &supply.id, Decimal::ONE).unwrap();
        db.set_procedure_supply(&proc.id, &supply.id, Decimal::from(2)).unwrap();

        let supplies = db.procedure_supplies(&proc.id).unwrap();
        assert_eq!(supplies.len(), 1);
        assert_eq!(supplies[0].default_quantity, Decimal::from(2));

        assert!(db.remove_procedure_supply(&proc.id, &supply.id).unwrap());
        assert!(db.procedure_supplies(&proc.id).unwrap().is_empty());
    }
}
