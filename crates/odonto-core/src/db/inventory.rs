//! Supply and stock movement database operations.

use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

use super::{
    code_col, contains_pattern, decimal_col, timestamp, unique_violation, Database, DbResult,
};
use crate::models::{Page, PageRequest, StockMovement, Supply};

const SUPPLY_COLUMNS: &str = r#"
    id, code, name, description, brand, location, lot, expires_on,
    current_stock, minimum_stock, unit_price, unit, category,
    created_at, updated_at, created_by, updated_by
"#;

fn supply_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Supply> {
    Ok(Supply {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        brand: row.get(4)?,
        location: row.get(5)?,
        lot: row.get(6)?,
        expires_on: row.get(7)?,
        current_stock: decimal_col(row, 8)?,
        minimum_stock: decimal_col(row, 9)?,
        unit_price: decimal_col(row, 10)?,
        unit: row.get(11)?,
        category: row.get(12)?,
        audit: super::audit_cols(row, 13)?,
    })
}

fn movement_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StockMovement> {
    Ok(StockMovement {
        id: row.get(0)?,
        supply_id: row.get(1)?,
        kind: code_col(row, 2)?,
        reason: row.get(3)?,
        quantity: decimal_col(row, 4)?,
        stock_before: decimal_col(row, 5)?,
        stock_after: decimal_col(row, 6)?,
        reference: row.get(7)?,
        notes: row.get(8)?,
        audit: super::audit_cols(row, 9)?,
    })
}

impl Database {
    /// Insert a new supply.
    pub fn insert_supply(&self, supply: &Supply) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO supplies (
                    id, code, name, description, brand, location, lot, expires_on,
                    current_stock, minimum_stock, unit_price, unit, category,
                    created_at, updated_at, created_by, updated_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
                "#,
                params![
                    supply.id,
                    supply.code,
                    supply.name,
                    supply.description,
                    supply.brand,
                    supply.location,
                    supply.lot,
                    supply.expires_on,
                    supply.current_stock.to_string(),
                    supply.minimum_stock.to_string(),
                    supply.unit_price.to_string(),
                    supply.unit,
                    supply.category,
                    supply.audit.created_at,
                    supply.audit.updated_at,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, &format!("supply {}", supply.code)))?;
        Ok(())
    }

    /// Update catalog fields. Stock only changes through movements.
    pub fn update_supply(&self, supply: &Supply) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE supplies SET
                    code = ?2,
                    name = ?3,
                    description = ?4,
                    brand = ?5,
                    location = ?6,
                    lot = ?7,
                    expires_on = ?8,
                    minimum_stock = ?9,
                    unit_price = ?10,
                    unit = ?11,
                    category = ?12,
                    updated_at = datetime('now'),
                    updated_by = ?13
                WHERE id = ?1 AND deleted = 0
                "#,
                params![
                    supply.id,
                    supply.code,
                    supply.name,
                    supply.description,
                    supply.brand,
                    supply.location,
                    supply.lot,
                    supply.expires_on,
                    supply.minimum_stock.to_string(),
                    supply.unit_price.to_string(),
                    supply.unit,
                    supply.category,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, &format!("supply {}", supply.code)))?;
        Ok(rows_affected > 0)
    }

    pub fn get_supply(&self, id: &str) -> DbResult<Option<Supply>> {
        let sql = format!("SELECT {} FROM supplies WHERE id = ? AND deleted = 0", SUPPLY_COLUMNS);
        self.conn
            .query_row(&sql, [id], supply_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// All live supplies ordered by name.
    pub fn list_supplies(&self) -> DbResult<Vec<Supply>> {
        let sql = format!("SELECT {} FROM supplies WHERE deleted = 0 ORDER BY name", SUPPLY_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], supply_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Search by name, code or category.
    pub fn search_supplies(&self, keyword: &str, page: PageRequest) -> DbResult<Page<Supply>> {
        let pattern = contains_pattern(keyword);

        let total: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM supplies
            WHERE deleted = 0 AND (
                lower(name) LIKE ?1 OR lower(code) LIKE ?1 OR lower(category) LIKE ?1
            )
            "#,
            [&pattern],
            |row| row.get(0),
        )?;

        let sql = format!(
            r#"
            SELECT {} FROM supplies
            WHERE deleted = 0 AND (
                lower(name) LIKE ?1 OR lower(code) LIKE ?1 OR lower(category) LIKE ?1
            )
            ORDER BY name
            LIMIT ?2 OFFSET ?3
            "#,
            SUPPLY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern, page.limit(), page.offset()], supply_from_row)?;
        let supplies = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(supplies, total as u64, page))
    }

    /// Supplies at or below their minimum stock.
    ///
    /// Stock is stored as decimal text, so the comparison happens here rather than in SQL.
    pub fn list_low_stock_supplies(&self) -> DbResult<Vec<Supply>> {
        Ok(self
            .list_supplies()?
            .into_iter()
            .filter(Supply::is_low_stock)
            .collect())
    }

    pub(crate) fn set_supply_stock(&self, id: &str, stock: Decimal) -> DbResult<()> {
        self.conn.execute(
            r#"
            UPDATE supplies SET current_stock = ?2, updated_at = datetime('now'), updated_by = ?3
            WHERE id = ?1
            "#,
            params![id, stock.to_string(), self.actor],
        )?;
        Ok(())
    }

    pub fn soft_delete_supply(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE supplies SET deleted = 1, deleted_at = ?2, updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, timestamp(), self.actor],
        )?;
        Ok(rows_affected > 0)
    }

    // =========================================================================
    // Movements
    // =========================================================================

    pub(crate) fn insert_movement(&self, movement: &StockMovement) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO stock_movements (
                id, supply_id, kind, reason, quantity, stock_before, stock_after,
                reference, notes, created_at, updated_at, created_by, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            "#,
            params![
                movement.id,
                movement.supply_id,
                movement.kind.as_str(),
                movement.reason,
                movement.quantity.to_string(),
                movement.stock_before.to_string(),
                movement.stock_after.to_string(),
                movement.reference,
                movement.notes,
                movement.audit.created_at,
                movement.audit.updated_at,
                self.actor,
            ],
        )?;
        Ok(())
    }

    /// Movements of a supply, newest first.
    pub fn list_movements(&self, supply_id: &str) -> DbResult<Vec<StockMovement>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, supply_id, kind, reason, quantity, stock_before, stock_after,
                   reference, notes, created_at, updated_at, created_by, updated_by
            FROM stock_movements
            WHERE supply_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )?;
        let rows = stmt.query_map([supply_id], movement_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Movements carrying a reference, oldest first.
    pub fn list_movements_by_reference(&self, reference: &str) -> DbResult<Vec<StockMovement>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, supply_id, kind, reason, quantity, stock_before, stock_after,
                   reference, notes, created_at, updated_at, created_by, updated_by
            FROM stock_movements
            WHERE reference = ?
            ORDER BY rowid
            "#,
        )?;
        let rows = stmt.query_map([reference], movement_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
