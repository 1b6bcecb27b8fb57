//! Stock keeping.
//!
//! Every change to a supply's stock goes through [`Stock::register_movement`], which
//! writes the ledger entry and the new stock together.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Database, DbError};
use crate::models::{Audit, MovementKind, Page, PageRequest, StockMovement, Supply};
use crate::search;

/// Reason written on automatic procedure deductions.
pub const PROCEDURE_USE_REASON: &str = "Uso en procedimiento";

/// Inventory errors.
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("{0}")]
    NotFound(String),

    #[error("No hay stock suficiente para registrar la salida de '{name}'. Stock actual: {available}, se requiere: {requested}")]
    InsufficientStock {
        name: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("{0}")]
    Validation(String),
}

pub type InventoryResult<T> = Result<T, InventoryError>;

/// A movement to record.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementRequest {
    pub supply_id: String,
    pub kind: MovementKind,
    pub reason: String,
    pub quantity: Decimal,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl MovementRequest {
    pub fn new(supply_id: impl Into<String>, kind: MovementKind, reason: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            supply_id: supply_id.into(),
            kind,
            reason: reason.into(),
            quantity,
            reference: None,
            notes: None,
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Stock service.
pub struct Stock<'a> {
    db: &'a Database,
}

impl<'a> Stock<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Record a movement and apply it to the supply.
    pub fn register_movement(&self, request: MovementRequest) -> InventoryResult<StockMovement> {
        if request.quantity <= Decimal::ZERO {
            return Err(InventoryError::Validation(
                "La cantidad debe ser mayor a cero".into(),
            ));
        }

        self.db.atomic(|db| {
            let supply = db.get_supply(&request.supply_id)?.ok_or_else(|| {
                InventoryError::NotFound(format!(
                    "No se puede registrar un movimiento para un insumo inexistente o eliminado: {}",
                    request.supply_id
                ))
            })?;

            let stock_before = supply.current_stock;
            let stock_after = request.kind.apply(stock_before, request.quantity);
            if stock_after < Decimal::ZERO {
                warn!(supply = %supply.code, %stock_before, quantity = %request.quantity, "Outbound movement rejected");
                return Err(InventoryError::InsufficientStock {
                    name: supply.name,
                    available: stock_before,
                    requested: request.quantity,
                });
            }

            let movement = StockMovement {
                id: uuid::Uuid::new_v4().to_string(),
                supply_id: supply.id.clone(),
                kind: request.kind,
                reason: request.reason.clone(),
                quantity: request.quantity,
                stock_before,
                stock_after,
                reference: request.reference.clone(),
                notes: request.notes.clone(),
                audit: Audit::now(),
            };
            db.insert_movement(&movement)?;
            if stock_after != stock_before {
                db.set_supply_stock(&supply.id, stock_after)?;
            }

            info!(
                supply = %supply.code,
                kind = %movement.kind,
                quantity = %movement.quantity,
                %stock_after,
                "Stock movement registered"
            );
            Ok(movement)
        })
    }

    /// Deduct the supplies a procedure consumes.
    ///
    /// With an adjusted supply and quantity only that supply is deducted; otherwise
    /// every default supply of the procedure. Nothing configured means nothing to do.
    pub fn deduct_for_procedure(
        &self,
        procedure_id: &str,
        adjusted: Option<(&str, Decimal)>,
        reference: &str,
    ) -> InventoryResult<Vec<StockMovement>> {
        self.db.atomic(|db| {
            db.get_procedure(procedure_id)?.ok_or_else(|| {
                InventoryError::NotFound(format!("Procedimiento no encontrado con ID: {}", procedure_id))
            })?;

            let usage: Vec<(String, Decimal)> = match adjusted {
                Some((supply_id, quantity)) => vec![(supply_id.to_string(), quantity)],
                None => db
                    .procedure_supplies(procedure_id)?
                    .into_iter()
                    .map(|ps| (ps.supply_id, ps.default_quantity))
                    .collect(),
            };

            usage
                .into_iter()
                .map(|(supply_id, quantity)| {
                    self.register_movement(
                        MovementRequest::new(supply_id, MovementKind::Outbound, PROCEDURE_USE_REASON, quantity)
                            .reference(reference)
                            .notes("Descuento automático por realización de procedimiento"),
                    )
                })
                .collect()
        })
    }

    /// Supplies at or below their minimum.
    pub fn low_stock(&self) -> InventoryResult<Vec<Supply>> {
        let supplies = self.db.list_low_stock_supplies()?;
        if !supplies.is_empty() {
            warn!(count = supplies.len(), "Supplies at or below minimum stock");
        }
        Ok(supplies)
    }

    pub fn movements(&self, supply_id: &str) -> InventoryResult<Vec<StockMovement>> {
        Ok(self.db.list_movements(supply_id)?)
    }

    /// Create or update a supply. Stock only changes through movements.
    pub fn save_supply(&self, supply: &Supply) -> InventoryResult<Supply> {
        if supply.code.trim().is_empty() || supply.name.trim().is_empty() {
            return Err(InventoryError::Validation(
                "El código y el nombre del insumo son obligatorios".into(),
            ));
        }
        if supply.minimum_stock < Decimal::ZERO || supply.unit_price < Decimal::ZERO {
            return Err(InventoryError::Validation(
                "El stock mínimo y el precio no pueden ser negativos".into(),
            ));
        }

        if self.db.get_supply(&supply.id)?.is_some() {
            self.db.update_supply(supply)?;
        } else {
            self.db.insert_supply(supply)?;
        }

        self.get_supply(&supply.id)
    }

    pub fn get_supply(&self, id: &str) -> InventoryResult<Supply> {
        self.db
            .get_supply(id)?
            .ok_or_else(|| InventoryError::NotFound(format!("Insumo no encontrado con ID: {}", id)))
    }

    pub fn delete_supply(&self, id: &str) -> InventoryResult<()> {
        if !self.db.soft_delete_supply(id)? {
            return Err(InventoryError::NotFound(format!("Insumo no encontrado con ID: {}", id)));
        }
        info!(supply_id = %id, "Supply deleted");
        Ok(())
    }

    /// Paged keyword search over code and name.
    pub fn search(&self, keyword: &str, page: PageRequest) -> InventoryResult<Page<Supply>> {
        Ok(self.db.search_supplies(keyword, page)?)
    }

    /// Typo-tolerant lookup by name or code, best match first.
    pub fn find(&self, query: &str) -> InventoryResult<Vec<Supply>> {
        let supplies = self.db.list_supplies()?;
        Ok(search::rank(supplies, query, |s| vec![s.name.as_str(), s.code.as_str()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::clinic;

    fn supply(db: &Database, code: &str, name: &str, stock: i64) -> Supply {
        let mut supply = Supply::new(code.into(), name.into(), "unidad".into());
        supply.minimum_stock = Decimal::from(5);
        supply.unit_price = Decimal::new(250, 2);
        db.insert_supply(&supply).unwrap();
        if stock > 0 {
            Stock::new(db)
                .register_movement(MovementRequest::new(
                    supply.id.clone(),
                    MovementKind::Inbound,
                    "Compra",
                    Decimal::from(stock),
                ))
                .unwrap();
        }
        db.get_supply(&supply.id).unwrap().unwrap()
    }

    #[test]
    fn test_movement_updates_stock() {
        let db = Database::open_in_memory().unwrap();
        let gloves = supply(&db, "INS-001", "Guantes de nitrilo", 10);
        let stock = Stock::new(&db);

        let out = stock
            .register_movement(
                MovementRequest::new(gloves.id.clone(), MovementKind::Outbound, "Uso interno", Decimal::from(4))
                    .reference("Consultorio 2"),
            )
            .unwrap();
        assert_eq!(out.stock_before, Decimal::from(10));
        assert_eq!(out.stock_after, Decimal::from(6));
        assert_eq!(stock.get_supply(&gloves.id).unwrap().current_stock, Decimal::from(6));

        let adjustment = stock
            .register_movement(MovementRequest::new(
                gloves.id.clone(),
                MovementKind::Adjustment,
                "Conteo físico",
                Decimal::from(3),
            ))
            .unwrap();
        assert_eq!(adjustment.stock_after, Decimal::from(6));

        let ledger = stock.movements(&gloves.id).unwrap();
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger[0].kind, MovementKind::Adjustment);
    }

    #[test]
    fn test_outbound_cannot_go_negative() {
        let db = Database::open_in_memory().unwrap();
        let gloves = supply(&db, "INS-001", "Guantes", 2);

        let err = Stock::new(&db)
            .register_movement(MovementRequest::new(
                gloves.id.clone(),
                MovementKind::Outbound,
                "Uso",
                Decimal::from(3),
            ))
            .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));
        assert!(err.to_string().contains("No hay stock suficiente"));

        // Ledger untouched
        assert_eq!(db.list_movements(&gloves.id).unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_deleted_supply_and_zero_quantity() {
        let db = Database::open_in_memory().unwrap();
        let gloves = supply(&db, "INS-001", "Guantes", 2);
        let stock = Stock::new(&db);

        let err = stock
            .register_movement(MovementRequest::new(gloves.id.clone(), MovementKind::Inbound, "Compra", Decimal::ZERO))
            .unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));

        stock.delete_supply(&gloves.id).unwrap();
        let err = stock
            .register_movement(MovementRequest::new(gloves.id.clone(), MovementKind::Inbound, "Compra", Decimal::ONE))
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
    }

    #[test]
    fn test_deduct_defaults_or_adjusted() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let gloves = supply(&db, "INS-001", "Guantes", 10);
        let prophy = supply(&db, "INS-002", "Pasta profiláctica", 10);
        db.set_procedure_supply(&c.procedure.id, &gloves.id, Decimal::from(2)).unwrap();
        db.set_procedure_supply(&c.procedure.id, &prophy.id, Decimal::ONE).unwrap();
        let stock = Stock::new(&db);

        let moves = stock.deduct_for_procedure(&c.procedure.id, None, "Cita #1").unwrap();
        assert_eq!(moves.len(), 2);
        assert!(moves.iter().all(|m| m.reason == PROCEDURE_USE_REASON));
        assert_eq!(stock.get_supply(&gloves.id).unwrap().current_stock, Decimal::from(8));
        assert_eq!(stock.get_supply(&prophy.id).unwrap().current_stock, Decimal::from(9));

        let moves = stock
            .deduct_for_procedure(&c.procedure.id, Some((&prophy.id, Decimal::from(3))), "Cita #2")
            .unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(stock.get_supply(&gloves.id).unwrap().current_stock, Decimal::from(8));
        assert_eq!(stock.get_supply(&prophy.id).unwrap().current_stock, Decimal::from(6));
        assert_eq!(db.list_movements_by_reference("Cita #2").unwrap().len(), 1);
    }

    #[test]
    fn test_deduct_is_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let gloves = supply(&db, "INS-001", "Guantes", 10);
        let prophy = supply(&db, "INS-002", "Pasta profiláctica", 0);
        db.set_procedure_supply(&c.procedure.id, &gloves.id, Decimal::from(2)).unwrap();
        db.set_procedure_supply(&c.procedure.id, &prophy.id, Decimal::ONE).unwrap();

        assert!(Stock::new(&db)
            .deduct_for_procedure(&c.procedure.id, None, "Cita #1")
            .is_err());
        assert_eq!(db.get_supply(&gloves.id).unwrap().unwrap().current_stock, Decimal::from(10));
    }

    #[test]
    fn test_no_configured_supplies_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        assert!(Stock::new(&db)
            .deduct_for_procedure(&c.procedure.id, None, "Cita #1")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_low_stock_and_find() {
        let db = Database::open_in_memory().unwrap();
        supply(&db, "INS-001", "Guantes de nitrilo", 3);
        supply(&db, "INS-002", "Resina fluida 3M", 20);
        let stock = Stock::new(&db);

        let low = stock.low_stock().unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].code, "INS-001");

        let found = stock.find("guantes nitrilo").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "INS-001");
    }

    #[test]
    fn test_save_supply_keeps_stock() {
        let db = Database::open_in_memory().unwrap();
        let mut gloves = supply(&db, "INS-001", "Guantes", 7);
        let stock = Stock::new(&db);

        gloves.name = "Guantes de látex".into();
        gloves.current_stock = Decimal::from(999);
        let saved = stock.save_supply(&gloves).unwrap();
        assert_eq!(saved.name, "Guantes de látex");
        assert_eq!(saved.current_stock, Decimal::from(7));

        let mut blank = Supply::new(" ".into(), "X".into(), "u".into());
        blank.minimum_stock = Decimal::ZERO;
        assert!(matches!(stock.save_supply(&blank), Err(InventoryError::Validation(_))));
    }
}
