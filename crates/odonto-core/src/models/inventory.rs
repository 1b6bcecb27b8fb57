//! Supplies and stock movements.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Audit, UnknownVariant};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    /// Adds to stock
    #[serde(rename = "ENTRADA")]
    Inbound,
    /// Subtracts from stock
    #[serde(rename = "SALIDA")]
    Outbound,
    /// Recorded without touching stock
    #[serde(rename = "AJUSTE")]
    Adjustment,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Inbound => "ENTRADA",
            MovementKind::Outbound => "SALIDA",
            MovementKind::Adjustment => "AJUSTE",
        }
    }

    /// Stock after applying `quantity` to `stock`. May be negative.
    pub fn apply(&self, stock: Decimal, quantity: Decimal) -> Decimal {
        match self {
            MovementKind::Inbound => stock + quantity,
            MovementKind::Outbound => stock - quantity,
            MovementKind::Adjustment => stock,
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTRADA" => Ok(MovementKind::Inbound),
            "SALIDA" => Ok(MovementKind::Outbound),
            "AJUSTE" => Ok(MovementKind::Adjustment),
            other => Err(UnknownVariant::new("movement kind", other)),
        }
    }
}

/// A stocked consumable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supply {
    pub id: String,
    /// Unique inventory code
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    /// Shelf / drawer
    pub location: Option<String>,
    pub lot: Option<String>,
    pub expires_on: Option<NaiveDate>,
    pub current_stock: Decimal,
    pub minimum_stock: Decimal,
    pub unit_price: Decimal,
    /// Unit of measure, e.g. "unidad", "ml"
    pub unit: String,
    pub category: Option<String>,
    pub audit: Audit,
}

impl Supply {
    pub fn new(code: String, name: String, unit: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            name,
            description: None,
            brand: None,
            location: None,
            lot: None,
            expires_on: None,
            current_stock: Decimal::ZERO,
            minimum_stock: Decimal::ZERO,
            unit_price: Decimal::ZERO,
            unit,
            category: None,
            audit: Audit::now(),
        }
    }

    /// At or below minimum. A zero minimum disables the alert.
    pub fn is_low_stock(&self) -> bool {
        self.minimum_stock > Decimal::ZERO && self.current_stock <= self.minimum_stock
    }
}

/// An entry in a supply's stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockMovement {
    pub id: String,
    pub supply_id: String,
    pub kind: MovementKind,
    pub reason: String,
    pub quantity: Decimal,
    pub stock_before: Decimal,
    pub stock_after: Decimal,
    /// Free-form source, e.g. an invoice number
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub audit: Audit,
}
