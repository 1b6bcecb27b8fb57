//! Billable procedures (services).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Audit;

/// Fallback length for procedures without a configured duration.
pub const DEFAULT_PROCEDURE_MINUTES: u32 = 30;

/// A clinical service offered by the clinic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Procedure {
    pub id: String,
    /// Unique short code, e.g. "PRO-001"
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub duration_minutes: u32,
    pub category: Option<String>,
    pub active: bool,
    pub audit: Audit,
}

impl Procedure {
    pub fn new(code: String, name: String, base_price: Decimal, duration_minutes: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            name,
            description: None,
            base_price,
            duration_minutes,
            category: None,
            active: true,
            audit: Audit::now(),
        }
    }

    /// Duration used for booking; never zero.
    pub fn booking_minutes(&self) -> u32 {
        if self.duration_minutes == 0 {
            DEFAULT_PROCEDURE_MINUTES
        } else {
            self.duration_minutes
        }
    }
}

/// A supply consumed by default when a procedure is performed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureSupply {
    pub procedure_id: String,
    pub supply_id: String,
    pub default_quantity: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_minutes() {
        let mut procedure = Procedure::new("P1".into(), "Limpieza".into(), Decimal::new(8000, 2), 45);
        assert_eq!(procedure.booking_minutes(), 45);

        procedure.duration_minutes = 0;
        assert_eq!(procedure.booking_minutes(), DEFAULT_PROCEDURE_MINUTES);
    }
}
