//! Clinical records: the per-tooth chart and treatments.
//!
//! ```text
//!   PlannedTreatment ──link──► Appointment ──attended──► PerformedTreatment
//!     PLANIFICADO                                          │
//!     EN_CURSO ◄── linked                                  ├─► Stock::deduct_for_procedure
//!     COMPLETADO ◄─────────────────────────────────────────┤
//!                                                          └─► Odontogram::apply_treatment
//! ```

mod odontogram;
mod treatments;

pub use odontogram::*;
pub use treatments::*;

use thiserror::Error;

use crate::db::DbError;
use crate::inventory::InventoryError;

/// Clinical errors.
#[derive(Error, Debug)]
pub enum ClinicalError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidState(String),
}

pub type ClinicalResult<T> = Result<T, ClinicalError>;
