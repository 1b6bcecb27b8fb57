//! Planned and performed treatments.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Audit, UnknownVariant};

/// Treatment plan progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanStatus {
    #[serde(rename = "PLANIFICADO")]
    Planned,
    #[serde(rename = "EN_CURSO")]
    InProgress,
    #[serde(rename = "COMPLETADO")]
    Completed,
    #[serde(rename = "CANCELADO")]
    Cancelled,
}

impl PlanStatus {
    pub const ALL: [PlanStatus; 4] = [
        PlanStatus::Planned,
        PlanStatus::InProgress,
        PlanStatus::Completed,
        PlanStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Planned => "PLANIFICADO",
            PlanStatus::InProgress => "EN_CURSO",
            PlanStatus::Completed => "COMPLETADO",
            PlanStatus::Cancelled => "CANCELADO",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlanStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("plan status", s))
    }
}

/// A treatment the dentist intends to perform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedTreatment {
    pub id: String,
    pub patient_id: String,
    pub procedure_id: String,
    pub dentist_id: Option<String>,
    /// FDI numbers, comma separated
    pub teeth: Option<String>,
    pub description: Option<String>,
    pub planned_for: Option<NaiveDate>,
    pub status: PlanStatus,
    /// Appointment scheduled to carry it out
    pub appointment_id: Option<String>,
    pub performed_treatment_id: Option<String>,
    pub audit: Audit,
}

impl PlannedTreatment {
    pub fn new(patient_id: String, procedure_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            procedure_id,
            dentist_id: None,
            teeth: None,
            description: None,
            planned_for: None,
            status: PlanStatus::Planned,
            appointment_id: None,
            performed_treatment_id: None,
            audit: Audit::now(),
        }
    }
}

/// A treatment actually carried out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformedTreatment {
    pub id: String,
    pub appointment_id: Option<String>,
    pub patient_id: String,
    pub procedure_id: String,
    pub dentist_id: String,
    /// FDI numbers, comma separated
    pub teeth: Option<String>,
    pub description: Option<String>,
    pub performed_at: NaiveDateTime,
    /// Overrides the procedure's default supplies
    pub adjusted_supply_id: Option<String>,
    pub adjusted_quantity: Option<Decimal>,
    pub audit: Audit,
}

impl PerformedTreatment {
    pub fn new(
        patient_id: String,
        procedure_id: String,
        dentist_id: String,
        performed_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            appointment_id: None,
            patient_id,
            procedure_id,
            dentist_id,
            teeth: None,
            description: None,
            performed_at,
            adjusted_supply_id: None,
            adjusted_quantity: None,
            audit: Audit::now(),
        }
    }

    pub fn tooth_numbers(&self) -> Vec<u8> {
        self.teeth.as_deref().map(parse_teeth).unwrap_or_default()
    }
}

/// Parse a comma separated tooth list, skipping anything that is not a number.
pub fn parse_teeth(list: &str) -> Vec<u8> {
    list.split(',')
        .filter_map(|t| t.trim().parse::<u8>().ok())
        .collect()
}
