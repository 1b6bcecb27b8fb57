//! Per-tooth chart with change history.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ClinicalError, ClinicalResult};
use crate::db::Database;
use crate::models::{
    is_permanent_tooth, permanent_teeth, PerformedTreatment, ToothHistoryEntry, ToothRecord, ToothState,
};
use crate::search::fold;

/// Procedure name keywords (accent-folded) and the tooth state they leave behind.
const PROCEDURE_STATES: &[(&[&str], ToothState)] = &[
    (&["obturacion", "restauracion", "resina", "amalgama"], ToothState::Restored),
    (&["endodoncia", "conducto"], ToothState::RootCanal),
    (&["corona", "protesis fija"], ToothState::Crown),
    (&["extraccion", "exodoncia"], ToothState::Extraction),
    (&["implante"], ToothState::Implant),
];

/// Tooth state a procedure produces, if it maps to one.
pub fn state_for_procedure(procedure_name: &str) -> Option<ToothState> {
    let name = fold(procedure_name);
    PROCEDURE_STATES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| name.contains(k)))
        .map(|(_, state)| *state)
}

/// A requested change to one tooth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToothUpdate {
    pub tooth: u8,
    pub state: ToothState,
    pub surfaces: Option<String>,
    pub notes: Option<String>,
}

impl ToothUpdate {
    pub fn new(tooth: u8, state: ToothState) -> Self {
        Self {
            tooth,
            state,
            surfaces: None,
            notes: None,
        }
    }
}

/// Tooth counts per state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OdontogramStats {
    pub total: usize,
    pub by_state: BTreeMap<ToothState, usize>,
}

impl OdontogramStats {
    pub fn count(&self, state: ToothState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

/// Odontogram service.
pub struct Odontogram<'a> {
    db: &'a Database,
    now: Option<NaiveDateTime>,
}

impl<'a> Odontogram<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, now: None }
    }

    /// Pin the clock used to stamp history entries.
    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> NaiveDateTime {
        self.now
            .unwrap_or_else(|| chrono::Local::now().naive_local())
    }

    fn ensure_patient(&self, patient_id: &str) -> ClinicalResult<()> {
        self.db
            .get_patient(patient_id)?
            .map(|_| ())
            .ok_or_else(|| ClinicalError::NotFound(format!("Paciente no encontrado: {}", patient_id)))
    }

    /// The patient's chart, creating the 32 permanent teeth as SANO on first access.
    pub fn chart(&self, patient_id: &str) -> ClinicalResult<Vec<ToothRecord>> {
        self.ensure_patient(patient_id)?;

        let records = self.db.tooth_records(patient_id)?;
        if !records.is_empty() {
            return Ok(records);
        }

        self.db.atomic(|db| {
            for tooth in permanent_teeth() {
                if db.get_tooth_record(patient_id, tooth)?.is_none() {
                    db.upsert_tooth_record(&ToothRecord::new(patient_id.to_string(), tooth))?;
                }
            }
            info!(%patient_id, "Odontogram initialised");
            Ok::<_, ClinicalError>(())
        })?;

        Ok(self.db.tooth_records(patient_id)?)
    }

    /// Set a tooth's state. History is written only when the state actually changes.
    pub fn update_tooth(
        &self,
        patient_id: &str,
        update: &ToothUpdate,
        performed_treatment_id: Option<&str>,
    ) -> ClinicalResult<ToothRecord> {
        if !is_permanent_tooth(update.tooth) {
            return Err(ClinicalError::Validation(format!(
                "Número de diente inválido: {}",
                update.tooth
            )));
        }
        self.ensure_patient(patient_id)?;

        self.db.atomic(|db| {
            let mut record = db
                .get_tooth_record(patient_id, update.tooth)?
                .unwrap_or_else(|| ToothRecord::new(patient_id.to_string(), update.tooth));
            let previous = record.state;

            record.state = update.state;
            record.surfaces = update.surfaces.clone();
            record.notes = update.notes.clone();
            db.upsert_tooth_record(&record)?;

            if previous != update.state {
                db.insert_tooth_history(&ToothHistoryEntry {
                    id: uuid::Uuid::new_v4().to_string(),
                    patient_id: patient_id.to_string(),
                    tooth: update.tooth,
                    previous_state: Some(previous),
                    new_state: update.state,
                    notes: update.notes.clone(),
                    changed_at: self.now().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
                    changed_by: db.actor().map(str::to_string),
                    performed_treatment_id: performed_treatment_id.map(str::to_string),
                })?;
                info!(%patient_id, tooth = update.tooth, from = %previous, to = %update.state, "Tooth state changed");
            }

            Ok(db.get_tooth_record(patient_id, update.tooth)?.unwrap_or(record))
        })
    }

    /// Apply several changes in one transaction.
    pub fn update_many(&self, patient_id: &str, updates: &[ToothUpdate]) -> ClinicalResult<Vec<ToothRecord>> {
        self.db.atomic(|_| {
            updates
                .iter()
                .map(|u| self.update_tooth(patient_id, u, None))
                .collect()
        })
    }

    /// Changes for the patient (or one tooth), newest first.
    pub fn history(&self, patient_id: &str, tooth: Option<u8>) -> ClinicalResult<Vec<ToothHistoryEntry>> {
        self.ensure_patient(patient_id)?;
        Ok(self.db.tooth_history(patient_id, tooth)?)
    }

    pub fn stats(&self, patient_id: &str) -> ClinicalResult<OdontogramStats> {
        self.ensure_patient(patient_id)?;

        let records = self.db.tooth_records(patient_id)?;
        let mut stats = OdontogramStats {
            total: records.len(),
            by_state: ToothState::ALL.iter().map(|s| (*s, 0)).collect(),
        };
        for record in &records {
            *stats.by_state.entry(record.state).or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Reflect a performed treatment on each tooth it lists.
    ///
    /// Procedures that map to no state leave the chart untouched. Invalid tooth
    /// numbers are skipped.
    pub fn apply_treatment(&self, treatment: &PerformedTreatment) -> ClinicalResult<Vec<ToothRecord>> {
        let teeth = treatment.tooth_numbers();
        if teeth.is_empty() {
            return Ok(Vec::new());
        }

        let procedure = self.db.get_procedure(&treatment.procedure_id)?.ok_or_else(|| {
            ClinicalError::NotFound(format!("Procedimiento no encontrado con ID: {}", treatment.procedure_id))
        })?;
        let Some(state) = state_for_procedure(&procedure.name) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::new();
        for tooth in teeth {
            let update = ToothUpdate {
                tooth,
                state,
                surfaces: None,
                notes: Some(format!(
                    "Actualizado automáticamente desde tratamiento: {}",
                    procedure.name
                )),
            };
            match self.update_tooth(&treatment.patient_id, &update, Some(&treatment.id)) {
                Ok(record) => updated.push(record),
                Err(ClinicalError::Validation(msg)) => {
                    warn!(treatment_id = %treatment.id, tooth, %msg, "Tooth skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(updated)
    }
}
