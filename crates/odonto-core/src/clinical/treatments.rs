//! Planned and performed treatments.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::{ClinicalError, ClinicalResult, Odontogram};
use crate::db::Database;
use crate::inventory::Stock;
use crate::models::{PerformedTreatment, PlanStatus, PlannedTreatment, ROLE_ADMIN, ROLE_DENTIST};

/// Procedure code of a general consultation; it consumes no default supplies.
pub const GENERAL_CONSULTATION_CODE: &str = "CON-001";

/// A treatment carried out during an appointment.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformedRequest {
    pub appointment_id: String,
    pub procedure_id: String,
    pub dentist_id: String,
    /// FDI numbers, comma separated
    pub teeth: Option<String>,
    pub description: Option<String>,
    pub performed_at: NaiveDateTime,
    /// Replaces the procedure's default supplies
    pub adjusted_supply: Option<(String, Decimal)>,
}

/// A treatment to plan for later.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub patient_id: String,
    pub procedure_id: String,
    pub dentist_id: Option<String>,
    pub teeth: Option<String>,
    pub description: Option<String>,
    pub planned_for: Option<NaiveDate>,
    /// Appointment that will carry it out; the plan starts EN_CURSO
    pub appointment_id: Option<String>,
}

/// Treatment service.
pub struct Treatments<'a> {
    db: &'a Database,
}

impl<'a> Treatments<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Record a performed treatment.
    ///
    /// Deducts supplies, updates the odontogram and completes the matching plan,
    /// all or nothing.
    pub fn register_performed(&self, request: &PerformedRequest) -> ClinicalResult<PerformedTreatment> {
        if let Some((_, quantity)) = &request.adjusted_supply {
            if *quantity <= Decimal::ZERO {
                return Err(ClinicalError::Validation(
                    "Si se especifica un insumo ajustado, la cantidad debe ser mayor a cero".into(),
                ));
            }
        }

        self.db.atomic(|db| {
            let appointment = db.get_appointment(&request.appointment_id)?.ok_or_else(|| {
                ClinicalError::NotFound(format!("Cita no encontrada con ID: {}", request.appointment_id))
            })?;
            let procedure = db.get_procedure(&request.procedure_id)?.ok_or_else(|| {
                ClinicalError::NotFound(format!("Procedimiento no encontrado con ID: {}", request.procedure_id))
            })?;
            let dentist = db.get_user(&request.dentist_id)?.ok_or_else(|| {
                ClinicalError::NotFound(format!("Odontólogo no encontrado con ID: {}", request.dentist_id))
            })?;
            if !(dentist.has_role(ROLE_DENTIST) || dentist.has_role(ROLE_ADMIN)) {
                return Err(ClinicalError::Validation(format!(
                    "El usuario {} no tiene el rol de odontólogo",
                    dentist.full_name
                )));
            }

            let mut treatment = PerformedTreatment::new(
                appointment.patient_id.clone(),
                procedure.id.clone(),
                dentist.id.clone(),
                request.performed_at,
            );
            treatment.appointment_id = Some(appointment.id.clone());
            treatment.teeth = request.teeth.clone();
            treatment.description = request.description.clone();
            if let Some((supply_id, quantity)) = &request.adjusted_supply {
                treatment.adjusted_supply_id = Some(supply_id.clone());
                treatment.adjusted_quantity = Some(*quantity);
            }
            db.insert_performed_treatment(&treatment)?;

            let adjusted = request
                .adjusted_supply
                .as_ref()
                .map(|(id, qty)| (id.as_str(), *qty));
            if adjusted.is_some() || procedure.code != GENERAL_CONSULTATION_CODE {
                let reference = format!("Tratamiento {} - Cita {}", procedure.name, appointment.id);
                let movements = Stock::new(db).deduct_for_procedure(&procedure.id, adjusted, &reference)?;
                info!(treatment_id = %treatment.id, movements = movements.len(), "Supplies deducted");
            }

            Odontogram::new(db).at(treatment.performed_at).apply_treatment(&treatment)?;
            self.complete_plan(db, &treatment)?;

            info!(
                treatment_id = %treatment.id,
                appointment_id = %appointment.id,
                procedure = %procedure.code,
                "Performed treatment registered"
            );
            Ok(treatment)
        })
    }

    /// The plan linked to the appointment, else the oldest open plan for the same procedure.
    fn complete_plan(&self, db: &Database, treatment: &PerformedTreatment) -> ClinicalResult<()> {
        let linked = match &treatment.appointment_id {
            Some(appointment_id) => db
                .get_plan_for_appointment(appointment_id)?
                .filter(|p| matches!(p.status, PlanStatus::Planned | PlanStatus::InProgress)),
            None => None,
        };

        let plan = match linked {
            Some(plan) => Some(plan),
            None => {
                let open = |status| -> ClinicalResult<Option<PlannedTreatment>> {
                    Ok(db
                        .list_planned_treatments(&treatment.patient_id, Some(status))?
                        .into_iter()
                        .find(|p| p.procedure_id == treatment.procedure_id))
                };
                match open(PlanStatus::Planned)? {
                    Some(plan) => Some(plan),
                    None => open(PlanStatus::InProgress)?,
                }
            }
        };

        match plan {
            Some(mut plan) => {
                plan.status = PlanStatus::Completed;
                plan.performed_treatment_id = Some(treatment.id.clone());
                db.update_planned_treatment(&plan)?;
                info!(plan_id = %plan.id, treatment_id = %treatment.id, "Planned treatment completed");
            }
            None => {
                info!(treatment_id = %treatment.id, "No planned treatment to complete");
            }
        }
        Ok(())
    }

    pub fn get_performed(&self, id: &str) -> ClinicalResult<PerformedTreatment> {
        self.db
            .get_performed_treatment(id)?
            .ok_or_else(|| ClinicalError::NotFound(format!("Tratamiento realizado no encontrado con ID: {}", id)))
    }

    pub fn for_appointment(&self, appointment_id: &str) -> ClinicalResult<Vec<PerformedTreatment>> {
        Ok(self.db.list_treatments_for_appointment(appointment_id)?)
    }

    /// Create a plan, EN_CURSO when an appointment is given.
    pub fn plan(&self, request: &PlanRequest) -> ClinicalResult<PlannedTreatment> {
        self.db.atomic(|db| {
            db.get_patient(&request.patient_id)?.ok_or_else(|| {
                ClinicalError::NotFound(format!("Paciente no encontrado: {}", request.patient_id))
            })?;
            db.get_procedure(&request.procedure_id)?.ok_or_else(|| {
                ClinicalError::NotFound(format!("Procedimiento no encontrado con ID: {}", request.procedure_id))
            })?;

            let mut plan = PlannedTreatment::new(request.patient_id.clone(), request.procedure_id.clone());
            plan.dentist_id = request.dentist_id.clone();
            plan.teeth = request.teeth.clone();
            plan.description = request.description.clone();
            plan.planned_for = request.planned_for;
            db.insert_planned_treatment(&plan)?;

            if let Some(appointment_id) = &request.appointment_id {
                plan = self.link_in(db, plan, appointment_id)?;
            }

            info!(plan_id = %plan.id, status = %plan.status, "Treatment planned");
            Ok(plan)
        })
    }

    /// Attach a PLANIFICADO plan to an active appointment; it becomes EN_CURSO.
    pub fn link_to_appointment(&self, plan_id: &str, appointment_id: &str) -> ClinicalResult<PlannedTreatment> {
        self.db.atomic(|db| {
            let plan = self.load_plan(db, plan_id)?;
            self.link_in(db, plan, appointment_id)
        })
    }

    fn link_in(&self, db: &Database, mut plan: PlannedTreatment, appointment_id: &str) -> ClinicalResult<PlannedTreatment> {
        if plan.status != PlanStatus::Planned {
            return Err(ClinicalError::InvalidState(format!(
                "Solo se pueden asociar tratamientos en estado PLANIFICADO. Estado actual: {}",
                plan.status
            )));
        }
        let appointment = db.get_appointment(appointment_id)?.ok_or_else(|| {
            ClinicalError::NotFound(format!("Cita no encontrada con ID: {}", appointment_id))
        })?;
        if !appointment.status.blocks_schedule() || appointment.status.is_attendance_recorded() {
            return Err(ClinicalError::InvalidState(format!(
                "La cita no está activa. Estado actual: {}",
                appointment.status
            )));
        }
        if appointment.patient_id != plan.patient_id {
            return Err(ClinicalError::Validation(
                "La cita pertenece a otro paciente".into(),
            ));
        }

        plan.status = PlanStatus::InProgress;
        plan.appointment_id = Some(appointment.id.clone());
        db.update_planned_treatment(&plan)?;
        info!(plan_id = %plan.id, %appointment_id, "Planned treatment linked");
        Ok(plan)
    }

    pub fn cancel_plan(&self, plan_id: &str) -> ClinicalResult<PlannedTreatment> {
        self.db.atomic(|db| {
            let mut plan = self.load_plan(db, plan_id)?;
            match plan.status {
                PlanStatus::Completed => {
                    return Err(ClinicalError::InvalidState(
                        "No se puede cancelar un tratamiento ya completado".into(),
                    ))
                }
                PlanStatus::Cancelled => {
                    warn!(%plan_id, "Plan already cancelled");
                    return Ok(plan);
                }
                PlanStatus::Planned | PlanStatus::InProgress => {}
            }

            plan.status = PlanStatus::Cancelled;
            plan.appointment_id = None;
            db.update_planned_treatment(&plan)?;
            info!(%plan_id, "Planned treatment cancelled");
            Ok(plan)
        })
    }

    pub fn plans(&self, patient_id: &str, status: Option<PlanStatus>) -> ClinicalResult<Vec<PlannedTreatment>> {
        Ok(self.db.list_planned_treatments(patient_id, status)?)
    }

    fn load_plan(&self, db: &Database, id: &str) -> ClinicalResult<PlannedTreatment> {
        db.get_planned_treatment(id)?
            .ok_or_else(|| ClinicalError::NotFound(format!("Tratamiento planificado no encontrado con ID: {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventoryError, MovementRequest};
    use crate::models::{Appointment, AppointmentStatus, MovementKind, Procedure, Supply, ToothState};
    use crate::test_support::{at, clinic, monday, Clinic};

    fn appointment(db: &Database, c: &Clinic) -> Appointment {
        let appt = Appointment::new(
            c.patient.id.clone(),
            c.dentist.id.clone(),
            c.procedure.id.clone(),
            at(monday(), 9, 0),
            30,
        );
        db.insert_appointment(&appt).unwrap();
        appt
    }

    fn stocked(db: &Database, code: &str, qty: i64) -> Supply {
        let supply = Supply::new(code.into(), format!("Insumo {}", code), "unidad".into());
        db.insert_supply(&supply).unwrap();
        Stock::new(db)
            .register_movement(MovementRequest::new(
                supply.id.clone(),
                MovementKind::Inbound,
                "Compra",
                Decimal::from(qty),
            ))
            .unwrap();
        supply
    }

    fn request(appt: &Appointment, procedure_id: &str) -> PerformedRequest {
        PerformedRequest {
            appointment_id: appt.id.clone(),
            procedure_id: procedure_id.to_string(),
            dentist_id: appt.dentist_id.clone(),
            teeth: None,
            description: Some("Trabajo realizado".into()),
            performed_at: appt.start,
            adjusted_supply: None,
        }
    }

    #[test]
    fn test_register_deducts_updates_chart_and_completes_plan() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let appt = appointment(&db, &c);

        let filling = Procedure::new("OBT-001".into(), "Obturación con resina".into(), Decimal::from(150), 45);
        db.insert_procedure(&filling).unwrap();
        let resin = stocked(&db, "RES-01", 5);
        db.set_procedure_supply(&filling.id, &resin.id, Decimal::from(2)).unwrap();

        let treatments = Treatments::new(&db);
        let plan = treatments
            .plan(&PlanRequest {
                patient_id: c.patient.id.clone(),
                procedure_id: filling.id.clone(),
                dentist_id: None,
                teeth: Some("26".into()),
                description: None,
                planned_for: None,
                appointment_id: Some(appt.id.clone()),
            })
            .unwrap();
        assert_eq!(plan.status, PlanStatus::InProgress);

        let mut req = request(&appt, &filling.id);
        req.teeth = Some("26".into());
        let treatment = treatments.register_performed(&req).unwrap();

        assert_eq!(db.get_supply(&resin.id).unwrap().unwrap().current_stock, Decimal::from(3));
        assert_eq!(
            db.get_tooth_record(&c.patient.id, 26).unwrap().unwrap().state,
            ToothState::Restored
        );
        let plan = db.get_planned_treatment(&plan.id).unwrap().unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(plan.performed_treatment_id.as_deref(), Some(treatment.id.as_str()));
        assert_eq!(treatments.for_appointment(&appt.id).unwrap().len(), 1);
    }

    #[test]
    fn test_adjusted_supply_replaces_defaults() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let appt = appointment(&db, &c);
        let default_supply = stocked(&db, "GUA-01", 10);
        let adjusted = stocked(&db, "GUA-02", 10);
        db.set_procedure_supply(&c.procedure.id, &default_supply.id, Decimal::ONE).unwrap();

        let mut req = request(&appt, &c.procedure.id);
        req.adjusted_supply = Some((adjusted.id.clone(), Decimal::from(4)));
        let treatment = Treatments::new(&db).register_performed(&req).unwrap();

        assert_eq!(treatment.adjusted_quantity, Some(Decimal::from(4)));
        assert_eq!(db.get_supply(&adjusted.id).unwrap().unwrap().current_stock, Decimal::from(6));
        assert_eq!(db.get_supply(&default_supply.id).unwrap().unwrap().current_stock, Decimal::from(10));

        req.adjusted_supply = Some((adjusted.id.clone(), Decimal::ZERO));
        assert!(matches!(
            Treatments::new(&db).register_performed(&req),
            Err(ClinicalError::Validation(_))
        ));
    }

    #[test]
    fn test_shortage_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let appt = appointment(&db, &c);
        let supply = stocked(&db, "ANE-01", 1);

        let mut req = request(&appt, &c.procedure.id);
        req.adjusted_supply = Some((supply.id.clone(), Decimal::from(2)));
        let err = Treatments::new(&db).register_performed(&req).unwrap_err();

        assert!(matches!(err, ClinicalError::Inventory(InventoryError::InsufficientStock { .. })));
        assert!(db.list_treatments_for_appointment(&appt.id).unwrap().is_empty());
    }

    #[test]
    fn test_non_dentist_rejected() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let appt = appointment(&db, &c);
        let receptionist = crate::models::User::new("Ana Paz".into(), "ana@clinic.pe".into());
        db.insert_user(&receptionist).unwrap();

        let mut req = request(&appt, &c.procedure.id);
        req.dentist_id = receptionist.id.clone();
        assert!(matches!(
            Treatments::new(&db).register_performed(&req),
            Err(ClinicalError::Validation(_))
        ));
    }

    #[test]
    fn test_link_and_cancel_plan() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let appt = appointment(&db, &c);
        let treatments = Treatments::new(&db);

        let plan = treatments
            .plan(&PlanRequest {
                patient_id: c.patient.id.clone(),
                procedure_id: c.procedure.id.clone(),
                dentist_id: Some(c.dentist.id.clone()),
                teeth: None,
                description: Some("Profilaxis".into()),
                planned_for: Some(monday()),
                appointment_id: None,
            })
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Planned);

        let linked = treatments.link_to_appointment(&plan.id, &appt.id).unwrap();
        assert_eq!(linked.status, PlanStatus::InProgress);
        assert!(treatments.link_to_appointment(&plan.id, &appt.id).is_err());

        let cancelled = treatments.cancel_plan(&plan.id).unwrap();
        assert_eq!(cancelled.status, PlanStatus::Cancelled);
        assert!(cancelled.appointment_id.is_none());
        assert_eq!(treatments.plans(&c.patient.id, Some(PlanStatus::Cancelled)).unwrap().len(), 1);
    }

    #[test]
    fn test_link_rejects_cancelled_appointment() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let mut appt = appointment(&db, &c);
        appt.status = AppointmentStatus::CancelledByClinic;
        db.update_appointment(&appt).unwrap();

        let treatments = Treatments::new(&db);
        let plan = treatments
            .plan(&PlanRequest {
                patient_id: c.patient.id.clone(),
                procedure_id: c.procedure.id.clone(),
                dentist_id: None,
                teeth: None,
                description: None,
                planned_for: None,
                appointment_id: None,
            })
            .unwrap();

        assert!(matches!(
            treatments.link_to_appointment(&plan.id, &appt.id),
            Err(ClinicalError::InvalidState(_))
        ));
    }
}
