//! Appointment scheduling.
//!
//! Availability is computed per dentist and day from the weekly template, any
//! exception stored for the date and the appointments already holding time.
//! Every appointment is followed by a rest buffer during which nothing else can
//! start.
//!
//! ```text
//! exception for date? ──yes──▶ NO_LABORABLE? ──yes──▶ unavailable (reason)
//!        │ no                       │ no
//!        ▼                          ▼
//! weekly template ──────────▶ intervals ──▶ grid slots ──▶ minus busy + buffer
//! ```

mod availability;
mod hours;

pub use availability::*;
pub use hours::*;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SchedulingConfig;
use crate::db::{Database, DbError};
use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, Page, PageRequest, PerformedTreatment,
    PlanStatus, DEFAULT_PROCEDURE_MINUTES,
};

/// Scheduling errors. Messages are shown to clinic staff and patients as-is.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("{0}")]
    NotFound(String),

    #[error("No se puede agendar una cita en el pasado")]
    InPast,

    #[error("El odontólogo no está disponible en ese horario. Recuerde que se requiere un tiempo de buffer de {buffer_minutes} minutos después de cada cita.")]
    Conflict { buffer_minutes: u32 },

    #[error("El odontólogo no está disponible en esta fecha: {0}")]
    DayUnavailable(String),

    #[error("El horario seleccionado está fuera del horario laboral del odontólogo. Por favor seleccione un horario dentro de las horas de atención.")]
    OutsideWorkingHours,

    #[error("{0}")]
    InvalidState(String),
}

pub type SchedulingResult<T> = Result<T, SchedulingError>;

/// Input for a new appointment.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub patient_id: String,
    pub dentist_id: String,
    pub procedure_id: String,
    pub start: NaiveDateTime,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Appointment book for the whole clinic.
pub struct AppointmentBook<'a> {
    db: &'a Database,
    grid: SchedulingConfig,
    now: Option<NaiveDateTime>,
}

impl<'a> AppointmentBook<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_config(db, SchedulingConfig::default())
    }

    pub fn with_config(db: &'a Database, grid: SchedulingConfig) -> Self {
        Self {
            db,
            grid,
            now: None,
        }
    }

    /// Pin the clock used for the past-booking check.
    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> NaiveDateTime {
        self.now
            .unwrap_or_else(|| chrono::Local::now().naive_local())
    }

    /// Slots for one dentist on one date.
    ///
    /// `duration_minutes` of `None` or zero falls back to 30. `exclude` ignores one
    /// appointment, used when moving it.
    pub fn availability(
        &self,
        dentist_id: &str,
        date: NaiveDate,
        duration_minutes: Option<u32>,
        exclude: Option<&str>,
    ) -> SchedulingResult<DayAvailability> {
        let dentist = self
            .db
            .get_user(dentist_id)?
            .ok_or_else(|| SchedulingError::NotFound(format!("Odontólogo no encontrado: {}", dentist_id)))?;

        let duration = duration_minutes
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_PROCEDURE_MINUTES);

        let exception = self.db.get_schedule_exception(dentist_id, date)?;
        let day = resolve_day(&dentist.weekly_schedule, exception.as_ref(), date);

        let mut result = DayAvailability {
            date,
            dentist_id: dentist.id.clone(),
            dentist_name: dentist.full_name.clone(),
            duration_minutes: duration,
            available: false,
            reason: None,
            is_exception: exception.is_some(),
            exception_reason: exception.as_ref().and_then(|e| e.reason.clone()),
            slots: Vec::new(),
        };

        let intervals = match &day {
            DayHours::Off(reason) => {
                result.reason = Some(reason.clone());
                return Ok(result);
            }
            DayHours::Working { .. } => day_intervals(&day),
        };

        let busy = self.busy_periods(dentist_id, date, exclude)?;
        result.slots = generate_slots(date, &intervals, duration, self.grid, &busy);
        result.available = true;

        Ok(result)
    }

    /// Start/end of appointments that can collide with something on `date`.
    fn busy_periods(
        &self,
        dentist_id: &str,
        date: NaiveDate,
        exclude: Option<&str>,
    ) -> SchedulingResult<Vec<(NaiveDateTime, NaiveDateTime)>> {
        let day_start = date.and_time(NaiveTime::MIN);
        let from = day_start - Duration::minutes(self.grid.buffer_minutes as i64);
        let to = day_start + Duration::days(1);

        Ok(self
            .db
            .blocking_appointments(dentist_id, from, to, exclude)?
            .into_iter()
            .map(|a| (a.start, a.end))
            .collect())
    }

    /// Book an appointment. New appointments start CONFIRMADA.
    pub fn book(&self, request: BookingRequest) -> SchedulingResult<Appointment> {
        self.db.atomic(|db| {
            let appointment = self.place(db, &request)?;
            info!(
                appointment_id = %appointment.id,
                dentist_id = %appointment.dentist_id,
                start = %appointment.start,
                "Appointment booked"
            );
            Ok(appointment)
        })
    }

    fn place(&self, db: &Database, request: &BookingRequest) -> SchedulingResult<Appointment> {
        db.get_patient(&request.patient_id)?
            .ok_or_else(|| SchedulingError::NotFound(format!("Paciente no encontrado: {}", request.patient_id)))?;
        let dentist = db
            .get_user(&request.dentist_id)?
            .ok_or_else(|| SchedulingError::NotFound(format!("Odontólogo no encontrado: {}", request.dentist_id)))?;
        let procedure = db
            .get_procedure(&request.procedure_id)?
            .ok_or_else(|| SchedulingError::NotFound(format!("Procedimiento no encontrado: {}", request.procedure_id)))?;

        let duration = procedure.booking_minutes();
        let start = request.start;
        let end = start + Duration::minutes(duration as i64);

        if start < self.now() {
            return Err(SchedulingError::InPast);
        }

        let buffer = self.grid.buffer_minutes;
        let conflicts = db
            .blocking_appointments(&dentist.id, start - Duration::minutes(buffer as i64), end, None)?
            .into_iter()
            .any(|a| overlaps_with_buffer(start, end, a.start, a.end, buffer));
        if conflicts {
            warn!(dentist_id = %dentist.id, %start, "Booking rejected: schedule conflict");
            return Err(SchedulingError::Conflict { buffer_minutes: buffer });
        }

        let exception = db.get_schedule_exception(&dentist.id, start.date())?;
        let day = resolve_day(&dentist.weekly_schedule, exception.as_ref(), start.date());
        if let DayHours::Off(reason) = &day {
            return Err(SchedulingError::DayUnavailable(reason.clone()));
        }

        if !within_working_hours(&day_intervals(&day), start, end) {
            return Err(SchedulingError::OutsideWorkingHours);
        }

        let mut appointment = Appointment::new(
            request.patient_id.clone(),
            dentist.id.clone(),
            procedure.id.clone(),
            start,
            duration,
        );
        appointment.status = AppointmentStatus::Confirmed;
        appointment.reason = request.reason.clone();
        appointment.notes = request.notes.clone();
        db.insert_appointment(&appointment)?;

        Ok(appointment)
    }

    /// Move an appointment to a new start, optionally with another dentist.
    ///
    /// Returns the replacement; the original becomes REPROGRAMADA and points to it.
    /// The original still blocks its slot while the new one is checked, so a
    /// move that overlaps it (buffer included) is a conflict.
    pub fn reschedule(
        &self,
        id: &str,
        new_dentist_id: Option<&str>,
        new_start: NaiveDateTime,
        reason: Option<&str>,
    ) -> SchedulingResult<Appointment> {
        self.db.atomic(|db| {
            let mut original = self.load(db, id)?;

            if original.status.is_attendance_recorded() {
                return Err(SchedulingError::InvalidState(
                    "No se puede reprogramar una cita que ya fue atendida".into(),
                ));
            }
            if original.status == AppointmentStatus::Rescheduled {
                return Err(SchedulingError::InvalidState("Esta cita ya fue reprogramada".into()));
            }

            let request = BookingRequest {
                patient_id: original.patient_id.clone(),
                dentist_id: new_dentist_id.unwrap_or(&original.dentist_id).to_string(),
                procedure_id: original.procedure_id.clone(),
                start: new_start,
                reason: original.reason.clone(),
                notes: Some(format!(
                    "Reprogramación: {}",
                    reason.unwrap_or("Sin motivo especificado")
                )),
            };
            let replacement = self.place(db, &request)?;

            original.status = AppointmentStatus::Rescheduled;
            original.cancellation_reason = reason.map(str::to_string);
            original.rescheduled_to = Some(replacement.id.clone());
            db.update_appointment(&original)?;

            info!(
                original_id = %original.id,
                replacement_id = %replacement.id,
                start = %replacement.start,
                "Appointment rescheduled"
            );
            Ok(replacement)
        })
    }

    /// Cancel on behalf of the patient or the clinic.
    pub fn cancel(&self, id: &str, by_patient: bool, reason: Option<&str>) -> SchedulingResult<Appointment> {
        self.db.atomic(|db| {
            let mut appointment = self.load(db, id)?;

            if appointment.status.is_attendance_recorded() {
                return Err(SchedulingError::InvalidState(
                    "No se puede cancelar una cita que ya fue atendida".into(),
                ));
            }
            if appointment.status.is_cancelled() {
                return Err(SchedulingError::InvalidState("Esta cita ya está cancelada".into()));
            }
            if appointment.status == AppointmentStatus::Rescheduled {
                return Err(SchedulingError::InvalidState("Esta cita ya fue reprogramada".into()));
            }

            appointment.status = if by_patient {
                AppointmentStatus::CancelledByPatient
            } else {
                AppointmentStatus::CancelledByClinic
            };
            appointment.cancellation_reason = reason.map(str::to_string);
            db.update_appointment(&appointment)?;

            self.release_plan(db, &appointment.id)?;

            info!(appointment_id = %appointment.id, status = %appointment.status, "Appointment cancelled");
            Ok(appointment)
        })
    }

    /// PENDIENTE → CONFIRMADA.
    pub fn confirm(&self, id: &str) -> SchedulingResult<Appointment> {
        self.db.atomic(|db| {
            let mut appointment = self.load(db, id)?;
            if appointment.status != AppointmentStatus::Pending {
                return Err(SchedulingError::InvalidState(
                    "Solo se pueden confirmar citas en estado PENDIENTE".into(),
                ));
            }

            appointment.status = AppointmentStatus::Confirmed;
            db.update_appointment(&appointment)?;

            info!(appointment_id = %appointment.id, "Appointment confirmed");
            Ok(appointment)
        })
    }

    /// Record whether the patient showed up.
    ///
    /// An attended appointment always ends up with at least one performed
    /// treatment. Stock is not deducted here.
    pub fn mark_attendance(&self, id: &str, attended: bool, notes: Option<&str>) -> SchedulingResult<Appointment> {
        self.db.atomic(|db| {
            let mut appointment = self.load(db, id)?;
            if !matches!(
                appointment.status,
                AppointmentStatus::Confirmed | AppointmentStatus::Pending
            ) {
                return Err(SchedulingError::InvalidState(
                    "Solo se puede marcar asistencia en citas confirmadas o pendientes".into(),
                ));
            }

            appointment.status = if attended {
                AppointmentStatus::Attended
            } else {
                AppointmentStatus::NoShow
            };
            if let Some(notes) = notes.filter(|n| !n.is_empty()) {
                appointment.append_note(&format!("Asistencia: {}", notes));
            }
            db.update_appointment(&appointment)?;

            if attended {
                if db.list_treatments_for_appointment(&appointment.id)?.is_empty() {
                    let mut treatment = PerformedTreatment::new(
                        appointment.patient_id.clone(),
                        appointment.procedure_id.clone(),
                        appointment.dentist_id.clone(),
                        appointment.start,
                    );
                    treatment.appointment_id = Some(appointment.id.clone());
                    treatment.description = Some(format!(
                        "Tratamiento realizado en cita del {}",
                        appointment.start.date()
                    ));
                    db.insert_performed_treatment(&treatment)?;
                    info!(appointment_id = %appointment.id, treatment_id = %treatment.id, "Minimal performed treatment created");
                }

                if let Some(mut plan) = db.get_plan_for_appointment(&appointment.id)? {
                    if matches!(plan.status, PlanStatus::InProgress | PlanStatus::Planned) {
                        plan.status = PlanStatus::Completed;
                        db.update_planned_treatment(&plan)?;
                        info!(plan_id = %plan.id, "Planned treatment completed");
                    }
                }
            } else {
                self.release_plan(db, &appointment.id)?;
            }

            info!(appointment_id = %appointment.id, status = %appointment.status, "Attendance recorded");
            Ok(appointment)
        })
    }

    /// An EN_CURSO plan tied to the appointment goes back to PLANIFICADO, unlinked.
    fn release_plan(&self, db: &Database, appointment_id: &str) -> SchedulingResult<()> {
        if let Some(mut plan) = db.get_plan_for_appointment(appointment_id)? {
            if plan.status == PlanStatus::InProgress {
                plan.status = PlanStatus::Planned;
                plan.appointment_id = None;
                db.update_planned_treatment(&plan)?;
                info!(plan_id = %plan.id, %appointment_id, "Planned treatment released");
            }
        }
        Ok(())
    }

    fn load(&self, db: &Database, id: &str) -> SchedulingResult<Appointment> {
        db.get_appointment(id)?
            .ok_or_else(|| SchedulingError::NotFound(format!("Cita no encontrada con ID: {}", id)))
    }

    pub fn get(&self, id: &str) -> SchedulingResult<Appointment> {
        self.load(self.db, id)
    }

    /// Appointments holding time between two dates, both inclusive.
    pub fn calendar(&self, from: NaiveDate, to: NaiveDate, dentist_id: Option<&str>) -> SchedulingResult<Vec<Appointment>> {
        let start = from.and_time(NaiveTime::MIN);
        let end = to.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN));
        Ok(self.db.calendar_appointments(start, end, dentist_id)?)
    }

    pub fn list(&self, filter: &AppointmentFilter, page: PageRequest) -> SchedulingResult<Page<Appointment>> {
        Ok(self.db.list_appointments(filter, page)?)
    }

    pub fn by_patient(&self, patient_id: &str, page: PageRequest) -> SchedulingResult<Page<Appointment>> {
        let filter = AppointmentFilter {
            patient_id: Some(patient_id.to_string()),
            ..Default::default()
        };
        self.list(&filter, page)
    }

    /// A dentist's appointments, optionally limited to one day.
    pub fn by_dentist(
        &self,
        dentist_id: &str,
        date: Option<NaiveDate>,
        page: PageRequest,
    ) -> SchedulingResult<Page<Appointment>> {
        let filter = AppointmentFilter {
            dentist_id: Some(dentist_id.to_string()),
            from: date.map(|d| d.and_time(NaiveTime::MIN)),
            to: date.and_then(|d| d.and_hms_opt(23, 59, 59)),
            ..Default::default()
        };
        self.list(&filter, page)
    }
}
