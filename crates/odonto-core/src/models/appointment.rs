//! Appointment models.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{Audit, UnknownVariant};

/// Appointment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    #[serde(rename = "PENDIENTE")]
    Pending,
    #[serde(rename = "CONFIRMADA")]
    Confirmed,
    #[serde(rename = "CANCELADA_PACIENTE")]
    CancelledByPatient,
    #[serde(rename = "CANCELADA_CLINICA")]
    CancelledByClinic,
    #[serde(rename = "ASISTIO")]
    Attended,
    #[serde(rename = "NO_ASISTIO")]
    NoShow,
    #[serde(rename = "REPROGRAMADA")]
    Rescheduled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 7] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::CancelledByPatient,
        AppointmentStatus::CancelledByClinic,
        AppointmentStatus::Attended,
        AppointmentStatus::NoShow,
        AppointmentStatus::Rescheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDIENTE",
            AppointmentStatus::Confirmed => "CONFIRMADA",
            AppointmentStatus::CancelledByPatient => "CANCELADA_PACIENTE",
            AppointmentStatus::CancelledByClinic => "CANCELADA_CLINICA",
            AppointmentStatus::Attended => "ASISTIO",
            AppointmentStatus::NoShow => "NO_ASISTIO",
            AppointmentStatus::Rescheduled => "REPROGRAMADA",
        }
    }

    /// Human description shown to patients.
    pub fn description(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Cita solicitada, pendiente de confirmación",
            AppointmentStatus::Confirmed => "Cita confirmada por la clínica",
            AppointmentStatus::CancelledByPatient => "Cita cancelada por el paciente",
            AppointmentStatus::CancelledByClinic => "Cita cancelada por la clínica",
            AppointmentStatus::Attended => "El paciente asistió a la cita",
            AppointmentStatus::NoShow => "El paciente no asistió a la cita",
            AppointmentStatus::Rescheduled => "La cita fue movida a otra fecha",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::CancelledByPatient | AppointmentStatus::CancelledByClinic
        )
    }

    /// Attendance already recorded.
    pub fn is_attendance_recorded(&self) -> bool {
        matches!(self, AppointmentStatus::Attended | AppointmentStatus::NoShow)
    }

    /// Whether an appointment in this state still occupies the dentist's time.
    pub fn blocks_schedule(&self) -> bool {
        !self.is_cancelled() && *self != AppointmentStatus::Rescheduled
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("appointment status", s))
    }
}

/// A booked slot for one patient with one dentist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub dentist_id: String,
    pub procedure_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    /// Reason for the visit given by the patient
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    /// Replacement appointment when rescheduled
    pub rescheduled_to: Option<String>,
    pub audit: Audit,
}

impl Appointment {
    pub fn new(
        patient_id: String,
        dentist_id: String,
        procedure_id: String,
        start: NaiveDateTime,
        duration_minutes: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            dentist_id,
            procedure_id,
            start,
            end: start + chrono::Duration::minutes(duration_minutes as i64),
            duration_minutes,
            status: AppointmentStatus::Pending,
            reason: None,
            notes: None,
            cancellation_reason: None,
            rescheduled_to: None,
            audit: Audit::now(),
        }
    }

    /// Append a line to the notes.
    pub fn append_note(&mut self, line: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, line),
            _ => line.to_string(),
        });
    }
}

/// Listing filter; every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub dentist_id: Option<String>,
    pub patient_id: Option<String>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}
