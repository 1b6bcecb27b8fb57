//! Patient-facing chat assistant.
//!
//! Each question is answered from a context block assembled from the store:
//! the patient's profile, upcoming appointments, recent treatments and
//! pending invoices, followed by the clinic catalog (services, dentists,
//! appointment states, payment methods) and the usage guide. The assistant
//! backend never sees anything else.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use odonto_assistant::{build_prompt, fallback_reply, weekday_name, Assistant, USAGE_GUIDE};

use crate::db::{Database, DbError};
use crate::models::{AppointmentStatus, ChatMessage, Patient, PaymentMethod, ROLE_DENTIST};

pub const DEFAULT_HISTORY_LIMIT: u32 = 10;

const UPCOMING_LIMIT: u32 = 5;
const RECENT_TREATMENTS_LIMIT: u32 = 5;
const DATE_TIME_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Reply when the asking patient cannot be resolved.
pub const REPLY_UNKNOWN_PATIENT: &str = "No se pudo identificar al paciente.";
/// Reply when the question could not be processed at all.
pub const REPLY_ON_ERROR: &str =
    "Ocurrió un error al procesar tu mensaje. Por favor, intenta nuevamente.";

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("{0}")]
    UnknownPatient(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Answer handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    /// Stored transcript entry, `None` when nothing was saved
    pub message_id: Option<String>,
    pub success: bool,
}

impl ChatReply {
    fn error(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            message_id: None,
            success: false,
        }
    }
}

pub struct Chatbot<'a> {
    db: &'a Database,
    assistant: &'a dyn Assistant,
    history_limit: u32,
    now: Option<NaiveDateTime>,
}

impl<'a> Chatbot<'a> {
    pub fn new(db: &'a Database, assistant: &'a dyn Assistant) -> Self {
        Self {
            db,
            assistant,
            history_limit: DEFAULT_HISTORY_LIMIT,
            now: None,
        }
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> NaiveDateTime {
        self.now
            .unwrap_or_else(|| chrono::Local::now().naive_local())
    }

    /// Answer a patient's question and store the exchange.
    ///
    /// Never fails: problems are turned into a fixed reply for the patient.
    pub fn ask(&self, patient_id: &str, question: &str) -> ChatReply {
        match self.try_ask(patient_id, question) {
            Ok(reply) => reply,
            Err(ChatError::UnknownPatient(id)) => {
                warn!(patient_id = %id, "Chat from unknown patient");
                ChatReply::error(REPLY_UNKNOWN_PATIENT)
            }
            Err(e) => {
                error!(%patient_id, error = %e, "Chat message failed");
                ChatReply::error(REPLY_ON_ERROR)
            }
        }
    }

    /// Same as [`ask`](Self::ask) for the portal account linked to a patient.
    pub fn ask_as_user(&self, user_id: &str, question: &str) -> ChatReply {
        match self.db.get_patient_by_user(user_id) {
            Ok(Some(patient)) => self.ask(&patient.id, question),
            Ok(None) => {
                warn!(%user_id, "Chat from account without patient record");
                ChatReply::error(REPLY_UNKNOWN_PATIENT)
            }
            Err(e) => {
                error!(%user_id, error = %e, "Chat message failed");
                ChatReply::error(REPLY_ON_ERROR)
            }
        }
    }

    fn try_ask(&self, patient_id: &str, question: &str) -> ChatResult<ChatReply> {
        let patient = self
            .db
            .get_patient(patient_id)?
            .ok_or_else(|| ChatError::UnknownPatient(patient_id.to_string()))?;

        let context = self.context(&patient)?;
        let prompt = build_prompt(&context, question);

        let reply = match self.assistant.generate(&prompt) {
            Ok(text) => text,
            Err(e) => {
                error!(patient_id = %patient.id, error = %e, "Assistant call failed");
                fallback_reply(&e).to_string()
            }
        };

        let message = ChatMessage::new(patient.id.clone(), question.to_string(), reply, self.now());
        self.db.insert_chat_message(&message)?;
        info!(patient_id = %patient.id, message_id = %message.id, "Chat message answered");

        Ok(ChatReply {
            reply: message.bot_reply,
            message_id: Some(message.id),
            success: true,
        })
    }

    /// Latest messages, newest first.
    pub fn history(&self, patient_id: &str) -> ChatResult<Vec<ChatMessage>> {
        Ok(self.db.recent_chat_messages(patient_id, self.history_limit)?)
    }

    pub fn clear_history(&self, patient_id: &str) -> ChatResult<usize> {
        let cleared = self.db.clear_chat_history(patient_id)?;
        info!(%patient_id, cleared, "Chat history cleared");
        Ok(cleared)
    }

    /// The full context block for one patient.
    pub fn context(&self, patient: &Patient) -> ChatResult<String> {
        let mut out = self.patient_section(patient)?;

        match self.services_section() {
            Ok(section) => out.push_str(&section),
            Err(e) => {
                warn!(error = %e, "Could not load services for chat context");
                out.push_str("=== SERVICIOS/PROCEDIMIENTOS DISPONIBLES ===\n");
                out.push_str("No se pudieron cargar los servicios disponibles.\n\n");
            }
        }
        match self.dentists_section() {
            Ok(section) => out.push_str(&section),
            Err(e) => {
                warn!(error = %e, "Could not load dentists for chat context");
                out.push_str("=== ODONTÓLOGOS DISPONIBLES ===\n");
                out.push_str("No se pudieron cargar los odontólogos disponibles.\n\n");
            }
        }

        out.push_str("=== ESTADOS DE CITAS ===\n");
        for status in AppointmentStatus::ALL {
            let _ = writeln!(out, "• {}: {}", status.as_str(), status.description());
        }
        out.push('\n');

        out.push_str("=== MÉTODOS DE PAGO DISPONIBLES ===\n");
        for method in PaymentMethod::ALL {
            let _ = writeln!(out, "• {}: {}", method.as_str(), method.description());
        }
        out.push('\n');

        out.push_str(USAGE_GUIDE);
        Ok(out)
    }

    fn patient_section(&self, patient: &Patient) -> ChatResult<String> {
        let mut out = String::from("=== INFORMACIÓN DEL PACIENTE ===\n");
        let _ = writeln!(out, "- Nombre: {}", patient.full_name);
        if let Some(email) = &patient.email {
            let _ = writeln!(out, "- Email: {}", email);
        }
        if let Some(phone) = patient.phone.as_deref().filter(|p| !p.is_empty()) {
            let _ = writeln!(out, "- Teléfono: {}", phone);
        }
        if let Some(allergies) = patient.allergies.as_deref().filter(|a| !a.is_empty()) {
            let _ = writeln!(out, "- Alergias: {}", allergies);
        }
        if let Some(history) = patient.medical_history.as_deref().filter(|h| !h.is_empty()) {
            let _ = writeln!(out, "- Antecedentes médicos: {}", history);
        }

        let upcoming = self
            .db
            .upcoming_appointments(&patient.id, self.now(), UPCOMING_LIMIT)?;
        if upcoming.is_empty() {
            out.push_str("\nNo tienes citas próximas programadas.\n");
        } else {
            out.push_str("\n--- Citas Próximas ---\n");
            for appt in &upcoming {
                let dentist = self
                    .db
                    .get_user(&appt.dentist_id)?
                    .map(|u| u.full_name)
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "• {} con Dr(a). {}\n  Motivo: {}\n  Estado: {}",
                    appt.start.format(DATE_TIME_FORMAT),
                    dentist,
                    appt.reason.as_deref().unwrap_or("Consulta general"),
                    appt.status.as_str()
                );
            }
        }

        let treatments = self
            .db
            .recent_treatments(&patient.id, RECENT_TREATMENTS_LIMIT)?;
        if treatments.is_empty() {
            out.push_str("\nNo tienes tratamientos registrados aún.\n");
        } else {
            out.push_str("\n--- Tratamientos Recientes ---\n");
            for treatment in &treatments {
                let name = self
                    .db
                    .get_procedure(&treatment.procedure_id)?
                    .map(|p| p.name)
                    .unwrap_or_else(|| "Tratamiento".to_string());
                let _ = writeln!(out, "• {}: {}", treatment.performed_at.format(DATE_TIME_FORMAT), name);
            }
        }

        let pending = self.db.pending_invoices_for_patient(&patient.id)?;
        if pending.is_empty() {
            out.push_str("\nNo tienes comprobantes pendientes de pago.\n");
        } else {
            out.push_str("\n--- Comprobantes Pendientes de Pago ---\n");
            for invoice in &pending {
                let _ = writeln!(
                    out,
                    "• Comprobante #{}: S/ {:.2} de S/ {:.2}",
                    invoice.number, invoice.pending, invoice.total
                );
            }
        }

        out.push('\n');
        Ok(out)
    }

    fn services_section(&self) -> ChatResult<String> {
        let mut by_category: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for procedure in self.db.list_procedures(true)? {
            let category = procedure
                .category
                .clone()
                .unwrap_or_else(|| "General".to_string());
            by_category.entry(category).or_default().push(procedure);
        }

        let mut out = String::from("=== SERVICIOS/PROCEDIMIENTOS DISPONIBLES ===\n");
        for (category, procedures) in by_category {
            let _ = writeln!(out, "\n--- {} ---", category);
            for procedure in procedures {
                let _ = write!(
                    out,
                    "• {} - S/ {:.2} ({} min)",
                    procedure.name, procedure.base_price, procedure.duration_minutes
                );
                if let Some(description) = procedure.description.as_deref().filter(|d| !d.is_empty()) {
                    let _ = write!(out, "\n  {}", description);
                }
                out.push('\n');
            }
        }
        out.push('\n');
        Ok(out)
    }

    fn dentists_section(&self) -> ChatResult<String> {
        let dentists = self.db.list_users_with_role(ROLE_DENTIST, true)?;

        let mut out = String::from("=== ODONTÓLOGOS DISPONIBLES ===\n");
        if dentists.is_empty() {
            out.push_str("No hay odontólogos disponibles en este momento.\n");
        }
        for dentist in &dentists {
            let _ = write!(out, "• Dr(a). {}", dentist.full_name);
            if let Some(phone) = dentist.phone.as_deref().filter(|p| !p.is_empty()) {
                let _ = write!(out, " - Tel: {}", phone);
            }
            if !dentist.weekly_schedule.is_empty() {
                out.push_str("\n  Horarios de atención:\n");
                for (day, hours) in dentist.weekly_schedule.iter() {
                    let _ = writeln!(out, "  - {}: {}", weekday_name(day.num_days_from_monday()), hours);
                }
            }
            out.push('\n');
        }
        out.push('\n');
        Ok(out)
    }
}
