//! OdontoCore Library
//!
//! Local-first core for a dental clinic: patients, appointment scheduling,
//! billing and inventory, odontogram tracking, role-based access control and
//! a patient chat assistant.
//!
//! # Architecture
//!
//! ```text
//!   Weekly template + exception calendar
//!                  │
//!                  ▼
//!        Availability / booking ──► Appointment ──► Treatment performed
//!        (buffer-aware conflicts)        │                 │
//!                                        │          ┌──────┴───────┐
//!                                        ▼          ▼              ▼
//!                                     Invoice   Stock deduction  Odontogram
//!                                        │
//!                                        ▼
//!                                    Payments / void (restock)
//!
//!   Roles ──► permissions ──► sessions (expired when grants change)
//! ```
//!
//! # Modules
//!
//! - [`db`]: SQLite store with soft delete and audit columns
//! - [`models`]: Domain types (Patient, Appointment, Invoice, Supply, etc.)
//! - [`patients`]: Patient records, portal accounts, self-registration
//! - [`scheduling`]: Slot generation, booking, rescheduling, attendance
//! - [`billing`]: Invoices, payments, voiding, export
//! - [`inventory`]: Stock movements and low-stock alerts
//! - [`clinical`]: Odontogram and treatments
//! - [`access`]: Accounts, login lockout, roles, sessions
//! - [`chatbot`]: Context assembly for the assistant
//! - [`stats`]: Dashboard figures
//! - [`jobs`]: Account expiry and backups

pub mod access;
pub mod billing;
pub mod chatbot;
pub mod clinical;
pub mod config;
pub mod db;
pub mod inventory;
pub mod jobs;
pub mod models;
pub mod patients;
pub mod scheduling;
pub mod search;
pub mod stats;
pub mod telemetry;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use access::{Accounts, Principal, Roles, SessionRegistry};
pub use billing::Billing;
pub use chatbot::Chatbot;
pub use clinical::{Odontogram, Treatments};
pub use config::Config;
pub use db::Database;
pub use inventory::Stock;
pub use patients::Patients;
pub use scheduling::AppointmentBook;
pub use stats::Dashboard;

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
#[cfg(feature = "gemini")]
use tracing::warn;

use odonto_assistant::{Assistant, Unconfigured};

use crate::models::{Appointment, Invoice, Patient, PaymentMethod, Supply, ToothRecord, ToothState};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum OdontoError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Rejected by a business rule; the message is user facing
    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    AuthError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<db::DbError> for OdontoError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => OdontoError::NotFound(what),
            other => OdontoError::DatabaseError(other.to_string()),
        }
    }
}

impl From<scheduling::SchedulingError> for OdontoError {
    fn from(e: scheduling::SchedulingError) -> Self {
        use scheduling::SchedulingError as E;
        match e {
            E::Database(e) => e.into(),
            E::NotFound(msg) => OdontoError::NotFound(msg),
            other => OdontoError::Rejected(other.to_string()),
        }
    }
}

impl From<inventory::InventoryError> for OdontoError {
    fn from(e: inventory::InventoryError) -> Self {
        use inventory::InventoryError as E;
        match e {
            E::Database(e) => e.into(),
            E::NotFound(msg) => OdontoError::NotFound(msg),
            E::Validation(msg) => OdontoError::InvalidInput(msg),
            other => OdontoError::Rejected(other.to_string()),
        }
    }
}

impl From<billing::BillingError> for OdontoError {
    fn from(e: billing::BillingError) -> Self {
        use billing::BillingError as E;
        match e {
            E::Database(e) => e.into(),
            E::Inventory(e) => e.into(),
            E::NotFound(msg) => OdontoError::NotFound(msg),
            E::Validation(msg) => OdontoError::InvalidInput(msg),
            other => OdontoError::Rejected(other.to_string()),
        }
    }
}

impl From<clinical::ClinicalError> for OdontoError {
    fn from(e: clinical::ClinicalError) -> Self {
        use clinical::ClinicalError as E;
        match e {
            E::Database(e) => e.into(),
            E::Inventory(e) => e.into(),
            E::NotFound(msg) => OdontoError::NotFound(msg),
            E::Validation(msg) => OdontoError::InvalidInput(msg),
            other => OdontoError::Rejected(other.to_string()),
        }
    }
}

impl From<access::AccessError> for OdontoError {
    fn from(e: access::AccessError) -> Self {
        use access::AccessError as E;
        match e {
            E::Database(e) => e.into(),
            E::NotFound(msg) => OdontoError::NotFound(msg),
            E::Validation(msg) => OdontoError::InvalidInput(msg),
            e @ (E::InvalidCredentials | E::Locked { .. } | E::Disabled) => OdontoError::AuthError(e.to_string()),
            other => OdontoError::Rejected(other.to_string()),
        }
    }
}

impl From<patients::PatientError> for OdontoError {
    fn from(e: patients::PatientError) -> Self {
        use patients::PatientError as E;
        match e {
            E::Database(e) => e.into(),
            E::Access(e) => e.into(),
            E::NotFound(msg) => OdontoError::NotFound(msg),
            E::Validation(msg) => OdontoError::InvalidInput(msg),
            other => OdontoError::Rejected(other.to_string()),
        }
    }
}

impl From<stats::StatsError> for OdontoError {
    fn from(e: stats::StatsError) -> Self {
        match e {
            stats::StatsError::Database(e) => e.into(),
        }
    }
}

impl From<chatbot::ChatError> for OdontoError {
    fn from(e: chatbot::ChatError) -> Self {
        match e {
            chatbot::ChatError::Database(e) => e.into(),
            chatbot::ChatError::UnknownPatient(id) => OdontoError::NotFound(id),
        }
    }
}

impl From<jobs::JobError> for OdontoError {
    fn from(e: jobs::JobError) -> Self {
        match e {
            jobs::JobError::Database(e) => e.into(),
            jobs::JobError::Io(e) => OdontoError::IoError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for OdontoError {
    fn from(e: serde_json::Error) -> Self {
        OdontoError::InvalidInput(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for OdontoError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        OdontoError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, OdontoError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| OdontoError::InvalidInput(format!("fecha '{}': {}", value, e)))
}

fn parse_date_time(value: &str) -> Result<NaiveDateTime, OdontoError> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .map_err(|e| OdontoError::InvalidInput(format!("fecha y hora '{}': {}", value, e)))
}

fn parse_amount(value: &str) -> Result<Decimal, OdontoError> {
    Decimal::from_str(value.trim())
        .map_err(|e| OdontoError::InvalidInput(format!("monto '{}': {}", value, e)))
}

fn parse_code<T>(value: &str) -> Result<T, OdontoError>
where
    T: FromStr<Err = models::UnknownVariant>,
{
    value
        .trim()
        .to_uppercase()
        .parse()
        .map_err(|e: models::UnknownVariant| OdontoError::InvalidInput(e.to_string()))
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path with default settings.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<OdontoCore>, OdontoError> {
    let db = Database::open(&path)?;
    Ok(Arc::new(OdontoCore::assemble(db, Config::default())))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<OdontoCore>, OdontoError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(OdontoCore::assemble(db, Config::default())))
}

/// Load configuration (YAML file and `ODONTO_` variables) and open its database.
#[uniffi::export]
pub fn open_with_config(config_path: Option<String>) -> Result<Arc<OdontoCore>, OdontoError> {
    let config = Config::load(config_path.as_deref().map(std::path::Path::new))
        .map_err(|e| OdontoError::InvalidInput(e.to_string()))?;
    let db = Database::open(&config.database.path)?;
    Ok(Arc::new(OdontoCore::assemble(db, config)))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
#[derive(uniffi::Object)]
pub struct OdontoCore {
    db: Arc<Mutex<Database>>,
    config: Config,
    sessions: SessionRegistry,
    assistant: Box<dyn Assistant>,
}

impl OdontoCore {
    fn assemble(db: Database, config: Config) -> Self {
        let assistant: Box<dyn Assistant> = match config.assistant.gemini_settings() {
            #[cfg(feature = "gemini")]
            Some(settings) => match odonto_assistant::GeminiClient::new(settings) {
                Ok(client) => Box::new(client),
                Err(e) => {
                    warn!(error = %e, "Assistant client unavailable, chat answers with fallback");
                    Box::new(Unconfigured)
                }
            },
            #[cfg(not(feature = "gemini"))]
            Some(_) => Box::new(Unconfigured),
            None => Box::new(Unconfigured),
        };

        Self {
            db: Arc::new(Mutex::new(db)),
            config,
            sessions: SessionRegistry::new(),
            assistant,
        }
    }
}

#[uniffi::export]
impl OdontoCore {
    // =========================================================================
    // Access
    // =========================================================================

    /// Authenticate and open a session.
    pub fn login(&self, email: String, password: String) -> Result<FfiSession, OdontoError> {
        let db = self.db.lock()?;
        let principal = Accounts::new(&db, &self.config.security).authenticate(&email, &password)?;
        let session_id = self
            .sessions
            .register(&principal, chrono::Local::now().naive_local());
        Ok(FfiSession {
            session_id,
            user_id: principal.user_id.clone(),
            full_name: principal.full_name.clone(),
            roles: principal.roles.clone(),
            authorities: principal.authorities(),
            must_change_password: principal.must_change_password,
        })
    }

    pub fn is_session_active(&self, session_id: String) -> bool {
        self.sessions.is_active(&session_id)
    }

    /// Close a session. Returns whether it existed.
    pub fn logout(&self, session_id: String) -> bool {
        self.sessions.remove(&session_id)
    }

    /// Record who is acting for the audit columns.
    pub fn set_actor(&self, email: Option<String>) -> Result<(), OdontoError> {
        let mut db = self.db.lock()?;
        db.set_actor(email);
        Ok(())
    }

    /// Issue an activation/reset token for a user.
    pub fn issue_token(&self, user_id: String) -> Result<String, OdontoError> {
        let db = self.db.lock()?;
        Ok(Accounts::new(&db, &self.config.security).issue_token(&user_id)?)
    }

    /// Set a password with a token.
    pub fn consume_token(&self, token: String, new_password: String) -> Result<(), OdontoError> {
        let db = self.db.lock()?;
        Accounts::new(&db, &self.config.security)
            .with_sessions(&self.sessions)
            .consume_token(&token, &new_password)?;
        Ok(())
    }

    /// Replace a user's roles. Open sessions of that user are expired.
    pub fn set_user_roles(&self, user_id: String, roles: Vec<String>) -> Result<(), OdontoError> {
        let db = self.db.lock()?;
        let accounts = Accounts::new(&db, &self.config.security).with_sessions(&self.sessions);
        let user = accounts.get(&user_id)?;
        accounts.save(&access::AccountForm {
            id: Some(user.id),
            full_name: user.full_name,
            email: user.email,
            phone: user.phone,
            password: None,
            roles,
            valid_until: user.valid_until,
            weekly_schedule: None,
        })?;
        Ok(())
    }

    /// Replace a role's permissions. Sessions holding the role are expired.
    pub fn set_role_permissions(&self, role_id: String, permission_ids: Vec<String>) -> Result<(), OdontoError> {
        let db = self.db.lock()?;
        let roles = Roles::new(&db).with_sessions(&self.sessions);
        let role = roles.get(&role_id)?;
        roles.save(&access::RoleForm {
            id: Some(role.id),
            name: role.name,
            permission_ids,
        })?;
        Ok(())
    }

    // =========================================================================
    // Patients
    // =========================================================================

    /// Create or edit a patient. New patients and email changes return an activation token.
    pub fn save_patient(&self, form: FfiPatientForm) -> Result<FfiSavedPatient, OdontoError> {
        let db = self.db.lock()?;
        let form = form.into_form()?;
        let saved = Patients::new(&db, &self.config.security)
            .with_sessions(&self.sessions)
            .save(&form)?;
        Ok(FfiSavedPatient {
            patient: saved.patient.into(),
            activation_token: saved.activation_token,
        })
    }

    pub fn create_patient(&self, form: FfiPatientForm) -> Result<FfiSavedPatient, OdontoError> {
        if form.id.is_some() {
            return Err(OdontoError::InvalidInput("un paciente nuevo no lleva ID".into()));
        }
        self.save_patient(form)
    }

    pub fn get_patient(&self, patient_id: String) -> Result<FfiPatient, OdontoError> {
        let db = self.db.lock()?;
        Ok(Patients::new(&db, &self.config.security).get(&patient_id)?.into())
    }

    pub fn search_patients(&self, keyword: String, page: u32, size: u32) -> Result<FfiPatientPage, OdontoError> {
        let db = self.db.lock()?;
        let found = Patients::new(&db, &self.config.security).search(&keyword, models::PageRequest::new(page, size))?;
        Ok(FfiPatientPage {
            total: found.total,
            page: found.page,
            size: found.size,
            patients: found.items.into_iter().map(|p| p.into()).collect(),
        })
    }

    pub fn delete_patient(&self, patient_id: String) -> Result<(), OdontoError> {
        let db = self.db.lock()?;
        Patients::new(&db, &self.config.security)
            .with_sessions(&self.sessions)
            .delete(&patient_id)?;
        Ok(())
    }

    pub fn restore_patient(&self, patient_id: String) -> Result<FfiPatient, OdontoError> {
        let db = self.db.lock()?;
        Ok(Patients::new(&db, &self.config.security).restore(&patient_id)?.into())
    }

    /// Reserve an email for self-registration. Returns the registration token.
    pub fn start_registration(&self, email: String) -> Result<String, OdontoError> {
        let db = self.db.lock()?;
        Ok(Patients::new(&db, &self.config.security).start_registration(&email)?)
    }

    pub fn complete_registration(
        &self,
        form: FfiPatientForm,
        token: String,
        password: String,
    ) -> Result<FfiPatient, OdontoError> {
        let db = self.db.lock()?;
        let form = form.into_form()?;
        let patient = Patients::new(&db, &self.config.security).complete_registration(&form, &token, &password)?;
        Ok(patient.into())
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Slots for a dentist on a `YYYY-MM-DD` date.
    pub fn availability(
        &self,
        dentist_id: String,
        date: String,
        duration_minutes: Option<u32>,
    ) -> Result<FfiDayAvailability, OdontoError> {
        let db = self.db.lock()?;
        let day = AppointmentBook::with_config(&db, self.config.scheduling.clone()).availability(
            &dentist_id,
            parse_date(&date)?,
            duration_minutes,
            None,
        )?;
        Ok(day.into())
    }

    pub fn book_appointment(&self, request: FfiBookingRequest) -> Result<FfiAppointment, OdontoError> {
        let db = self.db.lock()?;
        let booking = scheduling::BookingRequest {
            patient_id: request.patient_id,
            dentist_id: request.dentist_id,
            procedure_id: request.procedure_id,
            start: parse_date_time(&request.start)?,
            reason: request.reason,
            notes: request.notes,
        };
        let appointment = AppointmentBook::with_config(&db, self.config.scheduling.clone()).book(booking)?;
        Ok(appointment.into())
    }

    pub fn reschedule_appointment(
        &self,
        appointment_id: String,
        new_start: String,
        new_dentist_id: Option<String>,
        reason: Option<String>,
    ) -> Result<FfiAppointment, OdontoError> {
        let db = self.db.lock()?;
        let replacement = AppointmentBook::with_config(&db, self.config.scheduling.clone()).reschedule(
            &appointment_id,
            new_dentist_id.as_deref(),
            parse_date_time(&new_start)?,
            reason.as_deref(),
        )?;
        Ok(replacement.into())
    }

    pub fn cancel_appointment(
        &self,
        appointment_id: String,
        by_patient: bool,
        reason: Option<String>,
    ) -> Result<FfiAppointment, OdontoError> {
        let db = self.db.lock()?;
        let appointment = AppointmentBook::new(&db).cancel(&appointment_id, by_patient, reason.as_deref())?;
        Ok(appointment.into())
    }

    pub fn confirm_appointment(&self, appointment_id: String) -> Result<FfiAppointment, OdontoError> {
        let db = self.db.lock()?;
        Ok(AppointmentBook::new(&db).confirm(&appointment_id)?.into())
    }

    pub fn mark_attendance(
        &self,
        appointment_id: String,
        attended: bool,
        notes: Option<String>,
    ) -> Result<FfiAppointment, OdontoError> {
        let db = self.db.lock()?;
        let appointment = AppointmentBook::new(&db).mark_attendance(&appointment_id, attended, notes.as_deref())?;
        Ok(appointment.into())
    }

    // =========================================================================
    // Billing
    // =========================================================================

    /// Invoice the procedure of an appointment.
    pub fn invoice_appointment(&self, appointment_id: String) -> Result<FfiInvoice, OdontoError> {
        let db = self.db.lock()?;
        Ok(Billing::new(&db).invoice_from_appointment(&appointment_id, &[])?.into())
    }

    /// Apply a payment. `amount` is a decimal string, `method` a payment method code.
    pub fn register_payment(
        &self,
        invoice_id: String,
        amount: String,
        method: String,
        reference: Option<String>,
    ) -> Result<FfiInvoice, OdontoError> {
        let db = self.db.lock()?;
        let method: PaymentMethod = parse_code(&method)?;
        let mut request = billing::PaymentRequest::new(invoice_id.clone(), parse_amount(&amount)?, method);
        request.reference = reference;

        let billing = Billing::new(&db);
        billing.register_payment(request)?;
        Ok(billing.get(&invoice_id)?.into())
    }

    pub fn void_invoice(&self, invoice_id: String, reason: String) -> Result<FfiInvoice, OdontoError> {
        let db = self.db.lock()?;
        Ok(Billing::new(&db).void_invoice(&invoice_id, &reason)?.into())
    }

    pub fn pending_invoices(&self, patient_id: String) -> Result<Vec<FfiInvoice>, OdontoError> {
        let db = self.db.lock()?;
        let invoices = Billing::new(&db).pending_for_patient(&patient_id)?;
        Ok(invoices.into_iter().map(|i| i.into()).collect())
    }

    /// Invoices issued between two `YYYY-MM-DD` dates (inclusive) as CSV.
    pub fn export_invoices_csv(&self, from: String, to: String) -> Result<String, OdontoError> {
        let db = self.db.lock()?;
        let (from, to) = export_range(&from, &to)?;
        Ok(Billing::new(&db).export(from, to)?.to_csv())
    }

    pub fn export_invoices_json(&self, from: String, to: String) -> Result<String, OdontoError> {
        let db = self.db.lock()?;
        let (from, to) = export_range(&from, &to)?;
        Ok(Billing::new(&db).export(from, to)?.to_json()?)
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    pub fn low_stock(&self) -> Result<Vec<FfiSupply>, OdontoError> {
        let db = self.db.lock()?;
        let supplies = Stock::new(&db).low_stock()?;
        Ok(supplies.into_iter().map(|s| s.into()).collect())
    }

    /// Fuzzy supply lookup by code or name.
    pub fn find_supplies(&self, query: String) -> Result<Vec<FfiSupply>, OdontoError> {
        let db = self.db.lock()?;
        let supplies = Stock::new(&db).find(&query)?;
        Ok(supplies.into_iter().map(|s| s.into()).collect())
    }

    // =========================================================================
    // Clinical
    // =========================================================================

    pub fn odontogram(&self, patient_id: String) -> Result<Vec<FfiTooth>, OdontoError> {
        let db = self.db.lock()?;
        let chart = Odontogram::new(&db).chart(&patient_id)?;
        Ok(chart.into_iter().map(|t| t.into()).collect())
    }

    pub fn update_tooth(
        &self,
        patient_id: String,
        tooth: u8,
        state: String,
        surfaces: Option<String>,
        notes: Option<String>,
    ) -> Result<FfiTooth, OdontoError> {
        let db = self.db.lock()?;
        let state: ToothState = parse_code(&state)?;
        let mut update = clinical::ToothUpdate::new(tooth, state);
        update.surfaces = surfaces;
        update.notes = notes;
        Ok(Odontogram::new(&db).update_tooth(&patient_id, &update, None)?.into())
    }

    // =========================================================================
    // Chat
    // =========================================================================

    pub fn chat(&self, patient_id: String, message: String) -> Result<FfiChatReply, OdontoError> {
        let db = self.db.lock()?;
        let reply = Chatbot::new(&db, self.assistant.as_ref())
            .with_history_limit(self.config.assistant.history_limit)
            .ask(&patient_id, &message);
        Ok(FfiChatReply {
            reply: reply.reply,
            message_id: reply.message_id,
            success: reply.success,
        })
    }

    // =========================================================================
    // Dashboard
    // =========================================================================

    pub fn dashboard_stats(&self) -> Result<FfiClinicStats, OdontoError> {
        let db = self.db.lock()?;
        let stats = Dashboard::new(&db).stats()?;
        Ok(FfiClinicStats {
            appointments_today: stats.appointments_today,
            new_patients_this_month: stats.new_patients_this_month,
            pending_receivables: stats.pending_receivables.to_string(),
            income_this_month: stats.income_this_month.to_string(),
            total_patients: stats.total_patients,
            upcoming: stats.upcoming.into_iter().map(|a| a.into()).collect(),
            low_stock: stats.low_stock.into_iter().map(|s| s.into()).collect(),
        })
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Deactivate accounts past their validity date. Returns how many.
    pub fn deactivate_expired_accounts(&self) -> Result<u32, OdontoError> {
        let db = self.db.lock()?;
        let today = chrono::Local::now().date_naive();
        Ok(jobs::deactivate_expired_accounts(&db, today)? as u32)
    }

    /// Back up into the configured directory. Returns the file path.
    pub fn backup_database(&self) -> Result<String, OdontoError> {
        let db = self.db.lock()?;
        let report = jobs::backup_database(&db, &self.config.backup.dir, chrono::Local::now().naive_local())?;
        Ok(report.path.display().to_string())
    }
}

fn export_range(from: &str, to: &str) -> Result<(NaiveDateTime, NaiveDateTime), OdontoError> {
    let from = parse_date(from)?;
    let to = parse_date(to)?;
    let start = from.and_hms_opt(0, 0, 0).unwrap_or_default();
    let end = to.and_hms_opt(23, 59, 59).unwrap_or_default();
    Ok((start, end))
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe login session.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSession {
    pub session_id: String,
    pub user_id: String,
    pub full_name: String,
    pub roles: Vec<String>,
    pub authorities: Vec<String>,
    pub must_change_password: bool,
}

/// FFI-safe patient form. `birth_date` is `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiPatientForm {
    pub id: Option<String>,
    pub document_type: String,
    pub document_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<String>,
    pub address: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
}

impl FfiPatientForm {
    fn into_form(self) -> Result<patients::PatientForm, OdontoError> {
        Ok(patients::PatientForm {
            id: self.id,
            document_type: self.document_type,
            document_number: self.document_number,
            full_name: self.full_name,
            email: self.email,
            phone: self.phone,
            birth_date: self.birth_date.as_deref().map(parse_date).transpose()?,
            address: self.address,
            allergies: self.allergies,
            medical_history: self.medical_history,
        })
    }
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub user_id: Option<String>,
    pub document_type: String,
    pub document_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<String>,
    pub allergies: Option<String>,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            id: patient.id,
            user_id: patient.user_id,
            document_type: patient.document_type,
            document_number: patient.document_number,
            full_name: patient.full_name,
            email: patient.email,
            phone: patient.phone,
            birth_date: patient.birth_date.map(|d| d.to_string()),
            allergies: patient.allergies,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSavedPatient {
    pub patient: FfiPatient,
    pub activation_token: Option<String>,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatientPage {
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub patients: Vec<FfiPatient>,
}

/// FFI-safe dashboard figures. Amounts are decimal strings.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiClinicStats {
    pub appointments_today: u64,
    pub new_patients_this_month: u64,
    pub pending_receivables: String,
    pub income_this_month: String,
    pub total_patients: u64,
    pub upcoming: Vec<FfiAppointment>,
    pub low_stock: Vec<FfiSupply>,
}

/// FFI-safe booking input. `start` is `YYYY-MM-DDTHH:MM[:SS]`.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBookingRequest {
    pub patient_id: String,
    pub dentist_id: String,
    pub procedure_id: String,
    pub start: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// FFI-safe appointment.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAppointment {
    pub id: String,
    pub patient_id: String,
    pub dentist_id: String,
    pub procedure_id: String,
    pub start: String,
    pub end: String,
    pub status: String,
    pub rescheduled_to: Option<String>,
}

impl From<Appointment> for FfiAppointment {
    fn from(appt: Appointment) -> Self {
        Self {
            id: appt.id,
            patient_id: appt.patient_id,
            dentist_id: appt.dentist_id,
            procedure_id: appt.procedure_id,
            start: appt.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            end: appt.end.format("%Y-%m-%dT%H:%M:%S").to_string(),
            status: appt.status.as_str().to_string(),
            rescheduled_to: appt.rescheduled_to,
        }
    }
}

/// FFI-safe slot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSlot {
    pub start: String,
    pub end: String,
    pub available: bool,
}

/// FFI-safe day availability.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDayAvailability {
    pub date: String,
    pub dentist_name: String,
    pub available: bool,
    pub reason: Option<String>,
    pub is_exception: bool,
    pub slots: Vec<FfiSlot>,
}

impl From<scheduling::DayAvailability> for FfiDayAvailability {
    fn from(day: scheduling::DayAvailability) -> Self {
        Self {
            date: day.date.to_string(),
            dentist_name: day.dentist_name,
            available: day.available,
            reason: day.reason.or(day.exception_reason),
            is_exception: day.is_exception,
            slots: day
                .slots
                .into_iter()
                .map(|s| FfiSlot {
                    start: s.start.format("%H:%M").to_string(),
                    end: s.end.format("%H:%M").to_string(),
                    available: s.available,
                })
                .collect(),
        }
    }
}

/// FFI-safe invoice. Amounts are decimal strings.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiInvoice {
    pub id: String,
    pub number: String,
    pub patient_id: String,
    pub issued_at: String,
    pub total: String,
    pub paid: String,
    pub pending: String,
    pub status: String,
}

impl From<Invoice> for FfiInvoice {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            number: invoice.number,
            patient_id: invoice.patient_id,
            issued_at: invoice.issued_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
            total: invoice.total.to_string(),
            paid: invoice.paid.to_string(),
            pending: invoice.pending.to_string(),
            status: invoice.status.as_str().to_string(),
        }
    }
}

/// FFI-safe supply.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSupply {
    pub id: String,
    pub code: String,
    pub name: String,
    pub unit: String,
    pub current_stock: String,
    pub minimum_stock: String,
}

impl From<Supply> for FfiSupply {
    fn from(supply: Supply) -> Self {
        Self {
            id: supply.id,
            code: supply.code,
            name: supply.name,
            unit: supply.unit,
            current_stock: supply.current_stock.to_string(),
            minimum_stock: supply.minimum_stock.to_string(),
        }
    }
}

/// FFI-safe tooth record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTooth {
    pub tooth: u8,
    pub state: String,
    pub surfaces: Option<String>,
    pub notes: Option<String>,
}

impl From<ToothRecord> for FfiTooth {
    fn from(record: ToothRecord) -> Self {
        Self {
            tooth: record.tooth,
            state: record.state.as_str().to_string(),
            surfaces: record.surfaces,
            notes: record.notes,
        }
    }
}

/// FFI-safe chat reply.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiChatReply {
    pub reply: String,
    pub message_id: Option<String>,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffi_login_and_role_change() {
        let core = open_database_in_memory().unwrap();
        {
            let db = core.db.lock().unwrap();
            Accounts::new(&db, &core.config.security)
                .save(&access::AccountForm {
                    full_name: "Recepción".into(),
                    email: "recep@clinic.pe".into(),
                    password: Some("Recepcion#1".into()),
                    roles: vec!["RECEPCIONISTA".into()],
                    ..Default::default()
                })
                .unwrap();
        }

        let session = core.login("recep@clinic.pe".into(), "Recepcion#1".into()).unwrap();
        assert!(session.authorities.contains(&"ROLE_RECEPCIONISTA".to_string()));
        assert!(core.is_session_active(session.session_id.clone()));

        core.set_user_roles(session.user_id.clone(), vec!["ODONTOLOGO".into()]).unwrap();
        assert!(!core.is_session_active(session.session_id));

        let err = core.login("recep@clinic.pe".into(), "incorrecta".into()).unwrap_err();
        assert!(matches!(err, OdontoError::AuthError(_)));
    }

    #[test]
    fn test_ffi_logout_removes_session() {
        let core = open_database_in_memory().unwrap();
        {
            let db = core.db.lock().unwrap();
            Accounts::new(&db, &core.config.security)
                .save(&access::AccountForm {
                    full_name: "Recepción".into(),
                    email: "recep@clinic.pe".into(),
                    password: Some("Recepcion#1".into()),
                    roles: vec!["RECEPCIONISTA".into()],
                    ..Default::default()
                })
                .unwrap();
        }

        let session = core.login("recep@clinic.pe".into(), "Recepcion#1".into()).unwrap();
        assert!(core.logout(session.session_id.clone()));
        assert!(!core.is_session_active(session.session_id.clone()));
        assert!(!core.logout(session.session_id));
    }

    #[test]
    fn test_ffi_patient_lifecycle() {
        let core = open_database_in_memory().unwrap();
        let saved = core
            .create_patient(FfiPatientForm {
                document_type: "DNI".into(),
                document_number: "70011223".into(),
                full_name: "Rosa Quispe".into(),
                email: Some("rosa@mail.pe".into()),
                birth_date: Some("1990-04-12".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(saved.activation_token.is_some());
        assert_eq!(saved.patient.birth_date.as_deref(), Some("1990-04-12"));

        let id = saved.patient.id.clone();
        assert_eq!(core.get_patient(id.clone()).unwrap().full_name, "Rosa Quispe");
        assert_eq!(core.search_patients("rosa".into(), 0, 20).unwrap().total, 1);

        core.delete_patient(id.clone()).unwrap();
        assert!(matches!(core.get_patient(id.clone()), Err(OdontoError::NotFound(_))));
        assert_eq!(core.search_patients(String::new(), 0, 20).unwrap().total, 0);

        core.restore_patient(id.clone()).unwrap();
        assert_eq!(core.get_patient(id).unwrap().document_number, "70011223");

        let err = core
            .create_patient(FfiPatientForm {
                id: Some("x".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, OdontoError::InvalidInput(_)));
    }

    #[test]
    fn test_ffi_dashboard_on_empty_clinic() {
        let core = open_database_in_memory().unwrap();
        let stats = core.dashboard_stats().unwrap();
        assert_eq!(stats.total_patients, 0);
        assert_eq!(stats.pending_receivables, "0");
        assert!(stats.upcoming.is_empty());
    }

    #[test]
    fn test_ffi_input_parsing() {
        assert!(matches!(parse_date("03/03/2031"), Err(OdontoError::InvalidInput(_))));
        assert_eq!(
            parse_date_time("2031-03-03T10:30").unwrap(),
            NaiveDate::from_ymd_opt(2031, 3, 3).unwrap().and_hms_opt(10, 30, 0).unwrap()
        );
        assert_eq!(parse_amount(" 12.50 ").unwrap(), Decimal::new(1250, 2));
        assert_eq!(parse_code::<PaymentMethod>("yape").unwrap(), PaymentMethod::Yape);
        assert!(parse_code::<ToothState>("ROTO").is_err());
    }

    #[test]
    fn test_ffi_chat_without_api_key() {
        let core = open_database_in_memory().unwrap();
        let reply = core.chat("missing".into(), "hola".into()).unwrap();
        assert!(!reply.success);
        assert_eq!(reply.reply, chatbot::REPLY_UNKNOWN_PATIENT);
    }
}
