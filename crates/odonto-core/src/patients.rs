//! Patient records and their portal accounts.
//!
//! Every patient is linked 1:1 to a login account holding the `PACIENTE`
//! role. Staff-created patients get an inactive account plus an activation
//! token; self-registration starts with a placeholder account and completes
//! once the token comes back with the patient's data.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::access::password::{hash_password, validate_strength};
use crate::access::{tokens, AccessError, SessionRegistry};
use crate::config::SecurityConfig;
use crate::db::{Database, DbError};
use crate::models::{Page, PageRequest, Patient, User, ROLE_PATIENT};

/// Name given to a self-registration account until its form is completed.
pub const PENDING_REGISTRATION_NAME: &str = "Paciente Pendiente";

#[derive(Error, Debug)]
pub enum PatientError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidState(String),
}

pub type PatientResult<T> = Result<T, PatientError>;

/// Patient form. `id` set means edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientForm {
    pub id: Option<String>,
    pub document_type: String,
    pub document_number: String,
    pub full_name: String,
    /// Required for staff-created patients; taken from the account on self-registration
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
}

impl PatientForm {
    fn apply(&self, patient: &mut Patient) {
        patient.document_type = self.document_type.trim().to_uppercase();
        patient.document_number = self.document_number.trim().to_string();
        patient.full_name = self.full_name.trim().to_string();
        patient.phone = self.phone.clone();
        patient.birth_date = self.birth_date;
        patient.address = self.address.clone();
        patient.allergies = self.allergies.clone();
        patient.medical_history = self.medical_history.clone();
    }

    fn validate(&self) -> PatientResult<()> {
        if self.full_name.trim().is_empty() {
            return Err(PatientError::Validation("El nombre completo es obligatorio.".into()));
        }
        if self.document_type.trim().is_empty() || self.document_number.trim().is_empty() {
            return Err(PatientError::Validation("El documento de identidad es obligatorio.".into()));
        }
        Ok(())
    }
}

/// Result of saving a patient.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedPatient {
    pub patient: Patient,
    /// Raw activation token, returned once when the account needs (re)activation
    pub activation_token: Option<String>,
}

/// Patient service.
pub struct Patients<'a> {
    db: &'a Database,
    security: SecurityConfig,
    sessions: Option<&'a SessionRegistry>,
    now: Option<NaiveDateTime>,
}

impl<'a> Patients<'a> {
    pub fn new(db: &'a Database, security: &SecurityConfig) -> Self {
        Self {
            db,
            security: security.clone(),
            sessions: None,
            now: None,
        }
    }

    /// Expire the patient's sessions through this registry on delete or email change.
    pub fn with_sessions(mut self, sessions: &'a SessionRegistry) -> Self {
        self.sessions = Some(sessions);
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

    fn expire_sessions(&self, email: &str) {
        if let Some(sessions) = self.sessions {
            sessions.expire_for_user(email);
        }
    }

    fn load(&self, id: &str) -> PatientResult<Patient> {
        self.db
            .get_patient(id)?
            .ok_or_else(|| PatientError::NotFound(format!("Paciente no encontrado con ID: {}", id)))
    }

    pub fn get(&self, id: &str) -> PatientResult<Patient> {
        self.load(id)
    }

    /// Search by name, document number or email; an empty keyword lists everyone.
    pub fn search(&self, keyword: &str, page: PageRequest) -> PatientResult<Page<Patient>> {
        Ok(self.db.search_patients(keyword, page)?)
    }

    pub fn by_document(&self, document_type: &str, document_number: &str) -> PatientResult<Patient> {
        self.db
            .get_patient_by_document(document_type, document_number)?
            .ok_or_else(|| {
                PatientError::NotFound(format!(
                    "Paciente no encontrado con documento: {} {}",
                    document_type.trim().to_uppercase(),
                    document_number.trim()
                ))
            })
    }

    /// Store a fresh token on an account and return its raw value.
    fn issue_token(&self, db: &Database, user_id: &str) -> PatientResult<String> {
        let (token, hash) = tokens::issue();
        let expires_at = self.now() + Duration::hours(self.security.token_ttl_hours);
        db.set_user_token(user_id, &hash, expires_at)?;
        Ok(token)
    }

    /// Insert an inactive `PACIENTE` account and give it an activation token.
    fn create_pending_account(
        &self,
        db: &Database,
        full_name: &str,
        email: &str,
        phone: Option<String>,
    ) -> PatientResult<(User, String)> {
        let mut user = User::new(full_name.to_string(), email.to_string());
        user.phone = phone;
        user.active = false;
        user.roles = vec![ROLE_PATIENT.to_string()];
        db.insert_user(&user)?;
        let token = self.issue_token(db, &user.id)?;
        Ok((user, token))
    }

    /// Reject a document already held by another patient, deleted ones included.
    fn check_document(&self, form: &PatientForm) -> PatientResult<()> {
        let existing = self
            .db
            .find_patient_by_document_any(&form.document_type, &form.document_number)?;
        match existing {
            Some((other, _)) if Some(&other.id) == form.id.as_ref() => Ok(()),
            Some((_, true)) => Err(PatientError::Conflict(format!(
                "El documento {} {} pertenece a un paciente eliminado. Restáurelo en lugar de crear uno nuevo.",
                form.document_type.trim().to_uppercase(),
                form.document_number.trim()
            ))),
            Some(_) => Err(PatientError::Conflict(format!(
                "Ya existe un paciente con el documento {} {}",
                form.document_type.trim().to_uppercase(),
                form.document_number.trim()
            ))),
            None => Ok(()),
        }
    }

    /// Reject an email held by another account or patient, deleted ones included.
    fn check_email(&self, email: &str, patient: Option<&Patient>) -> PatientResult<()> {
        let own_user = patient.and_then(|p| p.user_id.as_deref());
        if let Some((user, _)) = self.db.get_user_by_email_any(email)? {
            if Some(user.id.as_str()) != own_user {
                return Err(PatientError::Conflict(format!("El email {} ya está registrado.", email)));
            }
        }
        if let Some((other, _)) = self.db.find_patient_by_email_any(email)? {
            if Some(other.id.as_str()) != patient.map(|p| p.id.as_str()) {
                return Err(PatientError::Conflict(format!("El email {} ya está registrado.", email)));
            }
        }
        Ok(())
    }

    /// Create or edit a patient.
    ///
    /// A new patient gets an inactive portal account and an activation token.
    /// Changing the email of an existing patient deactivates the account and
    /// issues a new token for the new address.
    pub fn save(&self, form: &PatientForm) -> PatientResult<SavedPatient> {
        form.validate()?;
        let email = form
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| PatientError::Validation("El email es obligatorio.".into()))?;
        if !email.contains('@') {
            return Err(PatientError::Validation(format!("El email no es válido: {}", email)));
        }

        let existing = match &form.id {
            Some(id) => Some(self.load(id)?),
            None => None,
        };
        self.check_document(form)?;
        self.check_email(&email, existing.as_ref())?;

        let (saved, expired_email) = self.db.atomic(|db| match existing {
            None => {
                let (user, token) =
                    self.create_pending_account(db, form.full_name.trim(), &email, form.phone.clone())?;
                let mut patient = Patient::new(
                    form.document_type.clone(),
                    form.document_number.clone(),
                    form.full_name.clone(),
                );
                form.apply(&mut patient);
                patient.email = Some(email.clone());
                patient.user_id = Some(user.id.clone());
                db.insert_patient(&patient)?;
                info!(patient_id = %patient.id, user_id = %user.id, "Patient created");
                Ok::<_, PatientError>((
                    SavedPatient {
                        patient,
                        activation_token: Some(token),
                    },
                    None,
                ))
            }
            Some(mut patient) => {
                let previous_email = patient.email.clone();
                form.apply(&mut patient);
                patient.email = Some(email.clone());

                let account = match &patient.user_id {
                    Some(user_id) => db.get_user(user_id)?,
                    None => None,
                };
                let mut activation_token = None;
                let mut expired_email = None;
                match account {
                    Some(mut user) => {
                        let email_changed = user.email != email;
                        let old_email = user.email.clone();
                        user.full_name = patient.full_name.clone();
                        user.email = email.clone();
                        user.phone = patient.phone.clone();
                        db.update_user(&user)?;
                        if email_changed {
                            db.set_user_active(&user.id, false)?;
                            activation_token = Some(self.issue_token(db, &user.id)?);
                            expired_email = Some(old_email);
                            info!(user_id = %user.id, "Patient email changed, account deactivated");
                        }
                    }
                    None => {
                        let (user, token) = self.create_pending_account(
                            db,
                            &patient.full_name,
                            &email,
                            patient.phone.clone(),
                        )?;
                        patient.user_id = Some(user.id);
                        activation_token = Some(token);
                    }
                }

                db.update_patient(&patient)?;
                info!(
                    patient_id = %patient.id,
                    email_changed = previous_email.as_deref() != Some(email.as_str()),
                    "Patient updated"
                );
                Ok((
                    SavedPatient {
                        patient,
                        activation_token,
                    },
                    expired_email,
                ))
            }
        })
        .map_err(|e| conflict_on_constraint(e, &email))?;

        if let Some(old_email) = expired_email {
            self.expire_sessions(&old_email);
        }
        Ok(saved)
    }

    /// Soft delete a patient.
    ///
    /// Refused while the patient holds pending or confirmed appointments. An
    /// account holding only `PACIENTE` is soft-deleted with it; staff accounts
    /// are only deactivated. Deleting an already deleted patient does nothing.
    pub fn delete(&self, id: &str) -> PatientResult<()> {
        let (patient, deleted) = self
            .db
            .get_patient_any(id)?
            .ok_or_else(|| PatientError::NotFound(format!("Paciente no encontrado con ID: {}", id)))?;
        if deleted {
            info!(patient_id = %id, "Patient already deleted");
            return Ok(());
        }

        let open = self.db.count_open_appointments_for_patient(&patient.id)?;
        if open > 0 {
            warn!(patient_id = %patient.id, open, "Delete refused, patient has active appointments");
            return Err(PatientError::InvalidState(
                "No se puede eliminar el paciente porque tiene citas activas.".into(),
            ));
        }

        let account = self.db.atomic(|db| {
            db.soft_delete_patient(&patient.id)?;
            let account = match &patient.user_id {
                Some(user_id) => db.get_user(user_id)?,
                None => None,
            };
            if let Some(user) = &account {
                if user.roles.iter().all(|r| r == ROLE_PATIENT) {
                    db.soft_delete_user(&user.id)?;
                } else {
                    db.set_user_active(&user.id, false)?;
                }
            }
            Ok::<_, PatientError>(account)
        })?;

        if let Some(user) = account {
            self.expire_sessions(&user.email);
        }
        info!(patient_id = %patient.id, "Patient deleted");
        Ok(())
    }

    /// Restore a deleted patient and reactivate its account.
    pub fn restore(&self, id: &str) -> PatientResult<Patient> {
        let (patient, deleted) = self
            .db
            .get_patient_any(id)?
            .ok_or_else(|| PatientError::NotFound(format!("Paciente no encontrado con ID: {}", id)))?;
        if !deleted {
            return Err(PatientError::InvalidState("El paciente no se encuentra eliminado.".into()));
        }

        self.db
            .atomic(|db| {
                db.restore_patient(&patient.id)?;
                if let Some(user_id) = &patient.user_id {
                    if !db.restore_user(user_id)? {
                        db.set_user_active(user_id, true)?;
                    }
                }
                Ok::<_, PatientError>(())
            })
            .map_err(|e| match e {
                PatientError::Database(DbError::Constraint(_)) => PatientError::Conflict(
                    "No se puede restaurar: otro registro activo usa el mismo documento o email.".into(),
                ),
                other => other,
            })?;

        info!(patient_id = %patient.id, "Patient restored");
        self.load(id)
    }

    /// First step of self-registration: reserve the email and return a token.
    pub fn start_registration(&self, email: &str) -> PatientResult<String> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(PatientError::Validation(format!("El email no es válido: {}", email)));
        }

        match self.db.get_user_by_email_any(&email)? {
            Some((_, true)) => {
                return Err(PatientError::Conflict(
                    "El email pertenece a una cuenta eliminada. Contacte a la clínica para restaurarla.".into(),
                ))
            }
            Some(_) => {
                return Err(PatientError::Conflict(format!("El email {} ya está registrado.", email)))
            }
            None => {}
        }
        if self.db.find_patient_by_email_any(&email)?.is_some() {
            return Err(PatientError::Conflict(format!("El email {} ya está registrado.", email)));
        }

        let (user, token) = self
            .db
            .atomic(|db| self.create_pending_account(db, PENDING_REGISTRATION_NAME, &email, None))
            .map_err(|e| conflict_on_constraint(e, &email))?;
        info!(user_id = %user.id, "Registration started");
        Ok(token)
    }

    /// Second step of self-registration: set the password, activate the
    /// account and create the linked patient.
    pub fn complete_registration(&self, form: &PatientForm, token: &str, password: &str) -> PatientResult<Patient> {
        form.validate()?;
        validate_strength(password)?;

        let user = self
            .db
            .get_user_by_token_hash(&tokens::digest(token), self.now())?
            .ok_or_else(|| PatientError::Validation("Token de registro inválido o ya expirado.".into()))?;
        if user.active {
            return Err(PatientError::InvalidState(
                "La cuenta ya ha sido activada anteriormente.".into(),
            ));
        }

        let registration = PatientForm {
            id: None,
            ..form.clone()
        };
        self.check_document(&registration)?;

        let patient = self
            .db
            .atomic(|db| {
                let mut account = user.clone();
                account.full_name = registration.full_name.trim().to_string();
                account.phone = registration.phone.clone();
                db.update_user(&account)?;
                db.set_password_hash(&account.id, &hash_password(password)?, false)?;
                db.reset_login_state(&account.id)?;
                db.set_user_active(&account.id, true)?;

                let mut patient = Patient::new(
                    registration.document_type.clone(),
                    registration.document_number.clone(),
                    registration.full_name.clone(),
                );
                registration.apply(&mut patient);
                patient.email = Some(account.email.clone());
                patient.user_id = Some(account.id.clone());
                db.insert_patient(&patient)?;
                Ok::<_, PatientError>(patient)
            })
            .map_err(|e| conflict_on_constraint(e, &user.email))?;

        info!(patient_id = %patient.id, user_id = %user.id, "Registration completed");
        Ok(patient)
    }
}

fn conflict_on_constraint(err: PatientError, email: &str) -> PatientError {
    match err {
        PatientError::Database(DbError::Constraint(what)) => {
            warn!(%email, %what, "Patient uniqueness violated");
            PatientError::Conflict(format!("Ya existe un registro con los mismos datos: {}", what))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Accounts, Principal};
    use crate::models::{Appointment, AppointmentStatus, ROLE_RECEPTIONIST};
    use crate::test_support::{at, clinic, monday};

    const PASSWORD: &str = "Sonrisa#2031";

    fn patients(db: &Database) -> Patients<'_> {
        Patients::new(db, &SecurityConfig::default()).at(at(monday(), 9, 0))
    }

    fn form(document: &str, email: &str) -> PatientForm {
        PatientForm {
            document_type: "dni".into(),
            document_number: document.into(),
            full_name: "Rosa Quispe".into(),
            email: Some(email.into()),
            phone: Some("987654321".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_links_inactive_account() {
        let db = Database::open_in_memory().unwrap();
        let saved = patients(&db).save(&form("70011223", "Rosa@Mail.pe")).unwrap();

        let patient = &saved.patient;
        assert_eq!(patient.document_type, "DNI");
        assert_eq!(patient.email.as_deref(), Some("rosa@mail.pe"));

        let user = db.get_user(patient.user_id.as_deref().unwrap()).unwrap().unwrap();
        assert!(!user.active);
        assert_eq!(user.roles, vec![ROLE_PATIENT.to_string()]);

        let token = saved.activation_token.unwrap();
        let activated = Accounts::new(&db, &SecurityConfig::default())
            .at(at(monday(), 10, 0))
            .consume_token(&token, PASSWORD)
            .unwrap();
        assert!(activated.active);
    }

    #[test]
    fn test_create_requires_email() {
        let db = Database::open_in_memory().unwrap();
        let mut f = form("70011223", "");
        assert!(matches!(patients(&db).save(&f), Err(PatientError::Validation(_))));
        f.email = None;
        assert!(matches!(patients(&db).save(&f), Err(PatientError::Validation(_))));
    }

    #[test]
    fn test_duplicate_document_and_email() {
        let db = Database::open_in_memory().unwrap();
        patients(&db).save(&form("70011223", "rosa@mail.pe")).unwrap();

        let err = patients(&db).save(&form("70011223", "otra@mail.pe")).unwrap_err();
        assert!(matches!(err, PatientError::Conflict(_)));

        let err = patients(&db).save(&form("70099999", "ROSA@mail.pe")).unwrap_err();
        assert!(matches!(err, PatientError::Conflict(_)));

        // Staff emails are taken too
        let staff = User::new("Recepción".into(), "recepcion@clinic.pe".into());
        db.insert_user(&staff).unwrap();
        let err = patients(&db).save(&form("70099999", "recepcion@clinic.pe")).unwrap_err();
        assert!(matches!(err, PatientError::Conflict(_)));
    }

    #[test]
    fn test_deleted_document_still_reserved() {
        let db = Database::open_in_memory().unwrap();
        let saved = patients(&db).save(&form("70011223", "rosa@mail.pe")).unwrap();
        patients(&db).delete(&saved.patient.id).unwrap();

        let err = patients(&db).save(&form("70011223", "nueva@mail.pe")).unwrap_err();
        assert!(err.to_string().contains("eliminado"));
    }

    #[test]
    fn test_email_change_reissues_token() {
        let db = Database::open_in_memory().unwrap();
        let registry = SessionRegistry::new();
        let saved = patients(&db).save(&form("70011223", "rosa@mail.pe")).unwrap();
        let user_id = saved.patient.user_id.clone().unwrap();
        Accounts::new(&db, &SecurityConfig::default())
            .at(at(monday(), 9, 5))
            .consume_token(saved.activation_token.as_deref().unwrap(), PASSWORD)
            .unwrap();
        let principal = Principal {
            user_id: user_id.clone(),
            email: "rosa@mail.pe".into(),
            full_name: "Rosa Quispe".into(),
            roles: vec![ROLE_PATIENT.into()],
            permissions: Vec::new(),
            must_change_password: false,
        };
        let session = registry.register(&principal, at(monday(), 9, 5));

        // Same email: account untouched
        let mut edit = form("70011223", "rosa@mail.pe");
        edit.id = Some(saved.patient.id.clone());
        edit.allergies = Some("Penicilina".into());
        let same = patients(&db).with_sessions(&registry).save(&edit).unwrap();
        assert!(same.activation_token.is_none());
        assert!(db.get_user(&user_id).unwrap().unwrap().active);
        assert!(registry.is_active(&session));

        edit.email = Some("rosa.q@mail.pe".into());
        let changed = patients(&db).with_sessions(&registry).save(&edit).unwrap();
        assert!(changed.activation_token.is_some());
        assert_eq!(changed.patient.allergies.as_deref(), Some("Penicilina"));

        let user = db.get_user(&user_id).unwrap().unwrap();
        assert_eq!(user.email, "rosa.q@mail.pe");
        assert!(!user.active);
        assert!(!registry.is_active(&session));
    }

    #[test]
    fn test_delete_blocked_by_active_appointments() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);
        let mut appt = Appointment::new(
            c.patient.id.clone(),
            c.dentist.id.clone(),
            c.procedure.id.clone(),
            at(monday(), 10, 0),
            30,
        );
        db.insert_appointment(&appt).unwrap();

        let err = patients(&db).delete(&c.patient.id).unwrap_err();
        assert!(matches!(err, PatientError::InvalidState(_)));

        appt.status = AppointmentStatus::CancelledByPatient;
        db.update_appointment(&appt).unwrap();
        patients(&db).delete(&c.patient.id).unwrap();
        assert!(db.get_patient(&c.patient.id).unwrap().is_none());

        // Second delete is a no-op
        patients(&db).delete(&c.patient.id).unwrap();
    }

    #[test]
    fn test_delete_patient_only_account_vs_staff_account() {
        let db = Database::open_in_memory().unwrap();
        let saved = patients(&db).save(&form("70011223", "rosa@mail.pe")).unwrap();
        let patient_user = saved.patient.user_id.clone().unwrap();
        patients(&db).delete(&saved.patient.id).unwrap();
        assert!(db.get_user(&patient_user).unwrap().is_none());
        assert!(db.get_user_by_email_any("rosa@mail.pe").unwrap().unwrap().1);

        // A staff member who is also a patient keeps the account, deactivated
        let mut staff = User::new("Mario Díaz".into(), "mario@clinic.pe".into());
        staff.roles = vec![ROLE_RECEPTIONIST.into(), ROLE_PATIENT.into()];
        db.insert_user(&staff).unwrap();
        let mut patient = Patient::new("DNI".into(), "70055555".into(), "Mario Díaz".into());
        patient.user_id = Some(staff.id.clone());
        patient.email = Some(staff.email.clone());
        db.insert_patient(&patient).unwrap();

        patients(&db).delete(&patient.id).unwrap();
        let kept = db.get_user(&staff.id).unwrap().unwrap();
        assert!(!kept.active);
    }

    #[test]
    fn test_restore() {
        let db = Database::open_in_memory().unwrap();
        let saved = patients(&db).save(&form("70011223", "rosa@mail.pe")).unwrap();
        let id = saved.patient.id.clone();
        let user_id = saved.patient.user_id.clone().unwrap();

        let err = patients(&db).restore(&id).unwrap_err();
        assert!(matches!(err, PatientError::InvalidState(_)));

        patients(&db).delete(&id).unwrap();
        let restored = patients(&db).restore(&id).unwrap();
        assert_eq!(restored.id, id);

        let user = db.get_user(&user_id).unwrap().unwrap();
        assert!(user.active);

        assert!(matches!(patients(&db).restore("missing"), Err(PatientError::NotFound(_))));
    }

    #[test]
    fn test_self_registration() {
        let db = Database::open_in_memory().unwrap();
        let token = patients(&db).start_registration("Nuevo@Mail.pe").unwrap();

        let pending = db.get_user_by_email("nuevo@mail.pe").unwrap().unwrap();
        assert_eq!(pending.full_name, PENDING_REGISTRATION_NAME);
        assert!(!pending.active);
        assert_eq!(pending.roles, vec![ROLE_PATIENT.to_string()]);

        let err = patients(&db).start_registration("nuevo@mail.pe").unwrap_err();
        assert!(matches!(err, PatientError::Conflict(_)));

        let mut registration = form("70011223", "ignored@mail.pe");
        registration.birth_date = NaiveDate::from_ymd_opt(1990, 4, 12);

        let err = patients(&db)
            .complete_registration(&registration, "not-a-token", PASSWORD)
            .unwrap_err();
        assert_eq!(err.to_string(), "Token de registro inválido o ya expirado.");

        let patient = patients(&db)
            .complete_registration(&registration, &token, PASSWORD)
            .unwrap();
        assert_eq!(patient.email.as_deref(), Some("nuevo@mail.pe"));
        assert_eq!(patient.user_id.as_deref(), Some(pending.id.as_str()));

        let user = db.get_user(&pending.id).unwrap().unwrap();
        assert!(user.active);
        assert_eq!(user.full_name, "Rosa Quispe");
        Accounts::new(&db, &SecurityConfig::default())
            .authenticate("nuevo@mail.pe", PASSWORD)
            .unwrap();

        // Token was cleared with the password
        assert!(patients(&db)
            .complete_registration(&form("70099999", ""), &token, PASSWORD)
            .is_err());
    }

    #[test]
    fn test_registration_on_active_account() {
        let db = Database::open_in_memory().unwrap();
        let token = patients(&db).start_registration("nuevo@mail.pe").unwrap();
        let pending = db.get_user_by_email("nuevo@mail.pe").unwrap().unwrap();
        db.set_user_active(&pending.id, true).unwrap();

        let err = patients(&db)
            .complete_registration(&form("70011223", ""), &token, PASSWORD)
            .unwrap_err();
        assert_eq!(err.to_string(), "La cuenta ya ha sido activada anteriormente.");
    }

    #[test]
    fn test_registration_expired_token_and_deleted_email() {
        let db = Database::open_in_memory().unwrap();
        let token = patients(&db).start_registration("nuevo@mail.pe").unwrap();

        let late = Patients::new(&db, &SecurityConfig::default()).at(at(monday(), 9, 0) + Duration::hours(25));
        assert!(matches!(
            late.complete_registration(&form("70011223", ""), &token, PASSWORD),
            Err(PatientError::Validation(_))
        ));

        let pending = db.get_user_by_email("nuevo@mail.pe").unwrap().unwrap();
        db.soft_delete_user(&pending.id).unwrap();
        let err = patients(&db).start_registration("nuevo@mail.pe").unwrap_err();
        assert!(err.to_string().contains("eliminada"));
    }

    #[test]
    fn test_registration_document_taken() {
        let db = Database::open_in_memory().unwrap();
        patients(&db).save(&form("70011223", "rosa@mail.pe")).unwrap();
        let token = patients(&db).start_registration("nuevo@mail.pe").unwrap();

        let err = patients(&db)
            .complete_registration(&form("70011223", ""), &token, PASSWORD)
            .unwrap_err();
        assert!(matches!(err, PatientError::Conflict(_)));

        // Nothing was activated
        assert!(!db.get_user_by_email("nuevo@mail.pe").unwrap().unwrap().active);
    }

    #[test]
    fn test_search_and_by_document() {
        let db = Database::open_in_memory().unwrap();
        patients(&db).save(&form("70011223", "rosa@mail.pe")).unwrap();

        assert_eq!(patients(&db).search("quispe", PageRequest::default()).unwrap().total, 1);
        let found = patients(&db).by_document("dni", " 70011223 ").unwrap();
        assert_eq!(found.full_name, "Rosa Quispe");
        assert!(matches!(
            patients(&db).by_document("DNI", "00000000"),
            Err(PatientError::NotFound(_))
        ));
    }
}
