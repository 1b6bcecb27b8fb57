//! Login accounts and authentication.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use super::password::{generate_password, hash_password, validate_strength, verify_password};
use super::{tokens, AccessError, AccessResult, Principal, SessionRegistry};
use crate::config::SecurityConfig;
use crate::db::{Database, DbError};
use crate::models::{Page, PageRequest, User, WeeklySchedule};

/// Account form. `id` set means edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountForm {
    pub id: Option<String>,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    /// Required on create, optional on edit
    pub password: Option<String>,
    pub roles: Vec<String>,
    pub valid_until: Option<NaiveDate>,
    pub weekly_schedule: Option<WeeklySchedule>,
}

/// Account service.
pub struct Accounts<'a> {
    db: &'a Database,
    security: SecurityConfig,
    sessions: Option<&'a SessionRegistry>,
    now: Option<NaiveDateTime>,
}

impl<'a> Accounts<'a> {
    pub fn new(db: &'a Database, security: &SecurityConfig) -> Self {
        Self {
            db,
            security: security.clone(),
            sessions: None,
            now: None,
        }
    }

    /// Expire sessions through this registry when grants change.
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

    fn is_primary_admin(&self, user: &User) -> bool {
        user.email.eq_ignore_ascii_case(&self.security.primary_admin_email)
    }

    fn expire_sessions(&self, email: &str) {
        if let Some(sessions) = self.sessions {
            sessions.expire_for_user(email);
        }
    }

    fn load(&self, id: &str) -> AccessResult<User> {
        self.db
            .get_user(id)?
            .ok_or_else(|| AccessError::NotFound(format!("Usuario no encontrado con ID: {}", id)))
    }

    pub fn get(&self, id: &str) -> AccessResult<User> {
        self.load(id)
    }

    /// Create or edit an account.
    pub fn save(&self, form: &AccountForm) -> AccessResult<User> {
        let full_name = form.full_name.trim();
        let email = form.email.trim().to_lowercase();
        if full_name.is_empty() {
            return Err(AccessError::Validation("El nombre completo es obligatorio.".into()));
        }
        if !email.contains('@') {
            return Err(AccessError::Validation(format!("El email no es válido: {}", form.email)));
        }
        let password = form.password.as_deref().filter(|p| !p.is_empty());
        if let Some(password) = password {
            validate_strength(password)?;
        }
        let roles: Vec<String> = form.roles.iter().map(|r| r.trim().to_uppercase()).collect();

        self.db
            .atomic(|db| {
                let user_id = match &form.id {
                    None => {
                        let password = password.ok_or_else(|| {
                            AccessError::Validation("La contraseña es obligatoria para nuevos usuarios.".into())
                        })?;
                        let mut user = User::new(full_name.to_string(), email.clone());
                        user.phone = form.phone.clone();
                        user.valid_until = form.valid_until;
                        user.roles = roles.clone();
                        if let Some(schedule) = &form.weekly_schedule {
                            user.weekly_schedule = schedule.clone();
                        }
                        user.password_hash = Some(hash_password(password)?);
                        db.insert_user(&user)?;
                        info!(user_id = %user.id, email = %user.email, "Account created");
                        user.id
                    }
                    Some(id) => {
                        let mut user = self.load(id)?;
                        let previous_email = user.email.clone();
                        user.full_name = full_name.to_string();
                        user.email = email.clone();
                        user.phone = form.phone.clone();
                        user.valid_until = form.valid_until;
                        if let Some(schedule) = &form.weekly_schedule {
                            user.weekly_schedule = schedule.clone();
                        }
                        db.update_user(&user)?;

                        if let Some(password) = password {
                            db.set_password_hash(&user.id, &hash_password(password)?, false)?;
                        }

                        let mut old_roles = user.roles.clone();
                        let mut new_roles = roles.clone();
                        old_roles.sort();
                        new_roles.sort();
                        new_roles.dedup();
                        if old_roles != new_roles {
                            db.set_user_roles_by_name(&user.id, &new_roles)?;
                            self.expire_sessions(&previous_email);
                            info!(user_id = %user.id, roles = ?new_roles, "Account roles changed");
                        }
                        info!(user_id = %user.id, "Account updated");
                        user.id
                    }
                };
                self.load(&user_id)
            })
            .map_err(|e| match e {
                AccessError::Database(DbError::Constraint(_)) => {
                    AccessError::Conflict(format!("Ya existe un usuario con el email {}", email))
                }
                AccessError::Database(DbError::NotFound(what)) => {
                    AccessError::Validation(format!("Rol no encontrado: {}", what.trim_start_matches("role ")))
                }
                other => other,
            })
    }

    /// Search by name or email; an empty keyword lists everyone.
    pub fn search(&self, keyword: &str, page: PageRequest) -> AccessResult<Page<User>> {
        Ok(self.db.search_users(keyword, page)?)
    }

    /// Flip the active flag. The primary administrator cannot be toggled.
    pub fn toggle_active(&self, id: &str) -> AccessResult<User> {
        let user = self.load(id)?;
        if self.is_primary_admin(&user) {
            return Err(AccessError::Forbidden(
                "No se puede cambiar el estado del administrador principal.".into(),
            ));
        }

        let active = !user.active;
        self.db.set_user_active(&user.id, active)?;
        if !active {
            self.expire_sessions(&user.email);
        }
        info!(user_id = %user.id, active, "Account state toggled");
        self.load(id)
    }

    /// Soft delete the account and the patient record linked to it.
    pub fn delete(&self, id: &str) -> AccessResult<()> {
        let user = self.load(id)?;
        if self.is_primary_admin(&user) {
            return Err(AccessError::Forbidden(
                "No se puede eliminar al administrador principal.".into(),
            ));
        }

        self.db.atomic(|db| {
            if let Some(patient) = db.get_patient_by_user(&user.id)? {
                db.soft_delete_patient(&patient.id)?;
                info!(patient_id = %patient.id, "Linked patient deleted");
            }
            db.soft_delete_user(&user.id)?;
            Ok::<_, AccessError>(())
        })?;

        self.expire_sessions(&user.email);
        info!(user_id = %user.id, "Account deleted");
        Ok(())
    }

    /// Check credentials and apply the lockout policy.
    pub fn authenticate(&self, email: &str, password: &str) -> AccessResult<Principal> {
        let now = self.now();
        let Some(user) = self.db.get_user_by_email(email)? else {
            warn!(%email, "Login with unknown email");
            return Err(AccessError::InvalidCredentials);
        };

        let mut failed_attempts = user.failed_attempts;
        if let Some(locked_at) = user.locked_at {
            if user.is_locked(now, self.security.lockout_minutes) {
                let remaining = (locked_at + Duration::minutes(self.security.lockout_minutes) - now)
                    .num_minutes()
                    .max(1);
                warn!(user_id = %user.id, "Login while locked");
                return Err(AccessError::Locked { minutes: remaining });
            }
            self.db.reset_login_state(&user.id)?;
            failed_attempts = 0;
            info!(user_id = %user.id, "Lock expired");
        }

        if !user.active || user.is_expired(now.date()) {
            warn!(user_id = %user.id, "Login to disabled account");
            return Err(AccessError::Disabled);
        }

        let valid = user
            .password_hash
            .as_deref()
            .map(|hash| verify_password(password, hash))
            .unwrap_or(false);
        if !valid {
            failed_attempts += 1;
            let locked_at = (failed_attempts >= self.security.max_failed_attempts).then_some(now);
            self.db.record_login_failure(&user.id, failed_attempts, locked_at)?;
            if locked_at.is_some() {
                warn!(user_id = %user.id, failed_attempts, "Account locked");
            } else {
                warn!(user_id = %user.id, failed_attempts, "Login failed");
            }
            return Err(AccessError::InvalidCredentials);
        }

        if failed_attempts > 0 {
            self.db.reset_login_state(&user.id)?;
        }

        let principal = Principal {
            user_id: user.id.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            roles: self.db.user_role_names(&user.id)?,
            permissions: self.db.user_authorities(&user.id)?,
            must_change_password: user.must_change_password,
        };
        info!(user_id = %user.id, "Login succeeded");
        Ok(principal)
    }

    /// Issue an activation/reset token. The raw value is returned once.
    pub fn issue_token(&self, user_id: &str) -> AccessResult<String> {
        let user = self.load(user_id)?;
        let (token, hash) = tokens::issue();
        let expires_at = self.now() + Duration::hours(self.security.token_ttl_hours);
        self.db.set_user_token(&user.id, &hash, expires_at)?;
        info!(user_id = %user.id, %expires_at, "Token issued");
        Ok(token)
    }

    /// Set a new password with a token; activates the account and clears any lock.
    pub fn consume_token(&self, token: &str, new_password: &str) -> AccessResult<User> {
        validate_strength(new_password)?;

        let user = self
            .db
            .get_user_by_token_hash(&tokens::digest(token), self.now())?
            .ok_or_else(|| AccessError::NotFound("El enlace es inválido o ha expirado.".into()))?;

        self.db.atomic(|db| {
            db.set_password_hash(&user.id, &hash_password(new_password)?, false)?;
            db.reset_login_state(&user.id)?;
            if !user.active {
                db.set_user_active(&user.id, true)?;
            }
            Ok::<_, AccessError>(())
        })?;

        info!(user_id = %user.id, "Password set with token");
        self.load(&user.id)
    }

    /// Replace the password with a generated one the user must change at next login.
    pub fn reset_password(&self, user_id: &str) -> AccessResult<String> {
        let user = self.load(user_id)?;
        let password = generate_password(self.security.generated_password_length);
        self.db.set_password_hash(&user.id, &hash_password(&password)?, true)?;
        self.db.reset_login_state(&user.id)?;
        self.expire_sessions(&user.email);
        info!(user_id = %user.id, "Temporary password generated");
        Ok(password)
    }

    /// Change a password after checking the current one.
    pub fn change_password(&self, user_id: &str, current: &str, new_password: &str) -> AccessResult<()> {
        let user = self.load(user_id)?;
        let matches = user
            .password_hash
            .as_deref()
            .map(|hash| verify_password(current, hash))
            .unwrap_or(false);
        if !matches {
            return Err(AccessError::Validation("La contraseña actual es incorrecta.".into()));
        }
        if current == new_password {
            return Err(AccessError::Validation(
                "La nueva contraseña debe ser diferente a la actual.".into(),
            ));
        }
        validate_strength(new_password)?;

        self.db.set_password_hash(&user.id, &hash_password(new_password)?, false)?;
        info!(user_id = %user.id, "Password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Patient, ROLE_ADMIN, ROLE_DENTIST, ROLE_RECEPTIONIST};
    use crate::test_support::{at, monday};

    const PASSWORD: &str = "Dental#2031";

    fn form(email: &str, roles: &[&str]) -> AccountForm {
        AccountForm {
            full_name: "Mario Quispe".into(),
            email: email.into(),
            password: Some(PASSWORD.into()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    fn accounts(db: &Database) -> Accounts<'_> {
        Accounts::new(db, &SecurityConfig::default()).at(at(monday(), 9, 0))
    }

    #[test]
    fn test_create_requires_password() {
        let db = Database::open_in_memory().unwrap();
        let mut f = form("mario@clinic.pe", &[ROLE_DENTIST]);
        f.password = None;

        let err = accounts(&db).save(&f).unwrap_err();
        assert_eq!(err.to_string(), "La contraseña es obligatoria para nuevos usuarios.");

        f.password = Some("corta".into());
        assert!(matches!(accounts(&db).save(&f), Err(AccessError::Validation(_))));
    }

    #[test]
    fn test_create_and_duplicate_email() {
        let db = Database::open_in_memory().unwrap();
        let user = accounts(&db).save(&form("Mario@Clinic.pe", &["odontologo"])).unwrap();
        assert_eq!(user.email, "mario@clinic.pe");
        assert_eq!(user.roles, vec![ROLE_DENTIST.to_string()]);

        let err = accounts(&db).save(&form("mario@clinic.pe", &[])).unwrap_err();
        assert!(matches!(err, AccessError::Conflict(_)));

        let err = accounts(&db).save(&form("otro@clinic.pe", &["GERENTE"])).unwrap_err();
        assert_eq!(err.to_string(), "Rol no encontrado: GERENTE");
    }

    #[test]
    fn test_authenticate_returns_authorities() {
        let db = Database::open_in_memory().unwrap();
        accounts(&db).save(&form("recep@clinic.pe", &[ROLE_RECEPTIONIST])).unwrap();

        let principal = accounts(&db).authenticate("recep@clinic.pe", PASSWORD).unwrap();
        assert_eq!(principal.roles, vec![ROLE_RECEPTIONIST.to_string()]);
        assert!(principal.has_authority("CREAR_FACTURACION"));
        assert!(principal.has_authority("ROLE_RECEPCIONISTA"));
        assert!(!principal.has_authority("ELIMINAR_USUARIOS"));
    }

    #[test]
    fn test_lockout_after_five_failures() {
        let db = Database::open_in_memory().unwrap();
        let user = accounts(&db).save(&form("mario@clinic.pe", &[ROLE_DENTIST])).unwrap();

        for _ in 0..4 {
            assert!(matches!(
                accounts(&db).authenticate("mario@clinic.pe", "Wrong#2031"),
                Err(AccessError::InvalidCredentials)
            ));
        }
        assert_eq!(db.get_user(&user.id).unwrap().unwrap().failed_attempts, 4);
        accounts(&db).authenticate("mario@clinic.pe", "Wrong#2031").unwrap_err();

        // Locked even with the right password
        let err = accounts(&db).authenticate("mario@clinic.pe", PASSWORD).unwrap_err();
        assert!(matches!(err, AccessError::Locked { minutes: 15 }));

        // Lock window elapsed
        let later = Accounts::new(&db, &SecurityConfig::default()).at(at(monday(), 9, 16));
        later.authenticate("mario@clinic.pe", PASSWORD).unwrap();
        let stored = db.get_user(&user.id).unwrap().unwrap();
        assert_eq!(stored.failed_attempts, 0);
        assert!(stored.locked_at.is_none());
    }

    #[test]
    fn test_inactive_and_expired_accounts_disabled() {
        let db = Database::open_in_memory().unwrap();
        let user = accounts(&db).save(&form("mario@clinic.pe", &[ROLE_DENTIST])).unwrap();
        accounts(&db).toggle_active(&user.id).unwrap();
        assert!(matches!(
            accounts(&db).authenticate("mario@clinic.pe", PASSWORD),
            Err(AccessError::Disabled)
        ));

        let mut expiring = form("temp@clinic.pe", &[ROLE_DENTIST]);
        expiring.valid_until = Some(monday().pred_opt().unwrap());
        accounts(&db).save(&expiring).unwrap();
        assert!(matches!(
            accounts(&db).authenticate("temp@clinic.pe", PASSWORD),
            Err(AccessError::Disabled)
        ));
    }

    #[test]
    fn test_primary_admin_protected() {
        let db = Database::open_in_memory().unwrap();
        let admin = accounts(&db).save(&form("admin@odontoapp.com", &[ROLE_ADMIN])).unwrap();

        assert!(matches!(accounts(&db).toggle_active(&admin.id), Err(AccessError::Forbidden(_))));
        assert!(matches!(accounts(&db).delete(&admin.id), Err(AccessError::Forbidden(_))));
    }

    #[test]
    fn test_role_change_expires_sessions() {
        let db = Database::open_in_memory().unwrap();
        let registry = SessionRegistry::new();
        let service = accounts(&db).with_sessions(&registry);
        let user = service.save(&form("mario@clinic.pe", &[ROLE_DENTIST])).unwrap();

        let principal = service.authenticate("mario@clinic.pe", PASSWORD).unwrap();
        let session = registry.register(&principal, at(monday(), 9, 0));

        // Same roles: session survives
        let mut edit = form("mario@clinic.pe", &[ROLE_DENTIST]);
        edit.id = Some(user.id.clone());
        edit.password = None;
        service.save(&edit).unwrap();
        assert!(registry.is_active(&session));

        edit.roles = vec![ROLE_DENTIST.into(), ROLE_RECEPTIONIST.into()];
        let updated = service.save(&edit).unwrap();
        assert_eq!(updated.roles.len(), 2);
        assert!(!registry.is_active(&session));
    }

    #[test]
    fn test_delete_cascades_to_patient() {
        let db = Database::open_in_memory().unwrap();
        let user = accounts(&db).save(&form("paciente@mail.pe", &["PACIENTE"])).unwrap();
        let mut patient = Patient::new("DNI".into(), "70112233".into(), "Mario Quispe".into());
        patient.user_id = Some(user.id.clone());
        db.insert_patient(&patient).unwrap();

        accounts(&db).delete(&user.id).unwrap();
        assert!(db.get_user(&user.id).unwrap().is_none());
        assert!(db.get_patient(&patient.id).unwrap().is_none());
    }

    #[test]
    fn test_token_flow() {
        let db = Database::open_in_memory().unwrap();
        let user = accounts(&db).save(&form("mario@clinic.pe", &[ROLE_DENTIST])).unwrap();

        let token = accounts(&db).issue_token(&user.id).unwrap();
        assert!(matches!(
            accounts(&db).consume_token(&token, "debil"),
            Err(AccessError::Validation(_))
        ));
        accounts(&db).consume_token(&token, "Nueva#Clave9").unwrap();
        accounts(&db).authenticate("mario@clinic.pe", "Nueva#Clave9").unwrap();

        // Single use
        assert!(matches!(
            accounts(&db).consume_token(&token, "Otra#Clave10"),
            Err(AccessError::NotFound(_))
        ));
    }

    #[test]
    fn test_reset_password_forces_change() {
        let db = Database::open_in_memory().unwrap();
        let user = accounts(&db).save(&form("mario@clinic.pe", &[ROLE_DENTIST])).unwrap();

        let temporary = accounts(&db).reset_password(&user.id).unwrap();
        assert_eq!(temporary.len(), 12);
        let principal = accounts(&db).authenticate("mario@clinic.pe", &temporary).unwrap();
        assert!(principal.must_change_password);

        accounts(&db).change_password(&user.id, &temporary, PASSWORD).unwrap();
        assert!(!accounts(&db).authenticate("mario@clinic.pe", PASSWORD).unwrap().must_change_password);
    }
}
