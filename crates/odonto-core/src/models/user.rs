//! Users, roles and permissions.

use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{Audit, UnknownVariant, WeeklySchedule};

pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_DENTIST: &str = "ODONTOLOGO";
pub const ROLE_RECEPTIONIST: &str = "RECEPCIONISTA";
pub const ROLE_PATIENT: &str = "PACIENTE";

/// Application areas guarded by permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionModule {
    Usuarios,
    Roles,
    Pacientes,
    Citas,
    Servicios,
    Facturacion,
    Inventario,
    Tratamientos,
    Odontograma,
}

impl PermissionModule {
    pub const ALL: [PermissionModule; 9] = [
        PermissionModule::Usuarios,
        PermissionModule::Roles,
        PermissionModule::Pacientes,
        PermissionModule::Citas,
        PermissionModule::Servicios,
        PermissionModule::Facturacion,
        PermissionModule::Inventario,
        PermissionModule::Tratamientos,
        PermissionModule::Odontograma,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionModule::Usuarios => "USUARIOS",
            PermissionModule::Roles => "ROLES",
            PermissionModule::Pacientes => "PACIENTES",
            PermissionModule::Citas => "CITAS",
            PermissionModule::Servicios => "SERVICIOS",
            PermissionModule::Facturacion => "FACTURACION",
            PermissionModule::Inventario => "INVENTARIO",
            PermissionModule::Tratamientos => "TRATAMIENTOS",
            PermissionModule::Odontograma => "ODONTOGRAMA",
        }
    }
}

impl FromStr for PermissionModule {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionModule::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("permission module", s))
    }
}

/// Operations a permission grants within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionAction {
    VerLista,
    VerDetalle,
    Crear,
    Editar,
    Eliminar,
}

impl PermissionAction {
    pub const ALL: [PermissionAction; 5] = [
        PermissionAction::VerLista,
        PermissionAction::VerDetalle,
        PermissionAction::Crear,
        PermissionAction::Editar,
        PermissionAction::Eliminar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionAction::VerLista => "VER_LISTA",
            PermissionAction::VerDetalle => "VER_DETALLE",
            PermissionAction::Crear => "CREAR",
            PermissionAction::Editar => "EDITAR",
            PermissionAction::Eliminar => "ELIMINAR",
        }
    }
}

impl FromStr for PermissionAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("permission action", s))
    }
}

/// A single grant, e.g. `CREAR` on `CITAS`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Permission {
    pub id: String,
    pub module: PermissionModule,
    pub action: PermissionAction,
}

impl Permission {
    /// Stable id so seeding is idempotent.
    pub fn id_for(module: PermissionModule, action: PermissionAction) -> String {
        format!("perm-{}-{}", action.as_str(), module.as_str()).to_lowercase()
    }

    pub fn new(module: PermissionModule, action: PermissionAction) -> Self {
        Self {
            id: Self::id_for(module, action),
            module,
            action,
        }
    }

    /// Authority string checked by callers, `ACTION_MODULE`.
    pub fn authority(&self) -> String {
        format!("{}_{}", self.action.as_str(), self.module.as_str())
    }
}

/// A named bundle of permissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub id: String,
    /// Always stored uppercase
    pub name: String,
    pub active: bool,
    pub permissions: Vec<Permission>,
    pub audit: Audit,
}

impl Role {
    pub fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_uppercase(),
            active: true,
            permissions: Vec::new(),
            audit: Audit::now(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.name == ROLE_ADMIN
    }
}

/// A login account. Staff and patients alike.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub full_name: String,
    /// Unique login name
    pub email: String,
    pub phone: Option<String>,
    /// Argon2 PHC string, `None` until the account is activated
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub active: bool,
    pub failed_attempts: u32,
    pub locked_at: Option<NaiveDateTime>,
    /// Account expires after this date
    pub valid_until: Option<NaiveDate>,
    pub must_change_password: bool,
    pub weekly_schedule: WeeklySchedule,
    /// Role names
    pub roles: Vec<String>,
    pub audit: Audit,
}

impl User {
    pub fn new(full_name: String, email: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            full_name,
            email: email.trim().to_lowercase(),
            phone: None,
            password_hash: None,
            active: true,
            failed_attempts: 0,
            locked_at: None,
            valid_until: None,
            must_change_password: false,
            weekly_schedule: WeeklySchedule::new(),
            roles: Vec::new(),
            audit: Audit::now(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the lockout window is still open at `now`.
    pub fn is_locked(&self, now: NaiveDateTime, lockout_minutes: i64) -> bool {
        self.locked_at
            .map(|at| now < at + Duration::minutes(lockout_minutes))
            .unwrap_or(false)
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.valid_until.map(|d| d < today).unwrap_or(false)
    }
}
