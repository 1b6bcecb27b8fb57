//! Role-based access control: accounts, login, roles and sessions.
//!
//! ```text
//!   authenticate(email, pw) ──► Principal { roles, permissions }
//!                                   │
//!                                   ▼
//!                           SessionRegistry::register
//!                                   ▲
//!   Roles::save (grants changed) ───┤ expire_for_role
//!   Accounts::save (roles changed) ─┘ expire_for_user
//! ```

mod accounts;
pub mod password;
mod roles;
mod sessions;
pub mod tokens;

pub use accounts::*;
pub use roles::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbError;

/// Access control errors.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Credenciales inválidas")]
    InvalidCredentials,

    #[error("La cuenta está bloqueada temporalmente. Intente nuevamente en {minutes} minutos")]
    Locked { minutes: i64 },

    #[error("La cuenta está deshabilitada")]
    Disabled,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    /// Operation forbidden by a protection rule
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),
}

pub type AccessResult<T> = Result<T, AccessError>;

/// An authenticated user with everything a session needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub roles: Vec<String>,
    /// Permission authorities, e.g. `VER_LISTA_CITAS`
    pub permissions: Vec<String>,
    pub must_change_password: bool,
}

impl Principal {
    /// `ROLE_<name>` for each role followed by the permission authorities.
    pub fn authorities(&self) -> Vec<String> {
        self.roles
            .iter()
            .map(|r| format!("ROLE_{}", r))
            .chain(self.permissions.iter().cloned())
            .collect()
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.permissions.iter().any(|p| p == authority)
            || authority
                .strip_prefix("ROLE_")
                .is_some_and(|role| self.roles.iter().any(|r| r == role))
    }
}
