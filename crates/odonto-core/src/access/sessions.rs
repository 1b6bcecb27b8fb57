//! In-memory registry of logged-in sessions.
//!
//! Changing a role's permissions or a user's roles expires the affected
//! sessions so the next request has to log in again and pick up the new grants.
//! Expired entries are dropped on the next login; logout removes its own entry.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Principal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    /// Login email
    pub principal: String,
    pub roles: Vec<String>,
    pub authorities: Vec<String>,
    pub started_at: NaiveDateTime,
    pub expired: bool,
}

/// Thread-safe session registry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sessions<T>(&self, f: impl FnOnce(&mut HashMap<String, SessionInfo>) -> T) -> T {
        let mut guard = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Open a session for an authenticated principal and return its id.
    ///
    /// Expired sessions are purged first.
    pub fn register(&self, principal: &Principal, started_at: NaiveDateTime) -> String {
        let session = SessionInfo {
            id: uuid::Uuid::new_v4().to_string(),
            principal: principal.email.clone(),
            roles: principal.roles.clone(),
            authorities: principal.authorities(),
            started_at,
            expired: false,
        };
        let id = session.id.clone();
        self.with_sessions(|s| {
            s.retain(|_, i| !i.expired);
            s.insert(id.clone(), session)
        });
        id
    }

    /// Close a session. Returns whether it was registered.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.with_sessions(|s| s.remove(session_id)).is_some();
        if removed {
            info!(%session_id, "Session closed");
        }
        removed
    }

    /// Registered sessions, expired ones included.
    pub fn len(&self) -> usize {
        self.with_sessions(|s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.with_sessions(|s| s.get(session_id).map(|i| !i.expired).unwrap_or(false))
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.with_sessions(|s| s.get(session_id).cloned())
    }

    /// Live sessions of one principal.
    pub fn sessions_for(&self, email: &str) -> Vec<SessionInfo> {
        self.with_sessions(|s| {
            s.values()
                .filter(|i| !i.expired && i.principal == email)
                .cloned()
                .collect()
        })
    }

    fn expire_where(&self, pred: impl Fn(&SessionInfo) -> bool) -> usize {
        self.with_sessions(|s| {
            let mut count = 0;
            for session in s.values_mut().filter(|i| !i.expired && pred(i)) {
                session.expired = true;
                count += 1;
            }
            count
        })
    }

    /// Expire every session whose principal holds `role`.
    pub fn expire_for_role(&self, role: &str) -> usize {
        let count = self.expire_where(|i| i.roles.iter().any(|r| r == role));
        info!(%role, count, "Sessions expired for role");
        count
    }

    pub fn expire_for_user(&self, email: &str) -> usize {
        let count = self.expire_where(|i| i.principal == email);
        info!(%email, count, "Sessions expired for user");
        count
    }

    pub fn expire_all(&self) -> usize {
        let count = self.expire_where(|_| true);
        info!(count, "All sessions expired");
        count
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) -> usize {
        self.with_sessions(|s| {
            let before = s.len();
            s.retain(|_, i| !i.expired);
            before - s.len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, monday};

    fn principal(email: &str, roles: &[&str]) -> Principal {
        Principal {
            user_id: format!("id-{}", email),
            email: email.to_string(),
            full_name: email.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: vec!["VER_LISTA_CITAS".into()],
            must_change_password: false,
        }
    }

    #[test]
    fn test_expire_for_role() {
        let registry = SessionRegistry::new();
        let now = at(monday(), 8, 0);
        let a = registry.register(&principal("a@x.pe", &["ODONTOLOGO"]), now);
        let b = registry.register(&principal("b@x.pe", &["RECEPCIONISTA"]), now);
        let a2 = registry.register(&principal("a@x.pe", &["ODONTOLOGO"]), now);

        assert_eq!(registry.expire_for_role("ODONTOLOGO"), 2);
        assert!(!registry.is_active(&a));
        assert!(!registry.is_active(&a2));
        assert!(registry.is_active(&b));

        // Already expired sessions are not counted twice
        assert_eq!(registry.expire_for_role("ODONTOLOGO"), 0);
    }

    #[test]
    fn test_expire_for_user_and_all() {
        let registry = SessionRegistry::new();
        let now = at(monday(), 8, 0);
        registry.register(&principal("a@x.pe", &["ADMIN"]), now);
        let b = registry.register(&principal("b@x.pe", &["PACIENTE"]), now);

        assert_eq!(registry.expire_for_user("a@x.pe"), 1);
        assert_eq!(registry.sessions_for("b@x.pe").len(), 1);
        assert_eq!(registry.expire_all(), 1);
        assert!(!registry.is_active(&b));
        assert_eq!(registry.purge_expired(), 2);
        assert!(registry.get(&b).is_none());
    }

    #[test]
    fn test_remove_and_purge_on_register() {
        let registry = SessionRegistry::new();
        let now = at(monday(), 8, 0);
        let a = registry.register(&principal("a@x.pe", &["ADMIN"]), now);
        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(!registry.is_active(&a));

        for _ in 0..1000 {
            registry.register(&principal("b@x.pe", &["PACIENTE"]), now);
        }
        assert_eq!(registry.len(), 1000);
        assert_eq!(registry.expire_all(), 1000);

        // Next login drops the expired entries
        let c = registry.register(&principal("c@x.pe", &["RECEPCIONISTA"]), now);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_active(&c));

        registry.expire_all();
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_session_carries_authorities() {
        let registry = SessionRegistry::new();
        let id = registry.register(&principal("a@x.pe", &["ADMIN"]), at(monday(), 8, 0));
        let info = registry.get(&id).unwrap();
        assert!(info.authorities.contains(&"ROLE_ADMIN".to_string()));
        assert!(info.authorities.contains(&"VER_LISTA_CITAS".to_string()));
    }
}
