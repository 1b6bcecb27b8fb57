//! Role administration.

use std::collections::BTreeSet;

use tracing::info;

use super::{AccessError, AccessResult, SessionRegistry};
use crate::db::Database;
use crate::models::{Permission, Role};

/// Role form. `id` set means edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleForm {
    pub id: Option<String>,
    pub name: String,
    pub permission_ids: Vec<String>,
}

pub struct Roles<'a> {
    db: &'a Database,
    sessions: Option<&'a SessionRegistry>,
}

impl<'a> Roles<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, sessions: None }
    }

    pub fn with_sessions(mut self, sessions: &'a SessionRegistry) -> Self {
        self.sessions = Some(sessions);
        self
    }

    fn load(&self, id: &str) -> AccessResult<Role> {
        self.db
            .get_role(id)?
            .ok_or_else(|| AccessError::NotFound(format!("Rol no encontrado con ID: {}", id)))
    }

    pub fn get(&self, id: &str) -> AccessResult<Role> {
        self.load(id)
    }

    pub fn list(&self) -> AccessResult<Vec<Role>> {
        Ok(self.db.list_roles()?)
    }

    /// The permission catalog.
    pub fn permissions(&self) -> AccessResult<Vec<Permission>> {
        Ok(self.db.list_permissions()?)
    }

    fn resolve_permissions(&self, ids: &[String]) -> AccessResult<Vec<Permission>> {
        let catalog = self.db.list_permissions()?;
        ids.iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|id| {
                catalog
                    .iter()
                    .find(|p| &p.id == id)
                    .cloned()
                    .ok_or_else(|| AccessError::Validation(format!("Permiso no encontrado: {}", id)))
            })
            .collect()
    }

    /// Create or edit a role. Changing grants expires the sessions of its holders.
    pub fn save(&self, form: &RoleForm) -> AccessResult<Role> {
        let name = form.name.trim().to_uppercase();
        if name.is_empty() {
            return Err(AccessError::Validation("El nombre del rol es obligatorio.".into()));
        }
        if let Some(existing) = self.db.get_role_by_name(&name)? {
            if form.id.as_deref() != Some(existing.id.as_str()) {
                return Err(AccessError::Conflict(format!("El rol '{}' ya existe.", name)));
            }
        }
        let permissions = self.resolve_permissions(&form.permission_ids)?;

        match &form.id {
            None => {
                let mut role = Role::new(&name);
                role.permissions = permissions;
                self.db.atomic(|db| db.insert_role(&role))?;
                info!(role_id = %role.id, name = %role.name, "Role created");
                self.load(&role.id)
            }
            Some(id) => {
                let mut role = self.load(id)?;
                let previous_name = role.name.clone();
                let old: BTreeSet<&str> = role.permissions.iter().map(|p| p.id.as_str()).collect();
                let new: BTreeSet<&str> = permissions.iter().map(|p| p.id.as_str()).collect();
                let grants_changed = old != new;

                if role.is_admin() && name != previous_name {
                    return Err(AccessError::Forbidden("No se puede renombrar el rol ADMIN.".into()));
                }
                role.name = name;

                self.db.atomic(|db| {
                    db.update_role(&role)?;
                    if grants_changed {
                        db.set_role_permissions(&role.id, &permissions)?;
                    }
                    Ok::<_, AccessError>(())
                })?;

                if grants_changed || role.name != previous_name {
                    if let Some(sessions) = self.sessions {
                        sessions.expire_for_role(&previous_name);
                    }
                }
                info!(role_id = %role.id, name = %role.name, grants_changed, "Role updated");
                self.load(id)
            }
        }
    }

    /// Soft delete a role nobody holds. ADMIN cannot be deleted.
    pub fn delete(&self, id: &str) -> AccessResult<()> {
        let role = self.load(id)?;
        if role.is_admin() {
            return Err(AccessError::Forbidden("No se puede eliminar el rol ADMIN.".into()));
        }
        if self.db.count_users_with_role(&role.id)? > 0 {
            return Err(AccessError::Conflict(
                "El rol tiene usuarios asignados y no puede ser eliminado.".into(),
            ));
        }

        self.db.soft_delete_role(&role.id)?;
        info!(role_id = %role.id, name = %role.name, "Role deleted");
        Ok(())
    }

    /// Flip the active flag. A role with holders cannot be deactivated.
    pub fn toggle(&self, id: &str) -> AccessResult<Role> {
        let mut role = self.load(id)?;
        if role.is_admin() {
            return Err(AccessError::Forbidden("No se puede cambiar el estado del rol ADMIN.".into()));
        }
        if role.active && self.db.count_users_with_role(&role.id)? > 0 {
            return Err(AccessError::Conflict(
                "No se puede desactivar un rol que tiene usuarios asignados.".into(),
            ));
        }

        role.active = !role.active;
        self.db.update_role(&role)?;
        info!(role_id = %role.id, active = role.active, "Role state toggled");
        self.load(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccountForm, Accounts};
    use crate::config::SecurityConfig;
    use crate::models::{PermissionAction, PermissionModule, ROLE_ADMIN, ROLE_DENTIST};
    use crate::test_support::{at, monday};

    fn perm_id(module: PermissionModule, action: PermissionAction) -> String {
        Permission::id_for(module, action)
    }

    #[test]
    fn test_create_uppercases_and_rejects_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let roles = Roles::new(&db);

        let role = roles
            .save(&RoleForm {
                name: "  asistente ".into(),
                permission_ids: vec![perm_id(PermissionModule::Citas, PermissionAction::VerLista)],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(role.name, "ASISTENTE");
        assert_eq!(role.permissions.len(), 1);

        let err = roles
            .save(&RoleForm {
                name: "Asistente".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "El rol 'ASISTENTE' ya existe.");
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = Roles::new(&db)
            .save(&RoleForm {
                name: "AUDITOR".into(),
                permission_ids: vec!["perm-volar-citas".into()],
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, AccessError::Validation(_)));
    }

    #[test]
    fn test_admin_protected() {
        let db = Database::open_in_memory().unwrap();
        let roles = Roles::new(&db);
        let admin = db.get_role_by_name(ROLE_ADMIN).unwrap().unwrap();

        assert_eq!(
            roles.delete(&admin.id).unwrap_err().to_string(),
            "No se puede eliminar el rol ADMIN."
        );
        assert_eq!(
            roles.toggle(&admin.id).unwrap_err().to_string(),
            "No se puede cambiar el estado del rol ADMIN."
        );
    }

    #[test]
    fn test_roles_with_holders_cannot_be_deleted_or_disabled() {
        let db = Database::open_in_memory().unwrap();
        let accounts = Accounts::new(&db, &SecurityConfig::default()).at(at(monday(), 9, 0));
        accounts
            .save(&AccountForm {
                full_name: "Dra. Rosa Huamán".into(),
                email: "rosa@clinic.pe".into(),
                password: Some("Dental#2031".into()),
                roles: vec![ROLE_DENTIST.into()],
                ..Default::default()
            })
            .unwrap();

        let roles = Roles::new(&db);
        let dentist = db.get_role_by_name(ROLE_DENTIST).unwrap().unwrap();
        assert_eq!(
            roles.delete(&dentist.id).unwrap_err().to_string(),
            "El rol tiene usuarios asignados y no puede ser eliminado."
        );
        assert_eq!(
            roles.toggle(&dentist.id).unwrap_err().to_string(),
            "No se puede desactivar un rol que tiene usuarios asignados."
        );
    }

    #[test]
    fn test_toggle_and_delete_unused_role() {
        let db = Database::open_in_memory().unwrap();
        let roles = Roles::new(&db);
        let role = roles
            .save(&RoleForm {
                name: "AUDITOR".into(),
                ..Default::default()
            })
            .unwrap();

        assert!(!roles.toggle(&role.id).unwrap().active);
        assert!(roles.toggle(&role.id).unwrap().active);
        roles.delete(&role.id).unwrap();
        assert!(matches!(roles.get(&role.id), Err(AccessError::NotFound(_))));
    }

    #[test]
    fn test_grant_change_expires_holder_sessions() {
        let db = Database::open_in_memory().unwrap();
        let registry = SessionRegistry::new();
        let accounts = Accounts::new(&db, &SecurityConfig::default()).at(at(monday(), 9, 0));
        accounts
            .save(&AccountForm {
                full_name: "Dra. Rosa Huamán".into(),
                email: "rosa@clinic.pe".into(),
                password: Some("Dental#2031".into()),
                roles: vec![ROLE_DENTIST.into()],
                ..Default::default()
            })
            .unwrap();
        let principal = accounts.authenticate("rosa@clinic.pe", "Dental#2031").unwrap();
        let session = registry.register(&principal, at(monday(), 9, 0));

        let roles = Roles::new(&db).with_sessions(&registry);
        let dentist = db.get_role_by_name(ROLE_DENTIST).unwrap().unwrap();
        let same: Vec<String> = dentist.permissions.iter().map(|p| p.id.clone()).collect();

        roles
            .save(&RoleForm {
                id: Some(dentist.id.clone()),
                name: ROLE_DENTIST.into(),
                permission_ids: same.clone(),
            })
            .unwrap();
        assert!(registry.is_active(&session));

        let mut fewer = same;
        fewer.retain(|id| id != &perm_id(PermissionModule::Inventario, PermissionAction::VerLista));
        let updated = roles
            .save(&RoleForm {
                id: Some(dentist.id.clone()),
                name: ROLE_DENTIST.into(),
                permission_ids: fewer,
            })
            .unwrap();
        assert_eq!(updated.permissions.len(), dentist.permissions.len() - 1);
        assert!(!registry.is_active(&session));

        let principal = accounts.authenticate("rosa@clinic.pe", "Dental#2031").unwrap();
        assert!(!principal.has_authority("VER_LISTA_INVENTARIO"));
    }
}
