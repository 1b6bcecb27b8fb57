//! Role and permission database operations.

use rusqlite::{params, OptionalExtension};

use super::{code_col, timestamp, unique_violation, Database, DbResult};
use crate::models::{
    Permission, PermissionAction, PermissionModule, Role, ROLE_ADMIN, ROLE_DENTIST, ROLE_PATIENT,
    ROLE_RECEPTIONIST,
};

use PermissionAction::*;
use PermissionModule::*;

/// Built-in roles with stable ids and their initial grants.
fn builtin_roles() -> Vec<(&'static str, &'static str, Vec<Permission>)> {
    let all: Vec<Permission> = PermissionModule::ALL
        .into_iter()
        .flat_map(|m| PermissionAction::ALL.into_iter().map(move |a| Permission::new(m, a)))
        .collect();

    let grant = |modules: &[PermissionModule], actions: &[PermissionAction]| -> Vec<Permission> {
        modules
            .iter()
            .flat_map(|m| actions.iter().map(move |a| Permission::new(*m, *a)))
            .collect()
    };

    let mut dentist = grant(
        &[Citas, Pacientes, Tratamientos, Odontograma],
        &[VerLista, VerDetalle, Crear, Editar],
    );
    dentist.extend(grant(&[Servicios, Inventario], &[VerLista, VerDetalle]));

    let mut receptionist = grant(&[Citas, Pacientes, Facturacion], &[VerLista, VerDetalle, Crear, Editar]);
    receptionist.extend(grant(&[Servicios, Inventario], &[VerLista, VerDetalle]));

    let patient = grant(&[Citas], &[VerLista, VerDetalle, Crear]);

    vec![
        ("role-admin", ROLE_ADMIN, all),
        ("role-odontologo", ROLE_DENTIST, dentist),
        ("role-recepcionista", ROLE_RECEPTIONIST, receptionist),
        ("role-paciente", ROLE_PATIENT, patient),
    ]
}

impl Database {
    /// Insert the permission catalog and built-in roles. Safe to run on every open.
    ///
    /// Grants of existing non-admin roles are left alone; ADMIN always ends up
    /// holding every permission.
    pub(crate) fn seed_reference_data(&self) -> DbResult<()> {
        for module in PermissionModule::ALL {
            for action in PermissionAction::ALL {
                let perm = Permission::new(module, action);
                self.conn.execute(
                    "INSERT OR IGNORE INTO permissions (id, module, action) VALUES (?1, ?2, ?3)",
                    params![perm.id, module.as_str(), action.as_str()],
                )?;
            }
        }

        let now = timestamp();
        for (id, name, permissions) in builtin_roles() {
            let inserted = self.conn.execute(
                r#"
                INSERT OR IGNORE INTO roles (id, name, active, created_at, updated_at)
                VALUES (?1, ?2, 1, ?3, ?3)
                "#,
                params![id, name, now],
            )?;

            if inserted > 0 || name == ROLE_ADMIN {
                for perm in permissions {
                    self.conn.execute(
                        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
                        [id, perm.id.as_str()],
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Insert a new role with its permissions.
    pub fn insert_role(&self, role: &Role) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO roles (id, name, active, created_at, updated_at, created_by, updated_by)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                "#,
                params![
                    role.id,
                    role.name,
                    role.active,
                    role.audit.created_at,
                    role.audit.updated_at,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, &format!("role {}", role.name)))?;

        self.set_role_permissions(&role.id, &role.permissions)?;
        Ok(())
    }

    /// Rename or (de)activate a role.
    pub fn update_role(&self, role: &Role) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE roles SET name = ?2, active = ?3,
                    updated_at = datetime('now'), updated_by = ?4
                WHERE id = ?1 AND deleted = 0
                "#,
                params![role.id, role.name, role.active, self.actor],
            )
            .map_err(|e| unique_violation(e, &format!("role {}", role.name)))?;
        Ok(rows_affected > 0)
    }

    /// Get a role by ID, permissions included.
    pub fn get_role(&self, id: &str) -> DbResult<Option<Role>> {
        let role = self
            .conn
            .query_row(
                r#"
                SELECT id, name, active, created_at, updated_at, created_by, updated_by
                FROM roles WHERE id = ? AND deleted = 0
                "#,
                [id],
                role_from_row,
            )
            .optional()?;
        self.with_permissions(role)
    }

    pub fn get_role_by_name(&self, name: &str) -> DbResult<Option<Role>> {
        let role = self
            .conn
            .query_row(
                r#"
                SELECT id, name, active, created_at, updated_at, created_by, updated_by
                FROM roles WHERE name = ? AND deleted = 0
                "#,
                [name.trim().to_uppercase()],
                role_from_row,
            )
            .optional()?;
        self.with_permissions(role)
    }

    /// All live roles ordered by name.
    pub fn list_roles(&self) -> DbResult<Vec<Role>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, active, created_at, updated_at, created_by, updated_by
            FROM roles WHERE deleted = 0
            ORDER BY name
            "#,
        )?;
        let rows = stmt.query_map([], role_from_row)?;

        let mut roles = Vec::new();
        for row in rows {
            let mut role = row?;
            role.permissions = self.role_permissions(&role.id)?;
            roles.push(role);
        }
        Ok(roles)
    }

    pub fn soft_delete_role(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE roles SET deleted = 1, active = 0, deleted_at = ?2, updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, timestamp(), self.actor],
        )?;
        Ok(rows_affected > 0)
    }

    /// Replace the permissions granted to a role.
    pub fn set_role_permissions(&self, role_id: &str, permissions: &[Permission]) -> DbResult<()> {
        self.conn
            .execute("DELETE FROM role_permissions WHERE role_id = ?", [role_id])?;
        for perm in permissions {
            self.conn.execute(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
                [role_id, perm.id.as_str()],
            )?;
        }
        Ok(())
    }

    pub fn role_permissions(&self, role_id: &str) -> DbResult<Vec<Permission>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.module, p.action FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ?
            ORDER BY p.module, p.action
            "#,
        )?;
        let rows = stmt.query_map([role_id], permission_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// The full permission catalog.
    pub fn list_permissions(&self) -> DbResult<Vec<Permission>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, module, action FROM permissions ORDER BY module, action")?;
        let rows = stmt.query_map([], permission_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Distinct authority strings granted to a user through active roles.
    pub fn user_authorities(&self, user_id: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT p.id, p.module, p.action FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            JOIN role_permissions rp ON rp.role_id = r.id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = ? AND r.deleted = 0 AND r.active = 1
            ORDER BY p.module, p.action
            "#,
        )?;
        let rows = stmt.query_map([user_id], permission_from_row)?;

        let mut authorities = Vec::new();
        for row in rows {
            authorities.push(row?.authority());
        }
        Ok(authorities)
    }

    fn with_permissions(&self, role: Option<Role>) -> DbResult<Option<Role>> {
        match role {
            Some(mut role) => {
                role.permissions = self.role_permissions(&role.id)?;
                Ok(Some(role))
            }
            None => Ok(None),
        }
    }
}

fn role_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        active: row.get(2)?,
        permissions: Vec::new(),
        audit: super::audit_cols(row, 3)?,
    })
}

fn permission_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: row.get(0)?,
        module: code_col(row, 1)?,
        action: code_col(row, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use crate::models::User;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_seeded_roles() {
        let db = setup_db();
        let names: Vec<String> = db.list_roles().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["ADMIN", "ODONTOLOGO", "PACIENTE", "RECEPCIONISTA"]);

        let admin = db.get_role_by_name("admin").unwrap().unwrap();
        assert_eq!(admin.permissions.len(), 45);
        assert_eq!(db.list_permissions().unwrap().len(), 45);
    }

    #[test]
    fn test_reseeding_keeps_custom_grants() {
        let db = setup_db();
        let dentist = db.get_role_by_name(ROLE_DENTIST).unwrap().unwrap();
        db.set_role_permissions(&dentist.id, &[Permission::new(Citas, VerLista)])
            .unwrap();

        db.seed_reference_data().unwrap();

        let dentist = db.get_role(&dentist.id).unwrap().unwrap();
        assert_eq!(dentist.permissions.len(), 1);
    }

    #[test]
    fn test_insert_role_and_duplicate_name() {
        let db = setup_db();
        let mut role = Role::new("asistente");
        role.permissions = vec![Permission::new(Inventario, VerLista)];
        db.insert_role(&role).unwrap();

        let stored = db.get_role_by_name("ASISTENTE").unwrap().unwrap();
        assert_eq!(stored.permissions[0].authority(), "VER_LISTA_INVENTARIO");

        let err = db.insert_role(&Role::new("Asistente")).unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn test_user_authorities_skip_inactive_roles() {
        let db = setup_db();
        let mut role = Role::new("CAJA");
        role.permissions = vec![Permission::new(Facturacion, Crear)];
        db.insert_role(&role).unwrap();

        let mut user = User::new("Caja".into(), "caja@clinic.pe".into());
        user.roles = vec!["CAJA".into()];
        db.insert_user(&user).unwrap();

        assert_eq!(db.user_authorities(&user.id).unwrap(), vec!["CREAR_FACTURACION"]);

        role.active = false;
        db.update_role(&role).unwrap();
        assert!(db.user_authorities(&user.id).unwrap().is_empty());
    }

    #[test]
    fn test_soft_delete_role() {
        let db = setup_db();
        let role = Role::new("TEMP");
        db.insert_role(&role).unwrap();

        assert!(db.soft_delete_role(&role.id).unwrap());
        assert!(db.get_role(&role.id).unwrap().is_none());
        assert!(!db.soft_delete_role(&role.id).unwrap());
    }
}
