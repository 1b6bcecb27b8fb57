//! User database operations.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, OptionalExtension};

use super::{contains_pattern, timestamp, unique_violation, Database, DbError, DbResult};
use crate::models::{Audit, Page, PageRequest, ScheduleException, User, WeeklySchedule};

const USER_COLUMNS: &str = r#"
    u.id, u.full_name, u.email, u.phone, u.password_hash, u.active,
    u.failed_attempts, u.locked_at, u.valid_until, u.must_change_password,
    u.weekly_schedule, u.created_at, u.updated_at, u.created_by, u.updated_by
"#;

/// Raw row before the schedule JSON and roles are attached.
struct UserRow {
    id: String,
    full_name: String,
    email: String,
    phone: Option<String>,
    password_hash: Option<String>,
    active: bool,
    failed_attempts: u32,
    locked_at: Option<NaiveDateTime>,
    valid_until: Option<NaiveDate>,
    must_change_password: bool,
    weekly_schedule: String,
    audit: Audit,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            full_name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            password_hash: row.get(4)?,
            active: row.get(5)?,
            failed_attempts: row.get(6)?,
            locked_at: row.get(7)?,
            valid_until: row.get(8)?,
            must_change_password: row.get(9)?,
            weekly_schedule: row.get(10)?,
            audit: super::audit_cols(row, 11)?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = DbError;

    fn try_from(row: UserRow) -> DbResult<Self> {
        let weekly_schedule: WeeklySchedule = serde_json::from_str(&row.weekly_schedule)?;
        Ok(User {
            id: row.id,
            full_name: row.full_name,
            email: row.email,
            phone: row.phone,
            password_hash: row.password_hash,
            active: row.active,
            failed_attempts: row.failed_attempts,
            locked_at: row.locked_at,
            valid_until: row.valid_until,
            must_change_password: row.must_change_password,
            weekly_schedule,
            roles: Vec::new(),
            audit: row.audit,
        })
    }
}

impl Database {
    /// Insert a new user together with its role links.
    pub fn insert_user(&self, user: &User) -> DbResult<()> {
        let schedule_json = serde_json::to_string(&user.weekly_schedule)?;

        self.conn
            .execute(
                r#"
                INSERT INTO users (
                    id, full_name, email, phone, password_hash, active,
                    failed_attempts, locked_at, valid_until, must_change_password,
                    weekly_schedule, created_at, updated_at, created_by, updated_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
                "#,
                params![
                    user.id,
                    user.full_name,
                    user.email,
                    user.phone,
                    user.password_hash,
                    user.active,
                    user.failed_attempts,
                    user.locked_at,
                    user.valid_until,
                    user.must_change_password,
                    schedule_json,
                    user.audit.created_at,
                    user.audit.updated_at,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, &format!("user with email {}", user.email)))?;

        self.set_user_roles_by_name(&user.id, &user.roles)?;
        Ok(())
    }

    /// Update profile fields, schedule and expiry. Credentials and roles have
    /// dedicated methods.
    pub fn update_user(&self, user: &User) -> DbResult<bool> {
        let schedule_json = serde_json::to_string(&user.weekly_schedule)?;

        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE users SET
                    full_name = ?2,
                    email = ?3,
                    phone = ?4,
                    active = ?5,
                    valid_until = ?6,
                    weekly_schedule = ?7,
                    updated_at = datetime('now'),
                    updated_by = ?8
                WHERE id = ?1 AND deleted = 0
                "#,
                params![
                    user.id,
                    user.full_name,
                    user.email,
                    user.phone,
                    user.active,
                    user.valid_until,
                    schedule_json,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, &format!("user with email {}", user.email)))?;
        Ok(rows_affected > 0)
    }

    /// Get a user by ID.
    pub fn get_user(&self, id: &str) -> DbResult<Option<User>> {
        let sql = format!("SELECT {} FROM users u WHERE u.id = ? AND u.deleted = 0", USER_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [id], UserRow::from_row)
            .optional()?;
        self.hydrate_user(row)
    }

    /// Get a user by login email (case-insensitive).
    pub fn get_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let sql = format!(
            "SELECT {} FROM users u WHERE u.email = ? AND u.deleted = 0",
            USER_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, [email.trim().to_lowercase()], UserRow::from_row)
            .optional()?;
        self.hydrate_user(row)
    }

    /// Find the user holding an unexpired activation/reset token.
    pub fn get_user_by_token_hash(&self, token_hash: &str, now: NaiveDateTime) -> DbResult<Option<User>> {
        let sql = format!(
            r#"
            SELECT {} FROM users u
            WHERE u.token_hash = ?1 AND u.deleted = 0
              AND (u.token_expires_at IS NULL OR u.token_expires_at > ?2)
            "#,
            USER_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![token_hash, now], UserRow::from_row)
            .optional()?;
        self.hydrate_user(row)
    }

    /// Search users by name or email, ordered by name.
    pub fn search_users(&self, keyword: &str, page: PageRequest) -> DbResult<Page<User>> {
        let pattern = contains_pattern(keyword);

        let total: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM users u
            WHERE u.deleted = 0 AND (lower(u.full_name) LIKE ?1 OR u.email LIKE ?1)
            "#,
            [&pattern],
            |row| row.get(0),
        )?;

        let sql = format!(
            r#"
            SELECT {} FROM users u
            WHERE u.deleted = 0 AND (lower(u.full_name) LIKE ?1 OR u.email LIKE ?1)
            ORDER BY u.full_name
            LIMIT ?2 OFFSET ?3
            "#,
            USER_COLUMNS
        );
        let users = self.collect_users(&sql, params![pattern, page.limit(), page.offset()])?;

        Ok(Page::new(users, total as u64, page))
    }

    /// Users holding a role, optionally only active ones.
    pub fn list_users_with_role(&self, role_name: &str, only_active: bool) -> DbResult<Vec<User>> {
        let sql = format!(
            r#"
            SELECT {} FROM users u
            JOIN user_roles ur ON ur.user_id = u.id
            JOIN roles r ON r.id = ur.role_id
            WHERE r.name = ?1 AND r.deleted = 0 AND u.deleted = 0
              AND (?2 = 0 OR u.active = 1)
            ORDER BY u.full_name
            "#,
            USER_COLUMNS
        );
        self.collect_users(&sql, params![role_name, only_active])
    }

    /// Active users whose expiry date is before `today`.
    pub fn list_expired_active_users(&self, today: NaiveDate) -> DbResult<Vec<User>> {
        let sql = format!(
            r#"
            SELECT {} FROM users u
            WHERE u.deleted = 0 AND u.active = 1
              AND u.valid_until IS NOT NULL AND u.valid_until < ?1
            ORDER BY u.valid_until
            "#,
            USER_COLUMNS
        );
        self.collect_users(&sql, params![today])
    }

    /// Count live users holding a role.
    pub fn count_users_with_role(&self, role_id: &str) -> DbResult<u64> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM user_roles ur
            JOIN users u ON u.id = ur.user_id
            WHERE ur.role_id = ? AND u.deleted = 0
            "#,
            [role_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn set_user_active(&self, id: &str, active: bool) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE users SET active = ?2, updated_at = datetime('now'), updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, active, self.actor],
        )?;
        Ok(rows_affected > 0)
    }

    /// Soft delete a user. The row stays but disappears from every query.
    pub fn soft_delete_user(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE users SET deleted = 1, active = 0, deleted_at = ?2, updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, timestamp(), self.actor],
        )?;
        Ok(rows_affected > 0)
    }

    /// Replace the stored password hash.
    pub fn set_password_hash(&self, id: &str, hash: &str, must_change: bool) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE users SET password_hash = ?2, must_change_password = ?3,
                token_hash = NULL, token_expires_at = NULL,
                updated_at = datetime('now'), updated_by = ?4
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, hash, must_change, self.actor],
        )?;
        Ok(rows_affected > 0)
    }

    /// Persist login failure counters.
    pub fn record_login_failure(
        &self,
        id: &str,
        failed_attempts: u32,
        locked_at: Option<NaiveDateTime>,
    ) -> DbResult<()> {
        self.conn.execute(
            "UPDATE users SET failed_attempts = ?2, locked_at = ?3 WHERE id = ?1",
            params![id, failed_attempts, locked_at],
        )?;
        Ok(())
    }

    /// Clear failure counters and lock.
    pub fn reset_login_state(&self, id: &str) -> DbResult<()> {
        self.conn.execute(
            "UPDATE users SET failed_attempts = 0, locked_at = NULL WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    pub fn set_user_token(&self, id: &str, token_hash: &str, expires_at: NaiveDateTime) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE users SET token_hash = ?2, token_expires_at = ?3 WHERE id = ?1 AND deleted = 0",
            params![id, token_hash, expires_at],
        )?;
        Ok(rows_affected > 0)
    }

    /// Role names held by a user.
    pub fn user_role_names(&self, user_id: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT r.name FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = ? AND r.deleted = 0
            ORDER BY r.name
            "#,
        )?;
        let rows = stmt.query_map([user_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Replace a user's roles. Unknown role names are rejected.
    pub fn set_user_roles_by_name(&self, user_id: &str, role_names: &[String]) -> DbResult<()> {
        let mut role_ids = Vec::with_capacity(role_names.len());
        for name in role_names {
            let role = self
                .get_role_by_name(name)?
                .ok_or_else(|| DbError::NotFound(format!("role {}", name)))?;
            role_ids.push(role.id);
        }

        self.conn
            .execute("DELETE FROM user_roles WHERE user_id = ?", [user_id])?;
        for role_id in role_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
                [user_id, role_id.as_str()],
            )?;
        }
        Ok(())
    }

    // =========================================================================
    // Schedule exceptions
    // =========================================================================

    /// Insert or replace the exception for the user's date.
    pub fn upsert_schedule_exception(&self, exception: &ScheduleException) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO schedule_exceptions (id, user_id, date, hours, reason)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, date) DO UPDATE SET
                hours = excluded.hours,
                reason = excluded.reason
            "#,
            params![
                exception.id,
                exception.user_id,
                exception.date,
                exception.hours,
                exception.reason,
            ],
        )?;
        Ok(())
    }

    pub fn get_schedule_exception(&self, user_id: &str, date: NaiveDate) -> DbResult<Option<ScheduleException>> {
        self.conn
            .query_row(
                r#"
                SELECT id, user_id, date, hours, reason
                FROM schedule_exceptions
                WHERE user_id = ?1 AND date = ?2
                "#,
                params![user_id, date],
                |row| {
                    Ok(ScheduleException {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        date: row.get(2)?,
                        hours: row.get(3)?,
                        reason: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_schedule_exceptions(&self, user_id: &str) -> DbResult<Vec<ScheduleException>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, user_id, date, hours, reason
            FROM schedule_exceptions
            WHERE user_id = ?
            ORDER BY date
            "#,
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok(ScheduleException {
                id: row.get(0)?,
                user_id: row.get(1)?,
                date: row.get(2)?,
                hours: row.get(3)?,
                reason: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn delete_schedule_exception(&self, user_id: &str, date: NaiveDate) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM schedule_exceptions WHERE user_id = ?1 AND date = ?2",
            params![user_id, date],
        )?;
        Ok(rows_affected > 0)
    }

    /// Look up an email among live and soft-deleted accounts.
    ///
    /// Returns the account and whether it is deleted; a live account wins.
    pub fn get_user_by_email_any(&self, email: &str) -> DbResult<Option<(User, bool)>> {
        let sql = format!(
            r#"
            SELECT {}, u.deleted FROM users u
            WHERE u.email = ?
            ORDER BY u.deleted, u.deleted_at DESC
            LIMIT 1
            "#,
            USER_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, [email.trim().to_lowercase()], |row| {
                Ok((UserRow::from_row(row)?, row.get::<_, bool>(15)?))
            })
            .optional()?;

        match row {
            Some((row, deleted)) => {
                let mut user: User = row.try_into()?;
                user.roles = self.user_role_names(&user.id)?;
                Ok(Some((user, deleted)))
            }
            None => Ok(None),
        }
    }

    /// Undo a soft delete and reactivate the account.
    pub fn restore_user(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE users SET deleted = 0, deleted_at = NULL, active = 1,
                    updated_at = datetime('now'), updated_by = ?2
                WHERE id = ?1 AND deleted = 1
                "#,
                params![id, self.actor],
            )
            .map_err(|e| unique_violation(e, "user with that email"))?;
        Ok(rows_affected > 0)
    }

    fn hydrate_user(&self, row: Option<UserRow>) -> DbResult<Option<User>> {
        match row {
            Some(row) => {
                let mut user: User = row.try_into()?;
                user.roles = self.user_role_names(&user.id)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    fn collect_users(&self, sql: &str, params: impl rusqlite::Params) -> DbResult<Vec<User>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, UserRow::from_row)?;

        let mut users = Vec::new();
        for row in rows {
            let mut user: User = row?.try_into()?;
            user.roles = self.user_role_names(&user.id)?;
            users.push(user);
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();

        let mut user = User::new("Dra. Carla Ruiz".into(), "carla@clinic.pe".into());
        user.roles = vec!["ODONTOLOGO".into()];
        user.weekly_schedule.set(Weekday::Mon, "09:00-13:00");
        db.insert_user(&user).unwrap();

        let retrieved = db.get_user(&user.id).unwrap().unwrap();
        assert_eq!(retrieved.full_name, "Dra. Carla Ruiz");
        assert_eq!(retrieved.roles, vec!["ODONTOLOGO".to_string()]);
        assert_eq!(retrieved.weekly_schedule.hours_for(Weekday::Mon), Some("09:00-13:00"));

        let by_email = db.get_user_by_email("CARLA@clinic.pe").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let db = setup_db();
        db.insert_user(&User::new("A".into(), "a@clinic.pe".into())).unwrap();

        let err = db
            .insert_user(&User::new("B".into(), "a@clinic.pe".into()))
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn test_soft_delete_hides_user_and_frees_email() {
        let db = setup_db();
        let user = User::new("A".into(), "a@clinic.pe".into());
        db.insert_user(&user).unwrap();

        assert!(db.soft_delete_user(&user.id).unwrap());
        assert!(db.get_user(&user.id).unwrap().is_none());
        assert!(db.search_users("a@", PageRequest::default()).unwrap().items.is_empty());

        // The email can be reused by a new account
        db.insert_user(&User::new("A2".into(), "a@clinic.pe".into())).unwrap();
    }

    #[test]
    fn test_search_users_paged() {
        let db = setup_db();
        for i in 0..5 {
            db.insert_user(&User::new(format!("Paciente {}", i), format!("p{}@mail.pe", i)))
                .unwrap();
        }
        db.insert_user(&User::new("Otro".into(), "otro@mail.pe".into())).unwrap();

        let page = db.search_users("paciente", PageRequest::new(1, 2)).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].full_name, "Paciente 2");
    }

    #[test]
    fn test_roles_listing() {
        let db = setup_db();
        let mut dentist = User::new("Dr. B".into(), "b@clinic.pe".into());
        dentist.roles = vec!["ODONTOLOGO".into()];
        db.insert_user(&dentist).unwrap();

        let mut inactive = User::new("Dr. C".into(), "c@clinic.pe".into());
        inactive.roles = vec!["ODONTOLOGO".into()];
        inactive.active = false;
        db.insert_user(&inactive).unwrap();

        assert_eq!(db.list_users_with_role("ODONTOLOGO", false).unwrap().len(), 2);
        assert_eq!(db.list_users_with_role("ODONTOLOGO", true).unwrap().len(), 1);

        let role = db.get_role_by_name("ODONTOLOGO").unwrap().unwrap();
        assert_eq!(db.count_users_with_role(&role.id).unwrap(), 2);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let db = setup_db();
        let mut user = User::new("X".into(), "x@clinic.pe".into());
        user.roles = vec!["NOPE".into()];
        assert!(matches!(db.insert_user(&user), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_schedule_exception_upsert() {
        let db = setup_db();
        let user = User::new("Dr. D".into(), "d@clinic.pe".into());
        db.insert_user(&user).unwrap();

        let date = NaiveDate::from_ymd_opt(2031, 7, 28).unwrap();
        db.upsert_schedule_exception(&ScheduleException::day_off(
            user.id.clone(),
            date,
            Some("Feriado".into()),
        ))
        .unwrap();

        let mut partial = ScheduleException::new(user.id.clone(), date, "09:00-11:00".into());
        partial.reason = Some("Media jornada".into());
        db.upsert_schedule_exception(&partial).unwrap();

        let stored = db.get_schedule_exception(&user.id, date).unwrap().unwrap();
        assert_eq!(stored.hours, "09:00-11:00");
        assert_eq!(db.list_schedule_exceptions(&user.id).unwrap().len(), 1);

        assert!(db.delete_schedule_exception(&user.id, date).unwrap());
        assert!(db.get_schedule_exception(&user.id, date).unwrap().is_none());
    }

    #[test]
    fn test_expired_users() {
        let db = setup_db();
        let today = NaiveDate::from_ymd_opt(2031, 1, 10).unwrap();

        let mut expired = User::new("E".into(), "e@clinic.pe".into());
        expired.valid_until = NaiveDate::from_ymd_opt(2031, 1, 9);
        db.insert_user(&expired).unwrap();

        let mut current = User::new("F".into(), "f@clinic.pe".into());
        current.valid_until = Some(today);
        db.insert_user(&current).unwrap();

        let found = db.list_expired_active_users(today).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired.id);
    }
}
