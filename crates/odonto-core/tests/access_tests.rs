//! Accounts, roles and sessions working together.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use odonto_core::access::{AccessError, AccountForm, RoleForm};
use odonto_core::config::SecurityConfig;
use odonto_core::db::Database;
use odonto_core::jobs;
use odonto_core::models::{ROLE_ADMIN, ROLE_DENTIST, ROLE_RECEPTIONIST};
use odonto_core::{Accounts, Roles, SessionRegistry};

const PASSWORD: &str = "Clinica#2031";

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2031, 3, 3).unwrap().and_hms_opt(8, 0, 0).unwrap()
}

fn accounts(db: &Database) -> Accounts<'_> {
    Accounts::new(db, &SecurityConfig::default()).at(now())
}

fn create(db: &Database, email: &str, role: &str) -> String {
    accounts(db)
        .save(&AccountForm {
            full_name: "Carla Mendoza".into(),
            email: email.into(),
            password: Some(PASSWORD.into()),
            roles: vec![role.into()],
            ..Default::default()
        })
        .unwrap()
        .id
}

#[test]
fn test_role_change_expires_sessions() {
    let db = Database::open_in_memory().unwrap();
    let sessions = SessionRegistry::new();
    create(&db, "carla@clinic.pe", ROLE_RECEPTIONIST);
    create(&db, "dr.paz@clinic.pe", ROLE_DENTIST);

    let carla = accounts(&db).authenticate("carla@clinic.pe", PASSWORD).unwrap();
    assert!(carla.has_authority("ROLE_RECEPCIONISTA"));
    assert!(carla.has_authority("VER_LISTA_FACTURACION"));
    let carla_session = sessions.register(&carla, now());

    let dentist = accounts(&db).authenticate("dr.paz@clinic.pe", PASSWORD).unwrap();
    let dentist_session = sessions.register(&dentist, now());

    // Receptionists lose billing
    let role = Roles::new(&db).get("role-recepcionista").unwrap();
    let kept: Vec<String> = role
        .permissions
        .iter()
        .filter(|p| !p.id.ends_with("facturacion"))
        .map(|p| p.id.clone())
        .collect();
    Roles::new(&db)
        .with_sessions(&sessions)
        .save(&RoleForm {
            id: Some(role.id.clone()),
            name: role.name.clone(),
            permission_ids: kept,
        })
        .unwrap();

    assert!(!sessions.is_active(&carla_session));
    assert!(sessions.is_active(&dentist_session));

    let carla = accounts(&db).authenticate("carla@clinic.pe", PASSWORD).unwrap();
    assert!(!carla.has_authority("VER_LISTA_FACTURACION"));
    assert!(carla.has_authority("VER_LISTA_CITAS"));
}

#[test]
fn test_unknown_permission_rejected() {
    let db = Database::open_in_memory().unwrap();
    let err = Roles::new(&db)
        .save(&RoleForm {
            id: None,
            name: "auditor".into(),
            permission_ids: vec!["perm-ver_lista-citas".into(), "perm-borrar-todo".into()],
        })
        .unwrap_err();
    assert!(matches!(err, AccessError::Validation(_)));

    let role = Roles::new(&db)
        .save(&RoleForm {
            id: None,
            name: "auditor".into(),
            permission_ids: vec!["perm-ver_lista-citas".into()],
        })
        .unwrap();
    assert_eq!(role.name, "AUDITOR");
    assert_eq!(role.permissions.len(), 1);
}

#[test]
fn test_lockout_and_recovery() {
    let db = Database::open_in_memory().unwrap();
    create(&db, "carla@clinic.pe", ROLE_RECEPTIONIST);

    for _ in 0..5 {
        let err = accounts(&db).authenticate("carla@clinic.pe", "wrong").unwrap_err();
        assert!(matches!(err, AccessError::InvalidCredentials));
    }

    // The right password does not help while locked
    let err = accounts(&db).authenticate("carla@clinic.pe", PASSWORD).unwrap_err();
    assert!(matches!(err, AccessError::Locked { minutes: 15 }));

    let later = Accounts::new(&db, &SecurityConfig::default()).at(now() + Duration::minutes(10));
    let err = later.authenticate("carla@clinic.pe", PASSWORD).unwrap_err();
    assert!(matches!(err, AccessError::Locked { minutes: 5 }));

    let after = Accounts::new(&db, &SecurityConfig::default()).at(now() + Duration::minutes(16));
    let principal = after.authenticate("carla@clinic.pe", PASSWORD).unwrap();
    assert_eq!(principal.email, "carla@clinic.pe");
}

#[test]
fn test_token_activates_account() {
    let db = Database::open_in_memory().unwrap();
    let id = create(&db, "nuevo@clinic.pe", ROLE_DENTIST);
    accounts(&db).toggle_active(&id).unwrap();

    let err = accounts(&db).authenticate("nuevo@clinic.pe", PASSWORD).unwrap_err();
    assert!(matches!(err, AccessError::Disabled));

    let token = accounts(&db).issue_token(&id).unwrap();
    let expired = Accounts::new(&db, &SecurityConfig::default()).at(now() + Duration::hours(25));
    assert!(matches!(
        expired.consume_token(&token, "Sonrisa#2031"),
        Err(AccessError::NotFound(_))
    ));

    let user = accounts(&db).consume_token(&token, "Sonrisa#2031").unwrap();
    assert!(user.active);
    accounts(&db).authenticate("nuevo@clinic.pe", "Sonrisa#2031").unwrap();

    // Single use
    assert!(accounts(&db).consume_token(&token, "Otra#Clave2031").is_err());
}

#[test]
fn test_primary_admin_protected() {
    let db = Database::open_in_memory().unwrap();
    let admin = create(&db, "admin@odontoapp.com", ROLE_ADMIN);

    assert!(matches!(accounts(&db).toggle_active(&admin), Err(AccessError::Forbidden(_))));
    assert!(matches!(accounts(&db).delete(&admin), Err(AccessError::Forbidden(_))));
    assert!(matches!(Roles::new(&db).delete("role-admin"), Err(AccessError::Forbidden(_))));
}

#[test]
fn test_expired_accounts_cannot_log_in() {
    let db = Database::open_in_memory().unwrap();
    let id = create(&db, "temporal@clinic.pe", ROLE_DENTIST);
    let mut form = AccountForm {
        id: Some(id.clone()),
        full_name: "Carla Mendoza".into(),
        email: "temporal@clinic.pe".into(),
        roles: vec![ROLE_DENTIST.into()],
        ..Default::default()
    };
    form.valid_until = Some(now().date() - Duration::days(1));
    accounts(&db).save(&form).unwrap();

    // Rejected even before the job runs
    let err = accounts(&db).authenticate("temporal@clinic.pe", PASSWORD).unwrap_err();
    assert!(matches!(err, AccessError::Disabled));

    assert_eq!(jobs::deactivate_expired_accounts(&db, now().date()).unwrap(), 1);
    assert!(!accounts(&db).get(&id).unwrap().active);
}
