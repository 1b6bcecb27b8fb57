//! Shared fixtures for unit tests.

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use rust_decimal::Decimal;

use crate::db::Database;
use crate::models::{Patient, Procedure, User, ROLE_DENTIST};

pub(crate) struct Clinic {
    pub patient: Patient,
    pub dentist: User,
    pub procedure: Procedure,
}

/// A patient, a dentist working Monday to Saturday and a 30 minute procedure.
pub(crate) fn clinic(db: &Database) -> Clinic {
    let patient = Patient::new("DNI".into(), "45678912".into(), "Lucía Torres".into());
    db.insert_patient(&patient).unwrap();

    let mut dentist = User::new("Dra. Carla Ruiz".into(), "carla@clinic.pe".into());
    dentist.roles = vec![ROLE_DENTIST.into()];
    for day in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
    ] {
        dentist.weekly_schedule.set(day, "09:00-13:00,15:00-19:00");
    }
    db.insert_user(&dentist).unwrap();

    let procedure = Procedure::new(
        "PRO-001".into(),
        "Limpieza dental".into(),
        Decimal::from(80),
        30,
    );
    db.insert_procedure(&procedure).unwrap();

    Clinic {
        patient,
        dentist,
        procedure,
    }
}

/// 2031-03-03 is a Monday.
pub(crate) fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 3, 3).unwrap()
}

pub(crate) fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    date.and_hms_opt(h, m, 0).unwrap()
}
