//! Front-desk dashboard figures.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::db::{Database, DbError};
use crate::models::{Appointment, Supply};

const UPCOMING_LIMIT: u32 = 5;
const UPCOMING_DAYS: i64 = 2;
const LOW_STOCK_LIMIT: usize = 5;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

pub type StatsResult<T> = Result<T, StatsError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicStats {
    /// Appointments of any status starting today
    pub appointments_today: u64,
    pub new_patients_this_month: u64,
    /// Outstanding balance over open invoices
    pub pending_receivables: Decimal,
    /// Payments received this calendar month
    pub income_this_month: Decimal,
    pub total_patients: u64,
    /// Next pending or confirmed appointments until the end of the day after tomorrow
    pub upcoming: Vec<Appointment>,
    pub low_stock: Vec<Supply>,
}

pub struct Dashboard<'a> {
    db: &'a Database,
    now: Option<NaiveDateTime>,
}

impl<'a> Dashboard<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, now: None }
    }

    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> NaiveDateTime {
        self.now
            .unwrap_or_else(|| chrono::Local::now().naive_local())
    }

    pub fn stats(&self) -> StatsResult<ClinicStats> {
        let now = self.now();
        let today = now.date();
        let day_start = today.and_time(NaiveTime::MIN);
        let month_start = today.with_day(1).unwrap_or(today);
        let month_end = month_start
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX);
        let upcoming_end = (today + Duration::days(UPCOMING_DAYS + 1)).and_time(NaiveTime::MIN)
            - Duration::seconds(1);

        let appointments_today = self
            .db
            .count_appointments_starting_between(day_start, day_start + Duration::days(1))?;
        let new_patients_this_month = self
            .db
            .count_patients_created_in_month(&month_start.format("%Y-%m").to_string())?;
        let pending_receivables: Decimal = self.db.open_invoice_balances()?.into_iter().sum();
        let income_this_month: Decimal = self
            .db
            .payment_amounts_between(month_start.and_time(NaiveTime::MIN), month_end.and_time(NaiveTime::MIN))?
            .into_iter()
            .sum();
        let total_patients = self.db.count_patients()?;
        let upcoming = self
            .db
            .upcoming_clinic_appointments(now, upcoming_end, UPCOMING_LIMIT)?;
        let mut low_stock = self.db.list_low_stock_supplies()?;
        low_stock.truncate(LOW_STOCK_LIMIT);

        debug!(appointments_today, total_patients, %pending_receivables, "Dashboard computed");
        Ok(ClinicStats {
            appointments_today,
            new_patients_this_month,
            pending_receivables,
            income_this_month,
            total_patients,
            upcoming,
            low_stock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AppointmentStatus, Invoice, InvoiceKind, Patient, Payment, PaymentMethod, PaymentStatus,
    };
    use crate::test_support::{at, clinic, monday, Clinic};

    fn book(db: &Database, c: &Clinic, start: NaiveDateTime, status: AppointmentStatus) {
        let mut appt = Appointment::new(
            c.patient.id.clone(),
            c.dentist.id.clone(),
            c.procedure.id.clone(),
            start,
            30,
        );
        appt.status = status;
        db.insert_appointment(&appt).unwrap();
    }

    fn invoice(db: &Database, c: &Clinic, number: &str, total: i64, paid: i64) -> Invoice {
        let mut inv = Invoice::new(number.into(), InvoiceKind::DirectSale, c.patient.id.clone(), at(monday(), 8, 0));
        inv.total = Decimal::from(total);
        inv.paid = Decimal::from(paid);
        inv.pending = Decimal::from(total - paid);
        inv.status = if paid == 0 {
            PaymentStatus::Pending
        } else if paid < total {
            PaymentStatus::PartiallyPaid
        } else {
            PaymentStatus::Paid
        };
        db.insert_invoice(&inv).unwrap();
        inv
    }

    #[test]
    fn test_empty_clinic() {
        let db = Database::open_in_memory().unwrap();
        let stats = Dashboard::new(&db).at(at(monday(), 9, 0)).stats().unwrap();
        assert_eq!(stats.appointments_today, 0);
        assert_eq!(stats.total_patients, 0);
        assert_eq!(stats.pending_receivables, Decimal::ZERO);
        assert!(stats.upcoming.is_empty());
    }

    #[test]
    fn test_counts_and_windows() {
        let db = Database::open_in_memory().unwrap();
        let c = clinic(&db);

        let mut old = Patient::new("DNI".into(), "10000001".into(), "Antiguo".into());
        old.audit.created_at = "2031-02-27T15:00:00+00:00".into();
        db.insert_patient(&old).unwrap();

        book(&db, &c, at(monday(), 8, 0), AppointmentStatus::Attended);
        book(&db, &c, at(monday(), 10, 0), AppointmentStatus::CancelledByClinic);
        book(&db, &c, at(monday(), 11, 0), AppointmentStatus::Confirmed);
        let wednesday = monday() + Duration::days(2);
        let thursday = monday() + Duration::days(3);
        book(&db, &c, at(wednesday, 18, 30), AppointmentStatus::Pending);
        book(&db, &c, at(thursday, 9, 0), AppointmentStatus::Pending);

        let open = invoice(&db, &c, "B001-0000001", 100, 40);
        invoice(&db, &c, "B001-0000002", 50, 0);
        let settled = invoice(&db, &c, "B001-0000003", 30, 30);
        db.insert_payment(&Payment::new(open.id.clone(), Decimal::from(40), PaymentMethod::Cash, at(monday(), 8, 30)))
            .unwrap();
        db.insert_payment(&Payment::new(
            settled.id.clone(),
            Decimal::from(30),
            PaymentMethod::Card,
            at(monday() - Duration::days(5), 12, 0),
        ))
        .unwrap();

        let stats = Dashboard::new(&db).at(at(monday(), 9, 0)).stats().unwrap();
        assert_eq!(stats.appointments_today, 3);
        assert_eq!(stats.total_patients, 2);
        assert_eq!(stats.pending_receivables, Decimal::from(110));
        assert_eq!(stats.income_this_month, Decimal::from(40));

        let starts: Vec<NaiveDateTime> = stats.upcoming.iter().map(|a| a.start).collect();
        assert_eq!(starts, vec![at(monday(), 11, 0), at(wednesday, 18, 30)]);
    }

    #[test]
    fn test_new_patients_by_month() {
        let db = Database::open_in_memory().unwrap();
        for (doc, created) in [
            ("1", "2031-03-01T00:10:00+00:00"),
            ("2", "2031-03-02T10:00:00+00:00"),
            ("3", "2031-02-28T23:00:00+00:00"),
        ] {
            let mut p = Patient::new("DNI".into(), doc.into(), format!("Paciente {}", doc));
            p.audit.created_at = created.into();
            db.insert_patient(&p).unwrap();
        }

        let stats = Dashboard::new(&db).at(at(monday(), 9, 0)).stats().unwrap();
        assert_eq!(stats.new_patients_this_month, 2);
        assert_eq!(stats.total_patients, 3);
    }

    #[test]
    fn test_low_stock_capped() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..7 {
            let mut supply = Supply::new(format!("INS-{:03}", i), format!("Insumo {}", i), "unidad".into());
            supply.minimum_stock = Decimal::from(10);
            db.insert_supply(&supply).unwrap();
        }

        let stats = Dashboard::new(&db).at(at(monday(), 9, 0)).stats().unwrap();
        assert_eq!(stats.low_stock.len(), 5);
    }
}
