//! Patient models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Audit;

/// A clinic patient, optionally linked 1:1 to a portal user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: String,
    /// Portal account, if the patient registered
    pub user_id: Option<String>,
    /// DNI, CE, PASAPORTE...
    pub document_type: String,
    /// Unique together with `document_type`
    pub document_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
    pub audit: Audit,
}

impl Patient {
    /// Create a new patient with required fields.
    pub fn new(document_type: String, document_number: String, full_name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            document_type: document_type.trim().to_uppercase(),
            document_number: document_number.trim().to_string(),
            full_name,
            email: None,
            phone: None,
            birth_date: None,
            address: None,
            allergies: None,
            medical_history: None,
            audit: Audit::now(),
        }
    }

    /// Age in whole years on `today`.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        self.birth_date.and_then(|b| today.years_since(b))
    }
}
