//! Invoice export for accounting.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Invoice;

/// One exported invoice line, flattened with its invoice header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceExportRow {
    pub number: String,
    pub kind: String,
    pub patient_id: String,
    pub issued_at: NaiveDateTime,
    pub status: String,
    pub item_kind: String,
    pub item_id: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Batch invoice export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInvoiceExport {
    /// Export timestamp
    pub exported_at: String,
    pub invoices: Vec<Invoice>,
    /// Sum of totals, voided invoices excluded
    pub total_billed: Decimal,
    pub total_paid: Decimal,
}

impl BatchInvoiceExport {
    pub fn new(invoices: Vec<Invoice>) -> Self {
        let live = invoices
            .iter()
            .filter(|i| i.status != crate::models::PaymentStatus::Voided);
        let (total_billed, total_paid) = live.fold((Decimal::ZERO, Decimal::ZERO), |(billed, paid), i| {
            (billed + i.total, paid + i.paid)
        });

        Self {
            exported_at: chrono::Utc::now().to_rfc3339(),
            invoices,
            total_billed,
            total_paid,
        }
    }

    pub fn rows(&self) -> Vec<InvoiceExportRow> {
        self.invoices
            .iter()
            .flat_map(|invoice| {
                invoice.lines.iter().map(move |line| InvoiceExportRow {
                    number: invoice.number.clone(),
                    kind: invoice.kind.as_str().to_string(),
                    patient_id: invoice.patient_id.clone(),
                    issued_at: invoice.issued_at,
                    status: invoice.status.as_str().to_string(),
                    item_kind: line.item_kind.as_str().to_string(),
                    item_id: line.item_id.clone(),
                    description: line.description.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    subtotal: line.subtotal,
                })
            })
            .collect()
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV format, one row per invoice line.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("number,kind,patient_id,issued_at,status,item_kind,item_id,description,quantity,unit_price,subtotal\n");

        for row in self.rows() {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{}\n",
                escape_csv(&row.number),
                row.kind,
                escape_csv(&row.patient_id),
                row.issued_at.format("%Y-%m-%d %H:%M:%S"),
                row.status,
                row.item_kind,
                escape_csv(&row.item_id),
                escape_csv(&row.description),
                row.quantity,
                row.unit_price,
                row.subtotal,
            ));
        }

        csv
    }
}

/// Escape a string for CSV.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
