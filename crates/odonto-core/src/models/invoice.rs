//! Invoices (comprobantes), their lines and payments.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Audit, UnknownVariant};

/// Payment state of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "PENDIENTE")]
    Pending,
    #[serde(rename = "PAGADO_PARCIAL")]
    PartiallyPaid,
    #[serde(rename = "PAGADO_TOTAL")]
    Paid,
    #[serde(rename = "ANULADO")]
    Voided,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::PartiallyPaid,
        PaymentStatus::Paid,
        PaymentStatus::Voided,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDIENTE",
            PaymentStatus::PartiallyPaid => "PAGADO_PARCIAL",
            PaymentStatus::Paid => "PAGADO_TOTAL",
            PaymentStatus::Voided => "ANULADO",
        }
    }

    /// Status after a payment leaves `pending` outstanding.
    pub fn after_payment(pending: Decimal) -> Self {
        if pending.is_zero() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("payment status", s))
    }
}

/// Origin of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceKind {
    #[serde(rename = "CITA")]
    Appointment,
    #[serde(rename = "VENTA_DIRECTA")]
    DirectSale,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceKind::Appointment => "CITA",
            InvoiceKind::DirectSale => "VENTA_DIRECTA",
        }
    }
}

impl FromStr for InvoiceKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CITA" => Ok(InvoiceKind::Appointment),
            "VENTA_DIRECTA" => Ok(InvoiceKind::DirectSale),
            other => Err(UnknownVariant::new("invoice kind", other)),
        }
    }
}

/// What an invoice line charges for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    #[serde(rename = "PROCEDIMIENTO")]
    Procedure,
    #[serde(rename = "INSUMO")]
    Supply,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Procedure => "PROCEDIMIENTO",
            ItemKind::Supply => "INSUMO",
        }
    }
}

impl FromStr for ItemKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCEDIMIENTO" => Ok(ItemKind::Procedure),
            "INSUMO" => Ok(ItemKind::Supply),
            other => Err(UnknownVariant::new("item kind", other)),
        }
    }
}

/// Accepted payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "EFECTIVO")]
    Cash,
    /// Mobile wallet transfer
    #[serde(rename = "YAPE")]
    Yape,
    #[serde(rename = "TARJETA")]
    Card,
    /// Cash plus wallet
    #[serde(rename = "MIXTO")]
    Mixed,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Cash,
        PaymentMethod::Yape,
        PaymentMethod::Card,
        PaymentMethod::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "EFECTIVO",
            PaymentMethod::Yape => "YAPE",
            PaymentMethod::Card => "TARJETA",
            PaymentMethod::Mixed => "MIXTO",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Pago en efectivo en la clínica",
            PaymentMethod::Yape => "Transferencia por Yape",
            PaymentMethod::Card => "Tarjeta de débito o crédito",
            PaymentMethod::Mixed => "Parte en efectivo y parte por Yape",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("payment method", s))
    }
}

/// A billing document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: String,
    /// Series plus correlative, e.g. "B001-0000042"
    pub number: String,
    pub kind: InvoiceKind,
    pub appointment_id: Option<String>,
    pub patient_id: String,
    pub issued_at: NaiveDateTime,
    pub total: Decimal,
    pub paid: Decimal,
    pub pending: Decimal,
    pub status: PaymentStatus,
    pub description: Option<String>,
    pub lines: Vec<InvoiceLine>,
    pub audit: Audit,
}

impl Invoice {
    pub fn new(number: String, kind: InvoiceKind, patient_id: String, issued_at: NaiveDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            number,
            kind,
            appointment_id: None,
            patient_id,
            issued_at,
            total: Decimal::ZERO,
            paid: Decimal::ZERO,
            pending: Decimal::ZERO,
            status: PaymentStatus::Pending,
            description: None,
            lines: Vec::new(),
            audit: Audit::now(),
        }
    }

    /// Add a line and recompute totals.
    pub fn push_line(&mut self, mut line: InvoiceLine) {
        line.invoice_id = self.id.clone();
        self.lines.push(line);
        self.total = self.lines.iter().map(|l| l.subtotal).sum();
        self.pending = self.total - self.paid;
    }
}

/// One charged item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLine {
    pub id: String,
    pub invoice_id: String,
    pub item_kind: ItemKind,
    pub item_id: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub notes: Option<String>,
}

impl InvoiceLine {
    pub fn new(
        item_kind: ItemKind,
        item_id: String,
        description: String,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invoice_id: String::new(),
            item_kind,
            item_id,
            description,
            quantity,
            unit_price,
            subtotal: quantity * unit_price,
            notes: None,
        }
    }
}

/// A payment recorded against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub paid_at: NaiveDateTime,
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Wallet operation number
    pub reference: Option<String>,
    pub cash_amount: Option<Decimal>,
    pub wallet_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub audit: Audit,
}

impl Payment {
    pub fn new(invoice_id: String, amount: Decimal, method: PaymentMethod, paid_at: NaiveDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invoice_id,
            paid_at,
            amount,
            method,
            reference: None,
            cash_amount: None,
            wallet_amount: None,
            notes: None,
            audit: Audit::now(),
        }
    }
}
