//! Invoices (comprobantes) and payments.
//!
//! An invoice is issued either for an attended appointment or for a counter
//! sale. Payments reduce the pending balance until it reaches zero; an invoice
//! without payments can be voided, which returns any sold supplies to stock.

mod export;
mod numbering;

pub use export::*;
pub use numbering::*;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Database, DbError};
use crate::inventory::{InventoryError, MovementRequest, Stock};
use crate::models::{
    AppointmentStatus, Invoice, InvoiceKind, InvoiceLine, ItemKind, MovementKind, Page, PageRequest,
    Payment, PaymentMethod, PaymentStatus,
};

/// Movement reason for supplies sold at the counter.
pub const DIRECT_SALE_REASON: &str = "Venta Directa";
/// Movement reason for supplies returned when a sale is voided.
pub const VOID_SALE_REASON: &str = "Anulación de Venta";

/// Billing errors.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidState(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

/// Parse an item kind code coming from a form or the FFI.
pub fn parse_item_kind(code: &str) -> BillingResult<ItemKind> {
    code.trim().to_uppercase().parse::<ItemKind>().map_err(|_| {
        BillingError::Validation(format!(
            "Tipo de ítem no soportado: {}. Solo se permiten 'INSUMO' o 'PROCEDIMIENTO'",
            code
        ))
    })
}

/// A requested invoice line. Missing description and price come from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRequest {
    pub item_kind: ItemKind,
    pub item_id: String,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub notes: Option<String>,
}

impl LineRequest {
    pub fn supply(item_id: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            item_kind: ItemKind::Supply,
            item_id: item_id.into(),
            description: None,
            quantity,
            unit_price: None,
            notes: None,
        }
    }

    pub fn procedure(item_id: impl Into<String>) -> Self {
        Self {
            item_kind: ItemKind::Procedure,
            item_id: item_id.into(),
            description: None,
            quantity: Decimal::ONE,
            unit_price: None,
            notes: None,
        }
    }

    pub fn price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

/// A payment to apply to an invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub invoice_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Defaults to now
    pub paid_at: Option<NaiveDateTime>,
    /// Yape operation number
    pub reference: Option<String>,
    pub cash_amount: Option<Decimal>,
    pub wallet_amount: Option<Decimal>,
    pub notes: Option<String>,
}

impl PaymentRequest {
    pub fn new(invoice_id: impl Into<String>, amount: Decimal, method: PaymentMethod) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            amount,
            method,
            paid_at: None,
            reference: None,
            cash_amount: None,
            wallet_amount: None,
            notes: None,
        }
    }
}

/// Billing service.
pub struct Billing<'a> {
    db: &'a Database,
    series: String,
    now: Option<NaiveDateTime>,
}

impl<'a> Billing<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            series: DEFAULT_SERIES.to_string(),
            now: None,
        }
    }

    /// Pin the issue/payment clock.
    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> NaiveDateTime {
        self.now
            .unwrap_or_else(|| chrono::Local::now().naive_local())
    }

    fn next_number(&self, db: &Database) -> BillingResult<String> {
        let last = db.last_invoice_number(&self.series)?;
        Ok(next_number(&self.series, last.as_deref()))
    }

    /// Invoice an attended appointment: its procedure at base price plus extra supplies.
    ///
    /// Supplies billed here are not deducted from stock.
    pub fn invoice_from_appointment(&self, appointment_id: &str, extra_lines: &[LineRequest]) -> BillingResult<Invoice> {
        self.db.atomic(|db| {
            let appointment = db.get_appointment(appointment_id)?.ok_or_else(|| {
                BillingError::NotFound(format!("Cita no encontrada con ID: {}", appointment_id))
            })?;

            if appointment.status != AppointmentStatus::Attended {
                return Err(BillingError::InvalidState(format!(
                    "La cita no está marcada como 'ASISTIO'. No se puede generar comprobante. Estado actual: {}",
                    appointment.status
                )));
            }
            if let Some(existing) = db.get_invoice_for_appointment(appointment_id)? {
                return Err(BillingError::InvalidState(format!(
                    "Ya existe un comprobante generado para esta cita: {}",
                    existing.number
                )));
            }

            let mut invoice = Invoice::new(
                self.next_number(db)?,
                InvoiceKind::Appointment,
                appointment.patient_id.clone(),
                self.now(),
            );
            invoice.appointment_id = Some(appointment.id.clone());

            let procedure = db.get_procedure(&appointment.procedure_id)?.ok_or_else(|| {
                BillingError::NotFound(format!("Procedimiento no encontrado con ID: {}", appointment.procedure_id))
            })?;
            invoice.push_line(InvoiceLine::new(
                ItemKind::Procedure,
                procedure.id.clone(),
                procedure.name.clone(),
                Decimal::ONE,
                procedure.base_price,
            ));

            for request in extra_lines {
                if request.item_kind != ItemKind::Supply {
                    return Err(BillingError::Validation(format!(
                        "Solo se permiten detalles adicionales de tipo INSUMO. Tipo recibido: {}",
                        request.item_kind.as_str()
                    )));
                }
                invoice.push_line(self.supply_line(db, request)?);
            }

            invoice.description = Some(format!("Comprobante generado desde cita: {}", appointment.id));
            db.insert_invoice(&invoice)?;

            info!(number = %invoice.number, appointment_id = %appointment.id, total = %invoice.total, "Invoice issued for appointment");
            Ok(invoice)
        })
    }

    /// Counter sale. Supplies leave stock immediately; any shortage cancels the sale.
    pub fn direct_sale(&self, patient_id: &str, lines: &[LineRequest], notes: Option<&str>) -> BillingResult<Invoice> {
        if lines.is_empty() {
            return Err(BillingError::Validation(
                "El comprobante debe tener al menos un detalle".into(),
            ));
        }
        for line in lines {
            if line.item_id.trim().is_empty() {
                return Err(BillingError::Validation(
                    "El ID del ítem es obligatorio en cada detalle".into(),
                ));
            }
            if line.quantity <= Decimal::ZERO {
                return Err(BillingError::Validation("La cantidad debe ser positiva".into()));
            }
            if line.unit_price.is_some_and(|p| p < Decimal::ZERO) {
                return Err(BillingError::Validation(
                    "El precio unitario no puede ser negativo".into(),
                ));
            }
        }

        self.db.atomic(|db| {
            db.get_patient(patient_id)?.ok_or_else(|| {
                BillingError::NotFound(format!("Paciente no encontrado con ID: {}", patient_id))
            })?;

            let mut invoice = Invoice::new(
                self.next_number(db)?,
                InvoiceKind::DirectSale,
                patient_id.to_string(),
                self.now(),
            );
            invoice.description = notes.map(str::to_string);

            let stock = Stock::new(db);
            for request in lines {
                let line = match request.item_kind {
                    ItemKind::Supply => {
                        let line = self.supply_line(db, request)?;
                        stock.register_movement(
                            MovementRequest::new(
                                line.item_id.clone(),
                                MovementKind::Outbound,
                                DIRECT_SALE_REASON,
                                line.quantity,
                            )
                            .reference(format!("Venta POS: {}", invoice.number)),
                        )?;
                        line
                    }
                    ItemKind::Procedure => self.procedure_line(db, request)?,
                };
                invoice.push_line(line);
            }

            db.insert_invoice(&invoice)?;

            info!(number = %invoice.number, lines = invoice.lines.len(), total = %invoice.total, "Direct sale invoiced");
            Ok(invoice)
        })
    }

    fn supply_line(&self, db: &Database, request: &LineRequest) -> BillingResult<InvoiceLine> {
        let supply = db.get_supply(&request.item_id)?.ok_or_else(|| {
            BillingError::NotFound(format!("Insumo no encontrado con ID: {}", request.item_id))
        })?;

        let mut line = InvoiceLine::new(
            ItemKind::Supply,
            supply.id.clone(),
            non_blank(&request.description).unwrap_or_else(|| supply.name.clone()),
            request.quantity,
            request.unit_price.unwrap_or(supply.unit_price),
        );
        line.notes = request.notes.clone();
        Ok(line)
    }

    fn procedure_line(&self, db: &Database, request: &LineRequest) -> BillingResult<InvoiceLine> {
        let procedure = db.get_procedure(&request.item_id)?.ok_or_else(|| {
            BillingError::NotFound(format!("Procedimiento no encontrado con ID: {}", request.item_id))
        })?;

        let mut line = InvoiceLine::new(
            ItemKind::Procedure,
            procedure.id.clone(),
            non_blank(&request.description).unwrap_or_else(|| procedure.name.clone()),
            request.quantity,
            request.unit_price.unwrap_or(procedure.base_price),
        );
        line.notes = request.notes.clone();
        Ok(line)
    }

    /// Apply a payment and move the invoice to PAGADO_PARCIAL or PAGADO_TOTAL.
    pub fn register_payment(&self, request: PaymentRequest) -> BillingResult<Payment> {
        if request.amount <= Decimal::ZERO {
            return Err(BillingError::Validation("El monto del pago debe ser positivo".into()));
        }

        self.db.atomic(|db| {
            let mut invoice = self.load(db, &request.invoice_id)?;

            if matches!(invoice.status, PaymentStatus::Voided | PaymentStatus::Paid) {
                return Err(BillingError::InvalidState(format!(
                    "No se pueden registrar pagos para un comprobante ANULADO o que ya está PAGADO TOTALMENTE. Estado actual: {}",
                    invoice.status
                )));
            }
            if request.amount > invoice.pending {
                return Err(BillingError::Validation(format!(
                    "El monto del pago (S/ {}) no puede ser mayor que el saldo pendiente (S/ {})",
                    request.amount, invoice.pending
                )));
            }

            let mut payment = Payment::new(
                invoice.id.clone(),
                request.amount,
                request.method,
                request.paid_at.unwrap_or_else(|| self.now()),
            );
            payment.reference = request.reference.clone();
            payment.cash_amount = request.cash_amount;
            payment.wallet_amount = request.wallet_amount;
            payment.notes = request.notes.clone();
            db.insert_payment(&payment)?;

            invoice.paid += request.amount;
            invoice.pending -= request.amount;
            invoice.status = PaymentStatus::after_payment(invoice.pending);
            db.update_invoice_state(&invoice)?;

            info!(
                number = %invoice.number,
                amount = %payment.amount,
                method = payment.method.as_str(),
                status = %invoice.status,
                "Payment registered"
            );
            Ok(payment)
        })
    }

    /// Void an invoice that has no payments.
    pub fn void_invoice(&self, id: &str, reason: &str) -> BillingResult<Invoice> {
        self.db.atomic(|db| {
            let mut invoice = self.load(db, id)?;

            if invoice.status == PaymentStatus::Voided {
                return Err(BillingError::InvalidState(
                    "El comprobante ya se encuentra anulado".into(),
                ));
            }
            let payments = db.list_payments(&invoice.id)?;
            if !payments.is_empty() {
                warn!(number = %invoice.number, payments = payments.len(), "Void rejected: invoice has payments");
                return Err(BillingError::InvalidState(format!(
                    "No se puede anular un comprobante que ya tiene pagos registrados. Debe revertir los pagos primero. Pagos encontrados: {}",
                    payments.len()
                )));
            }

            if invoice.kind == InvoiceKind::DirectSale {
                let stock = Stock::new(db);
                for line in invoice.lines.iter().filter(|l| l.item_kind == ItemKind::Supply) {
                    stock.register_movement(
                        MovementRequest::new(
                            line.item_id.clone(),
                            MovementKind::Inbound,
                            VOID_SALE_REASON,
                            line.quantity,
                        )
                        .reference(format!("Anulación de {}", invoice.number)),
                    )?;
                }
            }

            invoice.status = PaymentStatus::Voided;
            invoice.pending = Decimal::ZERO;
            invoice.description = Some(match invoice.description.as_deref() {
                Some(existing) if !existing.is_empty() => format!("{} | ANULADO: {}", existing, reason),
                _ => format!("ANULADO: {}", reason),
            });
            db.update_invoice_state(&invoice)?;

            info!(number = %invoice.number, "Invoice voided");
            Ok(invoice)
        })
    }

    fn load(&self, db: &Database, id: &str) -> BillingResult<Invoice> {
        db.get_invoice(id)?
            .ok_or_else(|| BillingError::NotFound(format!("Comprobante no encontrado con ID: {}", id)))
    }

    pub fn get(&self, id: &str) -> BillingResult<Invoice> {
        self.load(self.db, id)
    }

    pub fn by_number(&self, number: &str) -> BillingResult<Invoice> {
        if number.trim().is_empty() {
            return Err(BillingError::Validation(
                "El número de comprobante no puede ser nulo o vacío".into(),
            ));
        }
        self.db
            .get_invoice_by_number(number.trim())?
            .ok_or_else(|| BillingError::NotFound(format!("Comprobante no encontrado: {}", number)))
    }

    pub fn by_patient(&self, patient_id: &str, page: PageRequest) -> BillingResult<Page<Invoice>> {
        Ok(self.db.list_invoices_for_patient(patient_id, page)?)
    }

    /// Open invoices of a patient with a balance left.
    pub fn pending_for_patient(&self, patient_id: &str) -> BillingResult<Vec<Invoice>> {
        Ok(self.db.pending_invoices_for_patient(patient_id)?)
    }

    pub fn payments(&self, invoice_id: &str) -> BillingResult<Vec<Payment>> {
        Ok(self.db.list_payments(invoice_id)?)
    }

    pub fn all_pending(&self, page: PageRequest) -> BillingResult<Page<Invoice>> {
        Ok(self.db.list_pending_invoices(page)?)
    }

    /// Invoices issued in `[from, to]` for export.
    pub fn export(&self, from: NaiveDateTime, to: NaiveDateTime) -> BillingResult<BatchInvoiceExport> {
        let invoices = self.db.list_invoices_issued_between(from, to)?;
        info!(count = invoices.len(), "Exporting invoices");
        Ok(BatchInvoiceExport::new(invoices))
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
