//! Invoice, line and payment database operations.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

use super::{code_col, decimal_col, opt_decimal_col, timestamp, unique_violation, Database, DbResult};
use crate::models::{Invoice, InvoiceLine, Page, PageRequest, Payment};

const INVOICE_COLUMNS: &str = r#"
    id, number, kind, appointment_id, patient_id, issued_at, total, paid, pending,
    status, description, created_at, updated_at, created_by, updated_by
"#;

/// Invoices that still expect money.
const OPEN_STATUSES: &str = "('PENDIENTE', 'PAGADO_PARCIAL')";

fn invoice_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        number: row.get(1)?,
        kind: code_col(row, 2)?,
        appointment_id: row.get(3)?,
        patient_id: row.get(4)?,
        issued_at: row.get(5)?,
        total: decimal_col(row, 6)?,
        paid: decimal_col(row, 7)?,
        pending: decimal_col(row, 8)?,
        status: code_col(row, 9)?,
        description: row.get(10)?,
        lines: Vec::new(),
        audit: super::audit_cols(row, 11)?,
    })
}

fn line_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InvoiceLine> {
    Ok(InvoiceLine {
        id: row.get(0)?,
        invoice_id: row.get(1)?,
        item_kind: code_col(row, 2)?,
        item_id: row.get(3)?,
        description: row.get(4)?,
        quantity: decimal_col(row, 5)?,
        unit_price: decimal_col(row, 6)?,
        subtotal: decimal_col(row, 7)?,
        notes: row.get(8)?,
    })
}

fn payment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        invoice_id: row.get(1)?,
        paid_at: row.get(2)?,
        amount: decimal_col(row, 3)?,
        method: code_col(row, 4)?,
        reference: row.get(5)?,
        cash_amount: opt_decimal_col(row, 6)?,
        wallet_amount: opt_decimal_col(row, 7)?,
        notes: row.get(8)?,
        audit: super::audit_cols(row, 9)?,
    })
}

impl Database {
    /// Highest number issued in a series, deleted invoices included.
    ///
    /// Ordered by the numeric correlative so a widened suffix still sorts last.
    pub fn last_invoice_number(&self, series: &str) -> DbResult<Option<String>> {
        self.conn
            .query_row(
                r#"
                SELECT number FROM invoices
                WHERE number LIKE ?1
                ORDER BY CAST(substr(number, instr(number, '-') + 1) AS INTEGER) DESC
                LIMIT 1
                "#,
                [format!("{}-%", series)],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert an invoice and its lines.
    pub fn insert_invoice(&self, invoice: &Invoice) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO invoices (
                    id, number, kind, appointment_id, patient_id, issued_at, total, paid, pending,
                    status, description, created_at, updated_at, created_by, updated_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
                "#,
                params![
                    invoice.id,
                    invoice.number,
                    invoice.kind.as_str(),
                    invoice.appointment_id,
                    invoice.patient_id,
                    invoice.issued_at,
                    invoice.total.to_string(),
                    invoice.paid.to_string(),
                    invoice.pending.to_string(),
                    invoice.status.as_str(),
                    invoice.description,
                    invoice.audit.created_at,
                    invoice.audit.updated_at,
                    self.actor,
                ],
            )
            .map_err(|e| unique_violation(e, &format!("invoice {}", invoice.number)))?;

        for (position, line) in invoice.lines.iter().enumerate() {
            self.conn.execute(
                r#"
                INSERT INTO invoice_lines (
                    id, invoice_id, position, item_kind, item_id, description,
                    quantity, unit_price, subtotal, notes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    line.id,
                    invoice.id,
                    position as i64,
                    line.item_kind.as_str(),
                    line.item_id,
                    line.description,
                    line.quantity.to_string(),
                    line.unit_price.to_string(),
                    line.subtotal.to_string(),
                    line.notes,
                ],
            )?;
        }
        Ok(())
    }

    /// Persist amounts, status and description.
    pub fn update_invoice_state(&self, invoice: &Invoice) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE invoices SET
                paid = ?2,
                pending = ?3,
                status = ?4,
                description = ?5,
                updated_at = datetime('now'),
                updated_by = ?6
            WHERE id = ?1 AND deleted = 0
            "#,
            params![
                invoice.id,
                invoice.paid.to_string(),
                invoice.pending.to_string(),
                invoice.status.as_str(),
                invoice.description,
                self.actor,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get an invoice with its lines.
    pub fn get_invoice(&self, id: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("SELECT {} FROM invoices WHERE id = ? AND deleted = 0", INVOICE_COLUMNS);
        let invoice = self.conn.query_row(&sql, [id], invoice_from_row).optional()?;
        self.with_lines(invoice)
    }

    pub fn get_invoice_by_number(&self, number: &str) -> DbResult<Option<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE number = ? AND deleted = 0",
            INVOICE_COLUMNS
        );
        let invoice = self.conn.query_row(&sql, [number], invoice_from_row).optional()?;
        self.with_lines(invoice)
    }

    /// The live, non-voided invoice issued for an appointment.
    pub fn get_invoice_for_appointment(&self, appointment_id: &str) -> DbResult<Option<Invoice>> {
        let sql = format!(
            r#"
            SELECT {} FROM invoices
            WHERE appointment_id = ? AND deleted = 0 AND status != 'ANULADO'
            LIMIT 1
            "#,
            INVOICE_COLUMNS
        );
        let invoice = self
            .conn
            .query_row(&sql, [appointment_id], invoice_from_row)
            .optional()?;
        self.with_lines(invoice)
    }

    /// Invoices of a patient, newest first.
    pub fn list_invoices_for_patient(&self, patient_id: &str, page: PageRequest) -> DbResult<Page<Invoice>> {
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM invoices WHERE patient_id = ? AND deleted = 0",
            [patient_id],
            |row| row.get(0),
        )?;

        let sql = format!(
            r#"
            SELECT {} FROM invoices
            WHERE patient_id = ?1 AND deleted = 0
            ORDER BY issued_at DESC, rowid DESC
            LIMIT ?2 OFFSET ?3
            "#,
            INVOICE_COLUMNS
        );
        let invoices = self.collect_invoices(&sql, params![patient_id, page.limit(), page.offset()])?;
        Ok(Page::new(invoices, total as u64, page))
    }

    /// Open invoices of a patient with money still owed, oldest first.
    pub fn pending_invoices_for_patient(&self, patient_id: &str) -> DbResult<Vec<Invoice>> {
        let sql = format!(
            r#"
            SELECT {} FROM invoices
            WHERE patient_id = ?1 AND deleted = 0 AND status IN {}
            ORDER BY issued_at, rowid
            "#,
            INVOICE_COLUMNS, OPEN_STATUSES
        );
        let invoices = self.collect_invoices(&sql, params![patient_id])?;
        Ok(invoices.into_iter().filter(|i| i.pending > Decimal::ZERO).collect())
    }

    /// All open invoices, newest first.
    pub fn list_pending_invoices(&self, page: PageRequest) -> DbResult<Page<Invoice>> {
        let total: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM invoices WHERE deleted = 0 AND status IN {}",
                OPEN_STATUSES
            ),
            [],
            |row| row.get(0),
        )?;

        let sql = format!(
            r#"
            SELECT {} FROM invoices
            WHERE deleted = 0 AND status IN {}
            ORDER BY issued_at DESC, rowid DESC
            LIMIT ?1 OFFSET ?2
            "#,
            INVOICE_COLUMNS, OPEN_STATUSES
        );
        let invoices = self.collect_invoices(&sql, params![page.limit(), page.offset()])?;
        Ok(Page::new(invoices, total as u64, page))
    }

    /// Outstanding balance of every open invoice.
    pub fn open_invoice_balances(&self) -> DbResult<Vec<Decimal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT pending FROM invoices WHERE deleted = 0 AND status IN {}",
            OPEN_STATUSES
        ))?;
        let rows = stmt.query_map([], |row| decimal_col(row, 0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Amounts of payments received within `[from, to)`.
    pub fn payment_amounts_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> DbResult<Vec<Decimal>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.amount FROM payments p
            JOIN invoices i ON i.id = p.invoice_id
            WHERE i.deleted = 0 AND p.paid_at >= ?1 AND p.paid_at < ?2
            "#,
        )?;
        let rows = stmt.query_map(params![from, to], |row| decimal_col(row, 0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Invoices issued within `[from, to]`, oldest first.
    pub fn list_invoices_issued_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> DbResult<Vec<Invoice>> {
        let sql = format!(
            r#"
            SELECT {} FROM invoices
            WHERE deleted = 0 AND issued_at >= ?1 AND issued_at <= ?2
            ORDER BY issued_at, rowid
            "#,
            INVOICE_COLUMNS
        );
        self.collect_invoices(&sql, params![from, to])
    }

    pub fn soft_delete_invoice(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE invoices SET deleted = 1, deleted_at = ?2, updated_by = ?3
            WHERE id = ?1 AND deleted = 0
            "#,
            params![id, timestamp(), self.actor],
        )?;
        Ok(rows_affected > 0)
    }

    pub fn invoice_lines(&self, invoice_id: &str) -> DbResult<Vec<InvoiceLine>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, invoice_id, item_kind, item_id, description,
                   quantity, unit_price, subtotal, notes
            FROM invoice_lines
            WHERE invoice_id = ?
            ORDER BY position
            "#,
        )?;
        let rows = stmt.query_map([invoice_id], line_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    pub fn insert_payment(&self, payment: &Payment) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO payments (
                id, invoice_id, paid_at, amount, method, reference, cash_amount,
                wallet_amount, notes, created_at, updated_at, created_by, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            "#,
            params![
                payment.id,
                payment.invoice_id,
                payment.paid_at,
                payment.amount.to_string(),
                payment.method.as_str(),
                payment.reference,
                payment.cash_amount.map(|a| a.to_string()),
                payment.wallet_amount.map(|a| a.to_string()),
                payment.notes,
                payment.audit.created_at,
                payment.audit.updated_at,
                self.actor,
            ],
        )?;
        Ok(())
    }

    /// Payments of an invoice, oldest first.
    pub fn list_payments(&self, invoice_id: &str) -> DbResult<Vec<Payment>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, invoice_id, paid_at, amount, method, reference, cash_amount,
                   wallet_amount, notes, created_at, updated_at, created_by, updated_by
            FROM payments
            WHERE invoice_id = ?
            ORDER BY paid_at, rowid
            "#,
        )?;
        let rows = stmt.query_map([invoice_id], payment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn with_lines(&self, invoice: Option<Invoice>) -> DbResult<Option<Invoice>> {
        match invoice {
            Some(mut invoice) => {
                invoice.lines = self.invoice_lines(&invoice.id)?;
                Ok(Some(invoice))
            }
            None => Ok(None),
        }
    }

    fn collect_invoices(&self, sql: &str, params: impl rusqlite::Params) -> DbResult<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, invoice_from_row)?;

        let mut invoices = Vec::new();
        for row in rows {
            let mut invoice = row?;
            invoice.lines = self.invoice_lines(&invoice.id)?;
            invoices.push(invoice);
        }
        Ok(invoices)
    }
}
