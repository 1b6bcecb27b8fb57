//! SQLite schema definition.

/// Complete database schema for the clinic.
///
/// Soft-deletable tables carry `deleted`/`deleted_at`; uniqueness of business keys
/// only applies to live rows. Money and stock quantities are decimal strings.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Access control
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT,
    password_hash TEXT,                           -- Argon2 PHC string
    active INTEGER NOT NULL DEFAULT 1,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    locked_at TEXT,
    valid_until TEXT,                             -- account expiry date
    must_change_password INTEGER NOT NULL DEFAULT 0,
    weekly_schedule TEXT NOT NULL DEFAULT '{"days":[null,null,null,null,null,null,null]}',
    token_hash TEXT,                              -- SHA-256 of activation/reset token
    token_expires_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_live ON users(email) WHERE deleted = 0;
CREATE INDEX IF NOT EXISTS idx_users_token ON users(token_hash);

CREATE TABLE IF NOT EXISTS roles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_roles_name_live ON roles(name) WHERE deleted = 0;

CREATE TABLE IF NOT EXISTS permissions (
    id TEXT PRIMARY KEY,
    module TEXT NOT NULL,
    action TEXT NOT NULL,
    UNIQUE (module, action)
);

CREATE TABLE IF NOT EXISTS role_permissions (
    role_id TEXT NOT NULL REFERENCES roles(id),
    permission_id TEXT NOT NULL REFERENCES permissions(id),
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS user_roles (
    user_id TEXT NOT NULL REFERENCES users(id),
    role_id TEXT NOT NULL REFERENCES roles(id),
    PRIMARY KEY (user_id, role_id)
);

CREATE TABLE IF NOT EXISTS schedule_exceptions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    date TEXT NOT NULL,
    hours TEXT NOT NULL,                          -- "09:00-12:00" or NO_LABORABLE
    reason TEXT,
    UNIQUE (user_id, date)
);

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    user_id TEXT UNIQUE REFERENCES users(id),
    document_type TEXT NOT NULL,
    document_number TEXT NOT NULL,
    full_name TEXT NOT NULL,
    email TEXT,
    phone TEXT,
    birth_date TEXT,
    address TEXT,
    allergies TEXT,
    medical_history TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_document_live
    ON patients(document_type, document_number) WHERE deleted = 0;
CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_email_live
    ON patients(email) WHERE deleted = 0 AND email IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(full_name);

-- ============================================================================
-- Inventory
-- ============================================================================

CREATE TABLE IF NOT EXISTS supplies (
    id TEXT PRIMARY KEY,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    brand TEXT,
    location TEXT,
    lot TEXT,
    expires_on TEXT,
    current_stock TEXT NOT NULL DEFAULT '0',
    minimum_stock TEXT NOT NULL DEFAULT '0',
    unit_price TEXT NOT NULL DEFAULT '0',
    unit TEXT NOT NULL,
    category TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_supplies_code_live ON supplies(code) WHERE deleted = 0;

-- Append-only stock ledger
CREATE TABLE IF NOT EXISTS stock_movements (
    id TEXT PRIMARY KEY,
    supply_id TEXT NOT NULL REFERENCES supplies(id),
    kind TEXT NOT NULL CHECK (kind IN ('ENTRADA', 'SALIDA', 'AJUSTE')),
    reason TEXT NOT NULL,
    quantity TEXT NOT NULL,
    stock_before TEXT NOT NULL,
    stock_after TEXT NOT NULL,
    reference TEXT,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_movements_supply ON stock_movements(supply_id, created_at);

-- ============================================================================
-- Procedures
-- ============================================================================

CREATE TABLE IF NOT EXISTS procedures (
    id TEXT PRIMARY KEY,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    base_price TEXT NOT NULL DEFAULT '0',
    duration_minutes INTEGER NOT NULL DEFAULT 30,
    category TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_procedures_code_live ON procedures(code) WHERE deleted = 0;

CREATE TABLE IF NOT EXISTS procedure_supplies (
    procedure_id TEXT NOT NULL REFERENCES procedures(id),
    supply_id TEXT NOT NULL REFERENCES supplies(id),
    default_quantity TEXT NOT NULL,
    PRIMARY KEY (procedure_id, supply_id)
);

-- ============================================================================
-- Appointments
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    dentist_id TEXT NOT NULL REFERENCES users(id),
    procedure_id TEXT NOT NULL REFERENCES procedures(id),
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    status TEXT NOT NULL,
    reason TEXT,
    notes TEXT,
    cancellation_reason TEXT,
    rescheduled_to TEXT REFERENCES appointments(id),
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_appointments_dentist_start ON appointments(dentist_id, start_at);
CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id, start_at);
CREATE INDEX IF NOT EXISTS idx_appointments_status ON appointments(status);

-- ============================================================================
-- Treatments
-- ============================================================================

CREATE TABLE IF NOT EXISTS performed_treatments (
    id TEXT PRIMARY KEY,
    appointment_id TEXT REFERENCES appointments(id),
    patient_id TEXT NOT NULL REFERENCES patients(id),
    procedure_id TEXT NOT NULL REFERENCES procedures(id),
    dentist_id TEXT NOT NULL REFERENCES users(id),
    teeth TEXT,
    description TEXT,
    performed_at TEXT NOT NULL,
    adjusted_supply_id TEXT REFERENCES supplies(id),
    adjusted_quantity TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_performed_appointment ON performed_treatments(appointment_id);
CREATE INDEX IF NOT EXISTS idx_performed_patient ON performed_treatments(patient_id, performed_at);

CREATE TABLE IF NOT EXISTS planned_treatments (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    procedure_id TEXT NOT NULL REFERENCES procedures(id),
    dentist_id TEXT REFERENCES users(id),
    teeth TEXT,
    description TEXT,
    planned_for TEXT,
    status TEXT NOT NULL,
    appointment_id TEXT REFERENCES appointments(id),
    performed_treatment_id TEXT REFERENCES performed_treatments(id),
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_planned_appointment ON planned_treatments(appointment_id);
CREATE INDEX IF NOT EXISTS idx_planned_patient ON planned_treatments(patient_id);

-- ============================================================================
-- Billing
-- ============================================================================

CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    number TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL CHECK (kind IN ('CITA', 'VENTA_DIRECTA')),
    appointment_id TEXT REFERENCES appointments(id),
    patient_id TEXT NOT NULL REFERENCES patients(id),
    issued_at TEXT NOT NULL,
    total TEXT NOT NULL,
    paid TEXT NOT NULL,
    pending TEXT NOT NULL,
    status TEXT NOT NULL,
    description TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_invoices_patient ON invoices(patient_id, issued_at);
CREATE INDEX IF NOT EXISTS idx_invoices_appointment ON invoices(appointment_id);
CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(status);

CREATE TABLE IF NOT EXISTS invoice_lines (
    id TEXT PRIMARY KEY,
    invoice_id TEXT NOT NULL REFERENCES invoices(id),
    position INTEGER NOT NULL,
    item_kind TEXT NOT NULL CHECK (item_kind IN ('PROCEDIMIENTO', 'INSUMO')),
    item_id TEXT NOT NULL,
    description TEXT NOT NULL,
    quantity TEXT NOT NULL,
    unit_price TEXT NOT NULL,
    subtotal TEXT NOT NULL,
    notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice ON invoice_lines(invoice_id, position);

CREATE TABLE IF NOT EXISTS payments (
    id TEXT PRIMARY KEY,
    invoice_id TEXT NOT NULL REFERENCES invoices(id),
    paid_at TEXT NOT NULL,
    amount TEXT NOT NULL,
    method TEXT NOT NULL,
    reference TEXT,
    cash_amount TEXT,
    wallet_amount TEXT,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id, paid_at);

-- ============================================================================
-- Odontogram
-- ============================================================================

CREATE TABLE IF NOT EXISTS tooth_records (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    tooth INTEGER NOT NULL,
    state TEXT NOT NULL,
    surfaces TEXT,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_by TEXT,
    updated_by TEXT,
    UNIQUE (patient_id, tooth)
);

-- Append-only
CREATE TABLE IF NOT EXISTS tooth_history (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    tooth INTEGER NOT NULL,
    previous_state TEXT,
    new_state TEXT NOT NULL,
    notes TEXT,
    changed_at TEXT NOT NULL,
    changed_by TEXT,
    performed_treatment_id TEXT REFERENCES performed_treatments(id)
);

CREATE INDEX IF NOT EXISTS idx_tooth_history ON tooth_history(patient_id, tooth, changed_at);

-- ============================================================================
-- Chat
-- ============================================================================

CREATE TABLE IF NOT EXISTS chat_messages (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    user_message TEXT NOT NULL,
    bot_reply TEXT NOT NULL,
    sent_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_chat_patient ON chat_messages(patient_id, sent_at);
"#;
