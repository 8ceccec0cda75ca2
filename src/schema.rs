//! Idempotent DDL for the system database and for each tenant database.

use crate::error::CoreError;
use sqlx::PgPool;

/// Enum types used by the ledger tables. CREATE TYPE has no IF NOT EXISTS,
/// so each statement is attempted and an "already exists" failure ignored.
const ENUM_TYPES: &[(&str, &[&str])] = &[
    (
        "transaction_type",
        &[
            "payment", "refund", "adjustment", "waiver", "discount", "late_fee", "advance",
            "transfer",
        ],
    ),
    (
        "transaction_status",
        &["pending", "completed", "failed", "cancelled"],
    ),
    (
        "installment_status",
        &["pending", "partial", "paid", "overdue", "waived"],
    ),
];

/// Create the tenant catalog in the system database.
pub async fn ensure_system_tables(pool: &PgPool) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id UUID PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Create the ledger, installment, and configuration tables in one tenant
/// database.
pub async fn ensure_tenant_tables(pool: &PgPool) -> Result<(), CoreError> {
    for (name, values) in ENUM_TYPES {
        let quoted: Vec<String> = values.iter().map(|v| format!("'{}'", v)).collect();
        let sql = format!("CREATE TYPE {} AS ENUM ({})", name, quoted.join(", "));
        let _ = sqlx::query(&sql).execute(pool).await;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fee_transactions (
            id UUID PRIMARY KEY,
            transaction_number TEXT NOT NULL UNIQUE,
            receipt_number TEXT,
            student_id UUID NOT NULL,
            fee_assignment_id UUID NOT NULL,
            academic_year TEXT NOT NULL,
            transaction_type transaction_type NOT NULL,
            amount NUMERIC(12,2) NOT NULL,
            balance_effect NUMERIC(12,2),
            payment_method TEXT,
            status transaction_status NOT NULL,
            transaction_date TIMESTAMPTZ NOT NULL,
            balance_before NUMERIC(12,2),
            balance_after NUMERIC(12,2),
            period_covered TEXT,
            component_breakdown JSONB,
            is_reversed BOOLEAN NOT NULL DEFAULT FALSE,
            reversed_by UUID,
            reversed_at TIMESTAMPTZ,
            reversal_reason TEXT,
            reversal_of TEXT,
            created_seq BIGSERIAL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Receipt numbers are unique among payments; other types leave it NULL.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_fee_transactions_receipt
         ON fee_transactions (receipt_number) WHERE receipt_number IS NOT NULL",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fee_transactions_student_year
         ON fee_transactions (student_id, academic_year)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fee_transactions_assignment
         ON fee_transactions (fee_assignment_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fee_installments (
            id UUID PRIMARY KEY,
            student_id UUID NOT NULL,
            fee_assignment_id UUID NOT NULL,
            sequence_number INT NOT NULL,
            amount NUMERIC(12,2) NOT NULL,
            paid_amount NUMERIC(12,2) NOT NULL DEFAULT 0,
            penalty_accrued NUMERIC(12,2) NOT NULL DEFAULT 0,
            penalty_paid NUMERIC(12,2) NOT NULL DEFAULT 0,
            due_date DATE NOT NULL,
            penalty_rate NUMERIC(5,2) NOT NULL DEFAULT 0,
            status installment_status NOT NULL DEFAULT 'pending',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (fee_assignment_id, sequence_number)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fee_installments_due
         ON fee_installments (due_date) WHERE status NOT IN ('paid', 'waived')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenant_configuration (
            id INT PRIMARY KEY CHECK (id = 1),
            settings JSONB NOT NULL,
            version BIGINT NOT NULL DEFAULT 1,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS custom_fields (
            id UUID PRIMARY KEY,
            entity_type TEXT NOT NULL,
            field_name TEXT NOT NULL,
            label TEXT NOT NULL,
            field_type TEXT NOT NULL,
            required BOOLEAN NOT NULL DEFAULT FALSE,
            options JSONB,
            position INT NOT NULL DEFAULT 0,
            UNIQUE (entity_type, field_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
