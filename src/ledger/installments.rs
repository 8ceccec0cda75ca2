//! Installment plans: penalty accrual over elapsed overdue time and status
//! transitions derived from paid amount and due date.

use crate::error::CoreError;
use crate::ledger::balance::round2;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "installment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
    /// Terminal administrative override; never derived.
    Waived,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Partial => "partial",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Overdue => "overdue",
            InstallmentStatus::Waived => "waived",
        }
    }
}

/// One scheduled obligation within a fee plan.
#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct FeeInstallment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub fee_assignment_id: Uuid,
    pub sequence_number: i32,
    pub amount: Decimal,
    /// Monotonically non-decreasing.
    pub paid_amount: Decimal,
    pub penalty_accrued: Decimal,
    pub penalty_paid: Decimal,
    pub due_date: NaiveDate,
    /// Monthly penalty percentage.
    pub penalty_rate: Decimal,
    pub status: InstallmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Accrued penalty as of a date: zero on or before the due date, otherwise
/// `amount * rate/100` per started 30-day block. The month-unit always
/// rounds up, so one day overdue already accrues a full unit.
pub fn penalty_for(installment: &FeeInstallment, as_of: NaiveDate) -> Decimal {
    if as_of <= installment.due_date {
        return Decimal::ZERO;
    }
    let days_overdue = (as_of - installment.due_date).num_days();
    let month_units = (days_overdue + 29) / 30;
    round2(installment.amount * installment.penalty_rate / Decimal::from(100) * Decimal::from(month_units))
}

/// Unpaid principal, clamped at zero when overpaid. The excess of an
/// overpayment is not carried forward.
pub fn remaining_principal(installment: &FeeInstallment) -> Decimal {
    let remaining = installment.amount - installment.paid_amount;
    if remaining < Decimal::ZERO {
        Decimal::ZERO
    } else {
        remaining
    }
}

/// Status derived from paid amount and due date. Never returns `Waived`.
pub fn status_for(installment: &FeeInstallment, as_of: NaiveDate) -> InstallmentStatus {
    derive_status(
        installment.amount,
        installment.paid_amount,
        installment.due_date,
        as_of,
    )
}

fn derive_status(
    amount: Decimal,
    paid_amount: Decimal,
    due_date: NaiveDate,
    as_of: NaiveDate,
) -> InstallmentStatus {
    if paid_amount >= amount {
        InstallmentStatus::Paid
    } else if paid_amount > Decimal::ZERO {
        InstallmentStatus::Partial
    } else if as_of > due_date {
        InstallmentStatus::Overdue
    } else {
        InstallmentStatus::Pending
    }
}

/// Status to persist after a mutation: re-derived, except that `Waived` is
/// terminal and survives every mutation.
pub fn next_status(
    current: InstallmentStatus,
    amount: Decimal,
    paid_amount: Decimal,
    due_date: NaiveDate,
    as_of: NaiveDate,
) -> InstallmentStatus {
    if current == InstallmentStatus::Waived {
        InstallmentStatus::Waived
    } else {
        derive_status(amount, paid_amount, due_date, as_of)
    }
}

/// One installment to create within a plan.
#[derive(Clone, Debug, Deserialize)]
pub struct NewInstallment {
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

pub struct InstallmentScheduler;

impl InstallmentScheduler {
    /// Create an installment plan for one fee assignment, sequenced in the
    /// given order, all rows in one transaction.
    pub async fn create_plan(
        pool: &PgPool,
        student_id: Uuid,
        fee_assignment_id: Uuid,
        penalty_rate: Decimal,
        installments: Vec<NewInstallment>,
    ) -> Result<Vec<FeeInstallment>, CoreError> {
        if installments.is_empty() {
            return Err(CoreError::Validation(
                "a plan needs at least one installment".into(),
            ));
        }
        if installments.iter().any(|i| i.amount <= Decimal::ZERO) {
            return Err(CoreError::Validation(
                "installment amounts must be positive".into(),
            ));
        }
        let mut out = Vec::with_capacity(installments.len());
        let mut tx = pool.begin().await?;
        for (i, item) in installments.into_iter().enumerate() {
            let row: FeeInstallment = sqlx::query_as(
                "INSERT INTO fee_installments
                     (id, student_id, fee_assignment_id, sequence_number, amount, due_date, penalty_rate, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(fee_assignment_id)
            .bind((i + 1) as i32)
            .bind(item.amount)
            .bind(item.due_date)
            .bind(penalty_rate)
            .fetch_one(&mut *tx)
            .await?;
            out.push(row);
        }
        tx.commit().await?;
        Ok(out)
    }

    /// Installments past their due date and not settled, ordered by due date
    /// ascending, optionally scoped to one student. Stored statuses lag
    /// behind the derived value between mutations, so everything not paid
    /// and not waived counts.
    pub async fn find_overdue(
        pool: &PgPool,
        student_id: Option<Uuid>,
    ) -> Result<Vec<FeeInstallment>, CoreError> {
        let today = Utc::now().date_naive();
        let rows = match student_id {
            Some(student) => {
                sqlx::query_as(
                    "SELECT * FROM fee_installments
                     WHERE status NOT IN ('paid', 'waived') AND due_date < $1 AND student_id = $2
                     ORDER BY due_date, sequence_number",
                )
                .bind(today)
                .bind(student)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM fee_installments
                     WHERE status NOT IN ('paid', 'waived') AND due_date < $1
                     ORDER BY due_date, sequence_number",
                )
                .bind(today)
                .fetch_all(pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Apply a payment to an installment. The stored status is re-derived
    /// from the new paid amount before persisting; the row is locked for the
    /// read-modify-write so paid_amount stays monotonic under concurrency.
    pub async fn apply_payment(
        pool: &PgPool,
        installment_id: Uuid,
        amount: Decimal,
    ) -> Result<FeeInstallment, CoreError> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::Validation("amount must be positive".into()));
        }
        let mut tx = pool.begin().await?;
        let current: Option<FeeInstallment> =
            sqlx::query_as("SELECT * FROM fee_installments WHERE id = $1 FOR UPDATE")
                .bind(installment_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Err(CoreError::NotFound(format!(
                "installment {}",
                installment_id
            )));
        };
        let paid_amount = current.paid_amount + amount;
        if paid_amount > current.amount {
            tracing::warn!(
                installment = %installment_id,
                excess = %(paid_amount - current.amount),
                "installment overpaid; excess is not carried forward"
            );
        }
        let status = next_status(
            current.status,
            current.amount,
            paid_amount,
            current.due_date,
            Utc::now().date_naive(),
        );
        let updated: FeeInstallment = sqlx::query_as(
            "UPDATE fee_installments
             SET paid_amount = $2, status = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(installment_id)
        .bind(paid_amount)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Write the current accrued penalty into every unsettled overdue row,
    /// re-deriving status along the way. Returns the number of rows touched.
    pub async fn accrue_penalties(pool: &PgPool, as_of: NaiveDate) -> Result<u64, CoreError> {
        let rows: Vec<FeeInstallment> = sqlx::query_as(
            "SELECT * FROM fee_installments
             WHERE status NOT IN ('paid', 'waived') AND due_date < $1
             ORDER BY due_date, sequence_number",
        )
        .bind(as_of)
        .fetch_all(pool)
        .await?;

        let mut touched = 0u64;
        let mut tx = pool.begin().await?;
        for row in rows {
            let penalty = penalty_for(&row, as_of);
            let status = next_status(row.status, row.amount, row.paid_amount, row.due_date, as_of);
            sqlx::query(
                "UPDATE fee_installments
                 SET penalty_accrued = $2, status = $3, updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(row.id)
            .bind(penalty)
            .bind(status)
            .execute(&mut *tx)
            .await?;
            touched += 1;
        }
        tx.commit().await?;
        tracing::info!(count = touched, as_of = %as_of, "penalties accrued");
        Ok(touched)
    }

    /// Administrative waiver: the only path to `Waived`, bypassing
    /// derivation.
    pub async fn waive(pool: &PgPool, installment_id: Uuid) -> Result<FeeInstallment, CoreError> {
        let row: Option<FeeInstallment> = sqlx::query_as(
            "UPDATE fee_installments SET status = 'waived', updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(installment_id)
        .fetch_optional(pool)
        .await?;
        row.ok_or_else(|| CoreError::NotFound(format!("installment {}", installment_id)))
    }
}
