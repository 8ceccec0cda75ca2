//! Ledger operations against one tenant's database.

use crate::error::CoreError;
use crate::ledger::balance;
use crate::ledger::numbering;
use crate::ledger::transaction::{
    FeeTransaction, TransactionInput, TransactionStatus, TransactionType,
};
use crate::ledger::validation;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

const INSERT_SQL: &str = r#"
INSERT INTO fee_transactions (
    id, transaction_number, receipt_number, student_id, fee_assignment_id,
    academic_year, transaction_type, amount, balance_effect, payment_method,
    status, transaction_date, balance_before, balance_after, period_covered,
    component_breakdown, is_reversed, reversal_of
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, FALSE, $17)
RETURNING *
"#;

/// Partial unique index guarding receipt numbers among payments.
const RECEIPT_INDEX: &str = "idx_fee_transactions_receipt";

pub struct FeeLedger;

impl FeeLedger {
    /// Record a payment. Numbers and the date are generated when absent;
    /// the persisted row is returned.
    pub async fn record_payment(
        pool: &PgPool,
        mut input: TransactionInput,
    ) -> Result<FeeTransaction, CoreError> {
        input.transaction_type = TransactionType::Payment;
        Self::record(pool, input).await
    }

    /// Record any ledger entry. A number collision at insert time retries
    /// with a fresh suffix rather than failing the operation.
    pub async fn record(
        pool: &PgPool,
        input: TransactionInput,
    ) -> Result<FeeTransaction, CoreError> {
        validation::validate(&input)?;
        let date = input.transaction_date.unwrap_or_else(Utc::now);
        let status = input.status.unwrap_or(TransactionStatus::Completed);
        let before =
            Self::outstanding_balance(pool, input.student_id, &input.academic_year).await?;
        let delta = if status == TransactionStatus::Completed {
            balance::signed_effect(input.transaction_type, input.amount, input.balance_effect)
                .unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        let after = balance::round2(before + delta);

        for attempt in 1..=numbering::MAX_ATTEMPTS {
            let transaction_number = input
                .transaction_number
                .clone()
                .unwrap_or_else(|| numbering::transaction_number(date));
            let receipt_number = match input.transaction_type {
                TransactionType::Payment => Some(
                    input
                        .receipt_number
                        .clone()
                        .unwrap_or_else(|| numbering::receipt_number(date)),
                ),
                _ => None,
            };
            let res = sqlx::query_as::<_, FeeTransaction>(INSERT_SQL)
                .bind(Uuid::new_v4())
                .bind(&transaction_number)
                .bind(&receipt_number)
                .bind(input.student_id)
                .bind(input.fee_assignment_id)
                .bind(&input.academic_year)
                .bind(input.transaction_type)
                .bind(input.amount)
                .bind(input.balance_effect)
                .bind(&input.payment_method)
                .bind(status)
                .bind(date)
                .bind(before)
                .bind(after)
                .bind(&input.period_covered)
                .bind(&input.component_breakdown)
                .bind(Option::<String>::None)
                .fetch_one(pool)
                .await;
            match res {
                Ok(row) => {
                    tracing::info!(
                        number = %row.transaction_number,
                        student = %row.student_id,
                        amount = %row.amount,
                        kind = row.transaction_type.as_str(),
                        "transaction recorded"
                    );
                    return Ok(row);
                }
                Err(e) if is_unique_violation(&e) => {
                    let constraint = violated_constraint(&e);
                    let receipt_conflict = constraint.as_deref() == Some(RECEIPT_INDEX);
                    let supplied = if receipt_conflict {
                        input.receipt_number.is_some()
                    } else {
                        input.transaction_number.is_some()
                    };
                    if supplied {
                        let field = if receipt_conflict {
                            "receipt_number"
                        } else {
                            "transaction_number"
                        };
                        return Err(CoreError::Validation(format!("{} already exists", field)));
                    }
                    tracing::debug!(attempt, "number collision, retrying with a fresh suffix");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::InvalidOperation(
            "could not allocate a unique transaction number".into(),
        ))
    }

    /// Outstanding balance for a (student, academic year) pair: a pure fold
    /// over the completed, non-reversed history, rounded to 2 decimals.
    pub async fn outstanding_balance(
        pool: &PgPool,
        student_id: Uuid,
        academic_year: &str,
    ) -> Result<Decimal, CoreError> {
        let rows = Self::completed_rows(pool, student_id, academic_year).await?;
        Ok(balance::fold(&rows))
    }

    /// Reverse a completed transaction: mark the original and persist the
    /// compensating entry under one transactional boundary. Returns the
    /// compensating entry.
    ///
    /// The race guard is a database-level compare-and-swap on the reversal
    /// flag; of two concurrent reversals, the loser matches zero rows and
    /// gets `InvalidOperation`.
    pub async fn reverse(
        pool: &PgPool,
        transaction_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> Result<FeeTransaction, CoreError> {
        if reason.trim().is_empty() {
            return Err(CoreError::Validation("reason is required".into()));
        }
        let mut last = None;
        // Retried only when the compensating entry's generated number loses
        // a race on the unique index, which aborts the whole attempt.
        for _ in 0..3 {
            match Self::try_reverse(pool, transaction_id, user_id, reason).await {
                Err(CoreError::Db(e)) if is_unique_violation(&e) => {
                    tracing::warn!(%transaction_id, "compensating number collided, retrying reversal");
                    last = Some(CoreError::Db(e));
                }
                other => return other,
            }
        }
        Err(last.unwrap_or_else(|| {
            CoreError::InvalidOperation("reversal retries exhausted".into())
        }))
    }

    async fn try_reverse(
        pool: &PgPool,
        transaction_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> Result<FeeTransaction, CoreError> {
        let mut tx = pool.begin().await?;

        let original: Option<FeeTransaction> = sqlx::query_as(
            "UPDATE fee_transactions
             SET is_reversed = TRUE, reversed_by = $2, reversed_at = NOW(), reversal_reason = $3
             WHERE id = $1 AND is_reversed = FALSE AND status = 'completed'
               AND transaction_type IN ('payment', 'refund', 'adjustment')
             RETURNING *",
        )
        .bind(transaction_id)
        .bind(user_id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(original) = original else {
            let existing: Option<FeeTransaction> =
                sqlx::query_as("SELECT * FROM fee_transactions WHERE id = $1")
                    .bind(transaction_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(reversal_rejection(transaction_id, existing));
        };

        let compensating_type = if original.transaction_type == TransactionType::Payment {
            TransactionType::Refund
        } else {
            TransactionType::Adjustment
        };
        let original_delta =
            balance::signed_effect(original.transaction_type, original.amount, original.balance_effect)
                .unwrap_or(Decimal::ZERO);
        let balance_effect = if compensating_type == TransactionType::Adjustment {
            Some(-original_delta)
        } else {
            None
        };
        let amount = original.amount.abs();
        let date = Utc::now();
        let number = Self::unused_transaction_number(&mut tx, date).await?;
        // The original is already flagged within this transaction, so the
        // fold here no longer counts it.
        let before = balance::fold(
            &Self::completed_rows(&mut *tx, original.student_id, &original.academic_year).await?,
        );
        let delta = balance::signed_effect(compensating_type, amount, balance_effect)
            .unwrap_or(Decimal::ZERO);
        let after = balance::round2(before + delta);

        let compensating: FeeTransaction = sqlx::query_as(INSERT_SQL)
            .bind(Uuid::new_v4())
            .bind(&number)
            .bind(Option::<String>::None)
            .bind(original.student_id)
            .bind(original.fee_assignment_id)
            .bind(&original.academic_year)
            .bind(compensating_type)
            .bind(amount)
            .bind(balance_effect)
            .bind(&original.payment_method)
            .bind(TransactionStatus::Completed)
            .bind(date)
            .bind(before)
            .bind(after)
            .bind(&original.period_covered)
            .bind(&original.component_breakdown)
            .bind(Some(original.transaction_number.clone()))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            original = %original.transaction_number,
            compensating = %compensating.transaction_number,
            "transaction reversed"
        );
        Ok(compensating)
    }

    /// Transaction history for a student, most recent first, with creation
    /// order as the stable tie-break.
    pub async fn history(
        pool: &PgPool,
        student_id: Uuid,
        academic_year: Option<&str>,
        date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<FeeTransaction>, CoreError> {
        let mut sql = String::from("SELECT * FROM fee_transactions WHERE student_id = $1");
        let mut idx = 1;
        if academic_year.is_some() {
            idx += 1;
            sql.push_str(&format!(" AND academic_year = ${}", idx));
        }
        if date_range.is_some() {
            sql.push_str(&format!(
                " AND transaction_date >= ${} AND transaction_date <= ${}",
                idx + 1,
                idx + 2
            ));
        }
        sql.push_str(" ORDER BY transaction_date DESC, created_seq DESC");
        tracing::debug!(sql = %sql, "history query");
        let mut query = sqlx::query_as::<_, FeeTransaction>(&sql).bind(student_id);
        if let Some(year) = academic_year {
            query = query.bind(year.to_string());
        }
        if let Some((from, to)) = date_range {
            query = query.bind(from).bind(to);
        }
        Ok(query.fetch_all(pool).await?)
    }

    async fn completed_rows<'a, E>(
        exec: E,
        student_id: Uuid,
        academic_year: &str,
    ) -> Result<Vec<FeeTransaction>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'a>,
    {
        sqlx::query_as(
            "SELECT * FROM fee_transactions
             WHERE student_id = $1 AND academic_year = $2
               AND status = 'completed' AND is_reversed = FALSE
             ORDER BY transaction_date, created_seq",
        )
        .bind(student_id)
        .bind(academic_year)
        .fetch_all(exec)
        .await
    }

    /// Pick a transaction number not yet in use. Pre-checked with SELECT
    /// because a unique-violation abort would poison the surrounding
    /// transaction; the unique index stays the backstop for true races.
    async fn unused_transaction_number(
        tx: &mut sqlx::PgConnection,
        date: DateTime<Utc>,
    ) -> Result<String, CoreError> {
        for _ in 0..numbering::MAX_ATTEMPTS {
            let candidate = numbering::transaction_number(date);
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM fee_transactions WHERE transaction_number = $1)",
            )
            .bind(&candidate)
            .fetch_one(&mut *tx)
            .await?;
            if !exists {
                return Ok(candidate);
            }
        }
        Err(CoreError::InvalidOperation(
            "could not allocate a unique transaction number".into(),
        ))
    }
}

/// Why a reversal's compare-and-swap matched nothing.
fn reversal_rejection(transaction_id: Uuid, existing: Option<FeeTransaction>) -> CoreError {
    match existing {
        None => CoreError::NotFound(format!("transaction {}", transaction_id)),
        Some(t) if t.is_reversed => {
            CoreError::InvalidOperation("transaction is already reversed".into())
        }
        Some(t) if t.status != TransactionStatus::Completed => CoreError::InvalidOperation(
            format!(
                "only completed transactions can be reversed (status: {})",
                t.status.as_str()
            ),
        ),
        Some(t) => CoreError::InvalidOperation(format!(
            "transaction type '{}' is not reversible",
            t.transaction_type.as_str()
        )),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn violated_constraint(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.constraint().map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        transaction_type: TransactionType,
        status: TransactionStatus,
        is_reversed: bool,
    ) -> FeeTransaction {
        FeeTransaction {
            id: Uuid::new_v4(),
            transaction_number: "TXN24070001".into(),
            receipt_number: None,
            student_id: Uuid::new_v4(),
            fee_assignment_id: Uuid::new_v4(),
            academic_year: "2024-25".into(),
            transaction_type,
            amount: Decimal::from(100),
            balance_effect: None,
            payment_method: None,
            status,
            transaction_date: Utc::now(),
            balance_before: None,
            balance_after: None,
            period_covered: None,
            component_breakdown: None,
            is_reversed,
            reversed_by: None,
            reversed_at: None,
            reversal_reason: None,
            reversal_of: None,
            created_seq: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rejection_distinguishes_absent_reversed_and_type() {
        let id = Uuid::new_v4();
        assert!(matches!(
            reversal_rejection(id, None),
            CoreError::NotFound(_)
        ));
        assert!(matches!(
            reversal_rejection(
                id,
                Some(row(TransactionType::Payment, TransactionStatus::Completed, true))
            ),
            CoreError::InvalidOperation(m) if m.contains("already reversed")
        ));
        assert!(matches!(
            reversal_rejection(
                id,
                Some(row(TransactionType::Payment, TransactionStatus::Pending, false))
            ),
            CoreError::InvalidOperation(m) if m.contains("only completed")
        ));
        assert!(matches!(
            reversal_rejection(
                id,
                Some(row(TransactionType::Discount, TransactionStatus::Completed, false))
            ),
            CoreError::InvalidOperation(m) if m.contains("not reversible")
        ));
    }
}
