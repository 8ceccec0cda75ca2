//! Fee transaction model: one immutable financial event once committed,
//! except for the reversal flag which is set exactly once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Refund,
    Adjustment,
    Waiver,
    Discount,
    LateFee,
    Advance,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Refund => "refund",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Waiver => "waiver",
            TransactionType::Discount => "discount",
            TransactionType::LateFee => "late_fee",
            TransactionType::Advance => "advance",
            TransactionType::Transfer => "transfer",
        }
    }

    /// Only completed payments, refunds, and adjustments can be reversed.
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            TransactionType::Payment | TransactionType::Refund | TransactionType::Adjustment
        )
    }

    /// Types whose balance direction is supplied by the caller rather than
    /// fixed by the ledger.
    pub fn is_caller_classified(&self) -> bool {
        matches!(
            self,
            TransactionType::Adjustment | TransactionType::Advance | TransactionType::Transfer
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

/// One row of the fee transaction log.
#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct FeeTransaction {
    pub id: Uuid,
    pub transaction_number: String,
    /// Payments only; unique among non-null values.
    pub receipt_number: Option<String>,
    pub student_id: Uuid,
    pub fee_assignment_id: Uuid,
    pub academic_year: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    /// Signed balance contribution for caller-classified types.
    pub balance_effect: Option<Decimal>,
    pub payment_method: Option<String>,
    pub status: TransactionStatus,
    pub transaction_date: DateTime<Utc>,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    /// Opaque to the ledger.
    pub period_covered: Option<String>,
    /// Opaque to the ledger.
    pub component_breakdown: Option<Value>,
    pub is_reversed: bool,
    pub reversed_by: Option<Uuid>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversal_reason: Option<String>,
    /// Transaction number of the entry this one compensates.
    pub reversal_of: Option<String>,
    /// Insertion order, the stable tie-break for equal transaction dates.
    pub created_seq: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a new ledger entry. Numbers and the date are
/// generated when absent.
#[derive(Clone, Debug, Deserialize)]
pub struct TransactionInput {
    pub student_id: Uuid,
    pub fee_assignment_id: Uuid,
    pub academic_year: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    #[serde(default)]
    pub balance_effect: Option<Decimal>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub transaction_number: Option<String>,
    #[serde(default)]
    pub receipt_number: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_covered: Option<String>,
    #[serde(default)]
    pub component_breakdown: Option<Value>,
}

impl TransactionInput {
    /// Payment input with everything else defaulted.
    pub fn payment(
        student_id: Uuid,
        fee_assignment_id: Uuid,
        academic_year: impl Into<String>,
        amount: Decimal,
        payment_method: impl Into<String>,
    ) -> Self {
        TransactionInput {
            student_id,
            fee_assignment_id,
            academic_year: academic_year.into(),
            transaction_type: TransactionType::Payment,
            amount,
            balance_effect: None,
            payment_method: Some(payment_method.into()),
            status: None,
            transaction_number: None,
            receipt_number: None,
            transaction_date: None,
            period_covered: None,
            component_breakdown: None,
        }
    }
}
