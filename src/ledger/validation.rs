//! Ledger input validation. Malformed input is rejected before any write.

use crate::error::CoreError;
use crate::ledger::transaction::{TransactionInput, TransactionType};
use rust_decimal::Decimal;

/// Validate a transaction input. Required: student, fee assignment, academic
/// year, positive amount; a payment method for payments; a signed
/// balance_effect for caller-classified types.
pub fn validate(input: &TransactionInput) -> Result<(), CoreError> {
    if input.student_id.is_nil() {
        return Err(CoreError::Validation("student_id is required".into()));
    }
    if input.fee_assignment_id.is_nil() {
        return Err(CoreError::Validation("fee_assignment_id is required".into()));
    }
    if input.academic_year.trim().is_empty() {
        return Err(CoreError::Validation("academic_year is required".into()));
    }
    if input.amount <= Decimal::ZERO {
        return Err(CoreError::Validation("amount must be positive".into()));
    }
    if input.transaction_type == TransactionType::Payment
        && input
            .payment_method
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
    {
        return Err(CoreError::Validation(
            "payment_method is required for payments".into(),
        ));
    }
    if input.transaction_type.is_caller_classified() && input.balance_effect.is_none() {
        return Err(CoreError::Validation(format!(
            "balance_effect is required for {} transactions",
            input.transaction_type.as_str()
        )));
    }
    if input.receipt_number.is_some() && input.transaction_type != TransactionType::Payment {
        return Err(CoreError::Validation(
            "receipt_number is only valid for payments".into(),
        ));
    }
    Ok(())
}
