//! Outstanding balance as a pure fold over transaction history.

use crate::ledger::transaction::{FeeTransaction, TransactionStatus, TransactionType};
use rust_decimal::{Decimal, RoundingStrategy};

/// Round to 2 decimal places with standard (half-up) rounding, never
/// truncation.
pub fn round2(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Signed balance contribution of one entry. Payments, discounts, and
/// waivers reduce the balance; refunds and late fees increase it;
/// caller-classified types carry their own sign in `balance_effect`.
pub fn signed_effect(
    transaction_type: TransactionType,
    amount: Decimal,
    balance_effect: Option<Decimal>,
) -> Option<Decimal> {
    match transaction_type {
        TransactionType::Payment | TransactionType::Discount | TransactionType::Waiver => {
            Some(-amount)
        }
        TransactionType::Refund | TransactionType::LateFee => Some(amount),
        TransactionType::Adjustment | TransactionType::Advance | TransactionType::Transfer => {
            balance_effect
        }
    }
}

/// Contribution of one row to the running balance: completed, non-reversed
/// entries only.
pub fn balance_delta(t: &FeeTransaction) -> Option<Decimal> {
    if t.is_reversed || t.status != TransactionStatus::Completed {
        return None;
    }
    signed_effect(t.transaction_type, t.amount, t.balance_effect)
}

/// Replay a history into the outstanding balance. Pure: the same history
/// always folds to the same value.
pub fn fold(history: &[FeeTransaction]) -> Decimal {
    round2(history.iter().filter_map(balance_delta).sum())
}
