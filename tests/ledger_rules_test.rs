//! Ledger and installment business rules exercised through the public API:
//! balance folding, penalty accrual, status derivation, input validation.

use campus_core::ledger::{balance, installments, validation};
use campus_core::{
    CoreError, FeeInstallment, FeeTransaction, InstallmentStatus, TransactionInput,
    TransactionStatus, TransactionType,
};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn txn(
    transaction_type: TransactionType,
    amount: Decimal,
    balance_effect: Option<Decimal>,
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
        amount,
        balance_effect,
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

fn completed(transaction_type: TransactionType, amount: Decimal) -> FeeTransaction {
    txn(transaction_type, amount, None, TransactionStatus::Completed, false)
}

fn installment(
    amount: Decimal,
    paid_amount: Decimal,
    due_date: NaiveDate,
    penalty_rate: Decimal,
) -> FeeInstallment {
    FeeInstallment {
        id: Uuid::new_v4(),
        student_id: Uuid::new_v4(),
        fee_assignment_id: Uuid::new_v4(),
        sequence_number: 1,
        amount,
        paid_amount,
        penalty_accrued: Decimal::ZERO,
        penalty_paid: Decimal::ZERO,
        due_date,
        penalty_rate,
        status: InstallmentStatus::Pending,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// -----------------------------------------------------------------------
// Balance folding
// -----------------------------------------------------------------------

#[test]
fn payments_and_discounts_reduce_refunds_and_late_fees_increase() {
    let history = vec![
        completed(TransactionType::Payment, dec!(5000)),
        completed(TransactionType::LateFee, dec!(200)),
        completed(TransactionType::Discount, dec!(300)),
        completed(TransactionType::Refund, dec!(100)),
        completed(TransactionType::Waiver, dec!(50)),
    ];
    assert_eq!(balance::fold(&history), dec!(-5050));
}

#[test]
fn caller_classified_types_apply_their_explicit_sign() {
    let history = vec![
        txn(
            TransactionType::Adjustment,
            dec!(250),
            Some(dec!(-250)),
            TransactionStatus::Completed,
            false,
        ),
        txn(
            TransactionType::Advance,
            dec!(100),
            Some(dec!(100)),
            TransactionStatus::Completed,
            false,
        ),
    ];
    assert_eq!(balance::fold(&history), dec!(-150));
}

#[test]
fn non_completed_and_reversed_entries_do_not_count() {
    let history = vec![
        completed(TransactionType::Payment, dec!(1000)),
        txn(TransactionType::Payment, dec!(400), None, TransactionStatus::Pending, false),
        txn(TransactionType::Refund, dec!(400), None, TransactionStatus::Cancelled, false),
        txn(TransactionType::Payment, dec!(400), None, TransactionStatus::Completed, true),
    ];
    assert_eq!(balance::fold(&history), dec!(-1000));
}

#[test]
fn appending_a_zero_amount_cancelled_entry_changes_nothing() {
    let mut history = vec![completed(TransactionType::Payment, dec!(750))];
    let before = balance::fold(&history);
    history.push(txn(
        TransactionType::Adjustment,
        dec!(0),
        None,
        TransactionStatus::Cancelled,
        false,
    ));
    assert_eq!(balance::fold(&history), before);
}

#[test]
fn fold_is_a_pure_function_of_history() {
    let history = vec![
        completed(TransactionType::Payment, dec!(123.45)),
        completed(TransactionType::LateFee, dec!(10)),
    ];
    assert_eq!(balance::fold(&history), balance::fold(&history));
}

#[test]
fn result_is_rounded_half_up_not_truncated() {
    let history = vec![completed(TransactionType::Refund, dec!(10.005))];
    assert_eq!(balance::fold(&history), dec!(10.01));
}

// -----------------------------------------------------------------------
// Penalty accrual
// -----------------------------------------------------------------------

#[test]
fn no_penalty_on_or_before_the_due_date() {
    let due = date(2024, 6, 1);
    let inst = installment(dec!(1000), dec!(0), due, dec!(2));
    assert_eq!(installments::penalty_for(&inst, date(2024, 5, 20)), dec!(0));
    assert_eq!(installments::penalty_for(&inst, due), dec!(0));
}

#[test]
fn one_day_overdue_accrues_a_full_month_unit() {
    let inst = installment(dec!(1000), dec!(0), date(2024, 6, 1), dec!(2));
    assert_eq!(installments::penalty_for(&inst, date(2024, 6, 2)), dec!(20));
}

#[test]
fn forty_days_overdue_at_two_percent_accrues_two_units() {
    let due = Utc::now().date_naive() - Duration::days(40);
    let inst = installment(dec!(1000), dec!(0), due, dec!(2));
    assert_eq!(
        installments::penalty_for(&inst, Utc::now().date_naive()),
        dec!(40)
    );
}

#[test]
fn month_units_round_up_at_the_boundary() {
    let due = date(2024, 6, 1);
    let inst = installment(dec!(1000), dec!(0), due, dec!(2));
    // 30 days overdue is still one unit; 31 starts the second.
    assert_eq!(installments::penalty_for(&inst, date(2024, 7, 1)), dec!(20));
    assert_eq!(installments::penalty_for(&inst, date(2024, 7, 2)), dec!(40));
}

#[test]
fn penalty_never_decreases_as_time_passes() {
    let due = date(2024, 6, 1);
    let inst = installment(dec!(1500), dec!(0), due, dec!(1.5));
    let mut last = Decimal::ZERO;
    for offset in 1..120 {
        let penalty = installments::penalty_for(&inst, due + Duration::days(offset));
        assert!(penalty >= last, "penalty shrank at day {}", offset);
        last = penalty;
    }
}

// -----------------------------------------------------------------------
// Principal and status derivation
// -----------------------------------------------------------------------

#[test]
fn remaining_principal_clamps_at_zero_on_overpayment() {
    let due = date(2024, 6, 1);
    assert_eq!(
        installments::remaining_principal(&installment(dec!(1000), dec!(400), due, dec!(2))),
        dec!(600)
    );
    assert_eq!(
        installments::remaining_principal(&installment(dec!(1000), dec!(1200), due, dec!(2))),
        dec!(0)
    );
}

#[test]
fn status_derives_from_paid_amount_and_due_date() {
    let due = date(2024, 6, 1);
    let before = date(2024, 5, 1);
    let after = date(2024, 7, 1);

    let unpaid = installment(dec!(1000), dec!(0), due, dec!(2));
    assert_eq!(installments::status_for(&unpaid, before), InstallmentStatus::Pending);
    assert_eq!(installments::status_for(&unpaid, after), InstallmentStatus::Overdue);

    let partial = installment(dec!(1000), dec!(300), due, dec!(2));
    assert_eq!(installments::status_for(&partial, before), InstallmentStatus::Partial);
    assert_eq!(installments::status_for(&partial, after), InstallmentStatus::Partial);

    let paid = installment(dec!(1000), dec!(1000), due, dec!(2));
    assert_eq!(installments::status_for(&paid, before), InstallmentStatus::Paid);
    assert_eq!(installments::status_for(&paid, after), InstallmentStatus::Paid);

    let overpaid = installment(dec!(1000), dec!(1200), due, dec!(2));
    assert_eq!(installments::status_for(&overpaid, after), InstallmentStatus::Paid);
}

#[test]
fn waived_survives_every_mutation_and_is_never_derived() {
    let due = date(2024, 6, 1);
    let after = date(2024, 7, 1);
    assert_eq!(
        installments::next_status(InstallmentStatus::Waived, dec!(1000), dec!(1000), due, after),
        InstallmentStatus::Waived
    );
    // Derivation itself never yields waived.
    assert_eq!(
        installments::next_status(InstallmentStatus::Pending, dec!(1000), dec!(0), due, after),
        InstallmentStatus::Overdue
    );
}

// -----------------------------------------------------------------------
// Input validation
// -----------------------------------------------------------------------

#[test]
fn a_well_formed_payment_passes_validation() {
    let input = TransactionInput::payment(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "2024-25",
        dec!(5000),
        "online",
    );
    assert!(validation::validate(&input).is_ok());
}

#[test]
fn payments_require_a_method() {
    let mut input =
        TransactionInput::payment(Uuid::new_v4(), Uuid::new_v4(), "2024-25", dec!(100), "cash");
    input.payment_method = None;
    assert!(matches!(
        validation::validate(&input),
        Err(CoreError::Validation(m)) if m.contains("payment_method")
    ));
}

#[test]
fn required_identifiers_and_positive_amount_are_enforced() {
    let good =
        TransactionInput::payment(Uuid::new_v4(), Uuid::new_v4(), "2024-25", dec!(100), "cash");

    let mut input = good.clone();
    input.student_id = Uuid::nil();
    assert!(validation::validate(&input).is_err());

    let mut input = good.clone();
    input.academic_year = "  ".into();
    assert!(validation::validate(&input).is_err());

    let mut input = good.clone();
    input.amount = dec!(0);
    assert!(validation::validate(&input).is_err());

    let mut input = good;
    input.amount = dec!(-5);
    assert!(validation::validate(&input).is_err());
}

#[test]
fn caller_classified_types_must_supply_a_balance_effect() {
    let mut input =
        TransactionInput::payment(Uuid::new_v4(), Uuid::new_v4(), "2024-25", dec!(100), "cash");
    input.transaction_type = TransactionType::Adjustment;
    input.balance_effect = None;
    assert!(matches!(
        validation::validate(&input),
        Err(CoreError::Validation(m)) if m.contains("balance_effect")
    ));

    input.balance_effect = Some(dec!(-100));
    assert!(validation::validate(&input).is_ok());
}

#[test]
fn receipt_numbers_are_payment_only() {
    let mut input =
        TransactionInput::payment(Uuid::new_v4(), Uuid::new_v4(), "2024-25", dec!(100), "cash");
    input.transaction_type = TransactionType::Discount;
    input.payment_method = None;
    input.receipt_number = Some("RCP24070001".into());
    assert!(matches!(
        validation::validate(&input),
        Err(CoreError::Validation(m)) if m.contains("receipt_number")
    ));
}
