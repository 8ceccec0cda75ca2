//! Fee transaction ledger and installment scheduling.

pub mod balance;
pub mod installments;
pub mod numbering;
pub mod service;
pub mod transaction;
pub mod validation;

pub use installments::{FeeInstallment, InstallmentScheduler, InstallmentStatus, NewInstallment};
pub use service::FeeLedger;
pub use transaction::{FeeTransaction, TransactionInput, TransactionStatus, TransactionType};
