//! Transaction and receipt number generation: prefix + 2-digit year +
//! 2-digit month + 4 random digits, collision-checked at insert time.

use chrono::{DateTime, Utc};
use rand::Rng;

pub const TRANSACTION_PREFIX: &str = "TXN";
pub const RECEIPT_PREFIX: &str = "RCP";

/// How many fresh suffixes to try before giving up on a collision streak.
pub const MAX_ATTEMPTS: usize = 20;

pub fn compose(prefix: &str, date: DateTime<Utc>, suffix: u16) -> String {
    format!("{}{}{:04}", prefix, date.format("%y%m"), suffix)
}

pub fn random_suffix() -> u16 {
    rand::thread_rng().gen_range(0..10_000)
}

pub fn transaction_number(date: DateTime<Utc>) -> String {
    compose(TRANSACTION_PREFIX, date, random_suffix())
}

pub fn receipt_number(date: DateTime<Utc>) -> String {
    compose(RECEIPT_PREFIX, date, random_suffix())
}
