//! Typed errors for the tenant router, ledger, and configuration cache.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Tenant database unreachable or authentication failed. The reason is a
    /// generic message (no credentials); callers decide whether to retry.
    #[error("tenant database unavailable for '{tenant}': {reason}")]
    Connection { tenant: String, reason: String },
    /// Malformed or missing ledger input, rejected before any write.
    #[error("validation: {0}")]
    Validation(String),
    /// Operation contradicts current row state (e.g. reversing an already
    /// reversed transaction), rejected before any write.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

impl CoreError {
    /// Wrap a store-level failure as a connection error for `tenant`.
    pub fn connection(tenant: impl Into<String>, reason: impl ToString) -> Self {
        CoreError::Connection {
            tenant: tenant.into(),
            reason: reason.to_string(),
        }
    }
}
