//! Tenant catalog: provisioned school-trusts, loaded from the system database.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// One provisioned school-trust. Immutable after provisioning; the code is
/// the stable identifier from which the tenant database name is derived.
#[derive(Clone, Debug, sqlx::FromRow, serde::Serialize)]
pub struct Tenant {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// In-memory tenant catalog loaded from the system database.
#[derive(Clone, Debug, Default)]
pub struct TenantRegistry {
    by_code: HashMap<String, Tenant>,
}

impl TenantRegistry {
    pub fn get(&self, code: &str) -> Option<&Tenant> {
        self.by_code.get(code)
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Active tenants, ordered by code.
    pub fn active(&self) -> Vec<&Tenant> {
        let mut out: Vec<&Tenant> = self.by_code.values().filter(|t| t.is_active).collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }
}

/// Tenant codes are embedded in database names: lowercase ascii, digits and
/// underscores, at most 32 chars.
pub fn validate_code(code: &str) -> Result<(), CoreError> {
    if code.is_empty() || code.len() > 32 {
        return Err(CoreError::Validation(format!(
            "tenant code must be 1-32 characters, got '{}'",
            code
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(CoreError::Validation(format!(
            "tenant code '{}' may only contain lowercase letters, digits, and underscores",
            code
        )));
    }
    Ok(())
}

/// Derive the tenant database name from the configured prefix and code.
pub fn tenant_database(prefix: &str, code: &str) -> String {
    format!("{}{}", prefix, code)
}

/// Load the tenant registry from the system database. Rows with invalid
/// codes are skipped with a warning rather than failing the whole load.
pub async fn load_registry(pool: &PgPool) -> Result<TenantRegistry, CoreError> {
    let rows: Vec<Tenant> = sqlx::query_as(
        "SELECT id, code, name, is_active, created_at FROM tenants ORDER BY code",
    )
    .fetch_all(pool)
    .await?;

    let mut by_code = HashMap::new();
    for t in rows {
        if let Err(e) = validate_code(&t.code) {
            tracing::warn!(code = %t.code, error = %e, "skipping tenant with invalid code");
            continue;
        }
        by_code.insert(t.code.clone(), t);
    }

    Ok(TenantRegistry { by_code })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_is_prefix_plus_code() {
        assert_eq!(
            tenant_database("school_erp_trust_", "maroon"),
            "school_erp_trust_maroon"
        );
    }

    #[test]
    fn code_validation() {
        assert!(validate_code("demo").is_ok());
        assert!(validate_code("trust_01").is_ok());
        assert!(validate_code("").is_err());
        assert!(validate_code("Maroon").is_err());
        assert!(validate_code("a b").is_err());
        assert!(validate_code("drop;table").is_err());
        assert!(validate_code(&"x".repeat(33)).is_err());
    }
}
