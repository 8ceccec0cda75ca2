//! Environment-driven settings. All values have working defaults so a local
//! PostgreSQL on standard ports needs no configuration at all.

use std::time::Duration;

/// Reserved router key for the system (non-tenant) database handle.
pub const SYSTEM_KEY: &str = "@system";

/// Connection and cache settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    /// PostgreSQL host. Env `CAMPUS_DB_HOST`, default `127.0.0.1`.
    pub db_host: String,
    /// PostgreSQL port. Env `CAMPUS_DB_PORT`, default 5432.
    pub db_port: u16,
    /// Login role. Env `CAMPUS_DB_USER`, default `postgres`.
    pub db_user: String,
    /// Login password. Env `CAMPUS_DB_PASSWORD`, default empty.
    pub db_password: String,
    /// System database name. Env `CAMPUS_SYSTEM_DB`, default `school_erp_system`.
    pub system_database: String,
    /// Prefix for tenant database names. Env `CAMPUS_TENANT_DB_PREFIX`,
    /// default `school_erp_trust_`.
    pub tenant_db_prefix: String,
    /// Max connections per tenant pool. Env `CAMPUS_POOL_MAX`, default 5.
    pub pool_max_connections: u32,
    /// Bound on connection establishment. Env `CAMPUS_CONNECT_TIMEOUT_SECS`, default 10.
    pub connect_timeout: Duration,
    /// Bound on liveness probes; a hung probe counts as a dead connection.
    /// Env `CAMPUS_PROBE_TIMEOUT_SECS`, default 5.
    pub probe_timeout: Duration,
    /// Configuration cache time-to-live. Env `CAMPUS_CONFIG_TTL_SECS`, default 300.
    pub config_cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_host: "127.0.0.1".into(),
            db_port: 5432,
            db_user: "postgres".into(),
            db_password: String::new(),
            system_database: "school_erp_system".into(),
            tenant_db_prefix: "school_erp_trust_".into(),
            pool_max_connections: 5,
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            config_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let d = Settings::default();
        Settings {
            db_host: env_or("CAMPUS_DB_HOST", d.db_host),
            db_port: env_parsed("CAMPUS_DB_PORT", d.db_port),
            db_user: env_or("CAMPUS_DB_USER", d.db_user),
            db_password: env_or("CAMPUS_DB_PASSWORD", d.db_password),
            system_database: env_or("CAMPUS_SYSTEM_DB", d.system_database),
            tenant_db_prefix: env_or("CAMPUS_TENANT_DB_PREFIX", d.tenant_db_prefix),
            pool_max_connections: env_parsed("CAMPUS_POOL_MAX", d.pool_max_connections),
            connect_timeout: Duration::from_secs(env_parsed(
                "CAMPUS_CONNECT_TIMEOUT_SECS",
                d.connect_timeout.as_secs(),
            )),
            probe_timeout: Duration::from_secs(env_parsed(
                "CAMPUS_PROBE_TIMEOUT_SECS",
                d.probe_timeout.as_secs(),
            )),
            config_cache_ttl: Duration::from_secs(env_parsed(
                "CAMPUS_CONFIG_TTL_SECS",
                d.config_cache_ttl.as_secs(),
            )),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_naming() {
        let s = Settings::default();
        assert_eq!(s.system_database, "school_erp_system");
        assert_eq!(s.tenant_db_prefix, "school_erp_trust_");
        assert_eq!(s.config_cache_ttl, Duration::from_secs(300));
    }
}
