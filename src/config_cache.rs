//! Time-boxed tenant configuration cache. Reads older than the TTL are
//! treated as misses; writes invalidate before returning so the store stays
//! the source of truth.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Per-tenant configuration row: nested JSON sections plus a monotonically
/// incrementing version.
#[derive(Clone, Debug, sqlx::FromRow, serde::Serialize)]
pub struct TenantConfiguration {
    pub settings: Value,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// One custom-field definition for an entity type (students, sections, ...).
#[derive(Clone, Debug, sqlx::FromRow, serde::Serialize)]
pub struct FieldDefinition {
    pub id: Uuid,
    pub entity_type: String,
    pub field_name: String,
    pub label: String,
    pub field_type: String,
    pub required: bool,
    pub options: Option<Value>,
    pub position: i32,
}

/// Input shape for replacing an entity type's custom fields.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct NewFieldDefinition {
    pub field_name: String,
    pub label: String,
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub position: i32,
}

/// Default structure written when a tenant has no configuration row yet:
/// empty rule sections, all feature flags false, empty format strings.
pub fn default_settings() -> Value {
    json!({
        "student_rules": {},
        "school_rules": {},
        "feature_flags": {
            "online_payments": false,
            "sms_notifications": false,
            "parent_portal": false
        },
        "formats": {
            "receipt_number": "",
            "admission_number": ""
        }
    })
}

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T> Cached<T> {
    fn new(value: T) -> Self {
        Cached {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Cache over configuration reads, keyed by tenant code (and by tenant code
/// plus entity type for custom fields). The miss path is single-flighted per
/// key so concurrent readers never duplicate fetches or default insertion.
pub struct ConfigCache {
    ttl: Duration,
    configs: RwLock<HashMap<String, Cached<TenantConfiguration>>>,
    fields: RwLock<HashMap<(String, String), Cached<Vec<FieldDefinition>>>>,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConfigCache {
    pub fn new(ttl: Duration) -> Self {
        ConfigCache {
            ttl,
            configs: RwLock::new(HashMap::new()),
            fields: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Tenant configuration, from cache when fresh. A tenant with no row yet
    /// gets one created with [`default_settings`] before being cached.
    pub async fn get(
        &self,
        tenant_code: &str,
        pool: &PgPool,
    ) -> Result<TenantConfiguration, CoreError> {
        if let Some(cfg) = self.cached_config(tenant_code).await {
            return Ok(cfg);
        }
        let gate = self.gate(tenant_code).await;
        let _held = gate.lock().await;
        // Another reader may have refilled the entry while we waited.
        if let Some(cfg) = self.cached_config(tenant_code).await {
            return Ok(cfg);
        }
        tracing::debug!(tenant = tenant_code, "configuration cache miss");
        let cfg = fetch_or_create(pool).await?;
        self.configs
            .write()
            .await
            .insert(tenant_code.to_string(), Cached::new(cfg.clone()));
        Ok(cfg)
    }

    /// Custom-field definitions for one entity type, ordered by position.
    pub async fn get_custom_fields(
        &self,
        tenant_code: &str,
        entity_type: &str,
        pool: &PgPool,
    ) -> Result<Vec<FieldDefinition>, CoreError> {
        let key = (tenant_code.to_string(), entity_type.to_string());
        {
            let fields = self.fields.read().await;
            if let Some(entry) = fields.get(&key) {
                if !entry.is_expired(self.ttl) {
                    return Ok(entry.value.clone());
                }
            }
        }
        let gate = self.gate(&format!("{}/{}", tenant_code, entity_type)).await;
        let _held = gate.lock().await;
        {
            let fields = self.fields.read().await;
            if let Some(entry) = fields.get(&key) {
                if !entry.is_expired(self.ttl) {
                    return Ok(entry.value.clone());
                }
            }
        }
        tracing::debug!(tenant = tenant_code, entity = entity_type, "custom fields cache miss");
        let rows: Vec<FieldDefinition> = sqlx::query_as(
            "SELECT id, entity_type, field_name, label, field_type, required, options, position
             FROM custom_fields WHERE entity_type = $1 ORDER BY position, field_name",
        )
        .bind(entity_type)
        .fetch_all(pool)
        .await?;
        self.fields
            .write()
            .await
            .insert(key, Cached::new(rows.clone()));
        Ok(rows)
    }

    /// Drop every cached entry for one tenant.
    pub async fn invalidate(&self, tenant_code: &str) {
        self.configs.write().await.remove(tenant_code);
        self.fields
            .write()
            .await
            .retain(|(t, _), _| t.as_str() != tenant_code);
    }

    pub async fn invalidate_all(&self) {
        self.configs.write().await.clear();
        self.fields.write().await.clear();
    }

    /// Replace the tenant's settings document, bumping the version. The
    /// cache entry is invalidated before this returns.
    pub async fn put_settings(
        &self,
        tenant_code: &str,
        pool: &PgPool,
        settings: Value,
    ) -> Result<TenantConfiguration, CoreError> {
        let row: TenantConfiguration = sqlx::query_as(
            "INSERT INTO tenant_configuration (id, settings, version) VALUES (1, $1, 1)
             ON CONFLICT (id) DO UPDATE SET settings = EXCLUDED.settings,
                 version = tenant_configuration.version + 1, updated_at = NOW()
             RETURNING settings, version, updated_at",
        )
        .bind(settings)
        .fetch_one(pool)
        .await?;
        self.invalidate(tenant_code).await;
        Ok(row)
    }

    /// Replace one entity type's custom fields atomically. The cache entry
    /// is invalidated before this returns.
    pub async fn replace_custom_fields(
        &self,
        tenant_code: &str,
        entity_type: &str,
        pool: &PgPool,
        fields: Vec<NewFieldDefinition>,
    ) -> Result<Vec<FieldDefinition>, CoreError> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM custom_fields WHERE entity_type = $1")
            .bind(entity_type)
            .execute(&mut *tx)
            .await?;
        let mut out = Vec::with_capacity(fields.len());
        for f in fields {
            let row: FieldDefinition = sqlx::query_as(
                "INSERT INTO custom_fields (id, entity_type, field_name, label, field_type, required, options, position)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING id, entity_type, field_name, label, field_type, required, options, position",
            )
            .bind(Uuid::new_v4())
            .bind(entity_type)
            .bind(f.field_name)
            .bind(f.label)
            .bind(f.field_type)
            .bind(f.required)
            .bind(f.options)
            .bind(f.position)
            .fetch_one(&mut *tx)
            .await?;
            out.push(row);
        }
        tx.commit().await?;
        self.invalidate(tenant_code).await;
        Ok(out)
    }

    async fn cached_config(&self, tenant_code: &str) -> Option<TenantConfiguration> {
        let configs = self.configs.read().await;
        configs
            .get(tenant_code)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| entry.value.clone())
    }

    async fn gate(&self, key: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Fetch the singleton configuration row, creating it with defaults if the
/// tenant has none yet. `ON CONFLICT DO NOTHING` keeps concurrent creators
/// from duplicating the row.
async fn fetch_or_create(pool: &PgPool) -> Result<TenantConfiguration, CoreError> {
    let existing: Option<TenantConfiguration> = sqlx::query_as(
        "SELECT settings, version, updated_at FROM tenant_configuration WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;
    if let Some(cfg) = existing {
        return Ok(cfg);
    }
    sqlx::query(
        "INSERT INTO tenant_configuration (id, settings, version) VALUES (1, $1, 1)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(default_settings())
    .execute(pool)
    .await?;
    let created: TenantConfiguration = sqlx::query_as(
        "SELECT settings, version, updated_at FROM tenant_configuration WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_by_ttl() {
        let entry = Cached::new(1);
        assert!(!entry.is_expired(Duration::from_secs(3600)));
        assert!(entry.is_expired(Duration::ZERO));
    }

    #[test]
    fn default_settings_structure() {
        let d = default_settings();
        let flags = &d["feature_flags"];
        assert_eq!(flags["online_payments"], json!(false));
        assert_eq!(flags["sms_notifications"], json!(false));
        assert_eq!(flags["parent_portal"], json!(false));
        assert_eq!(d["formats"]["receipt_number"], json!(""));
        assert!(d["student_rules"].as_object().is_some_and(|o| o.is_empty()));
    }
}
