//! Explicit application context. Owns the router, tenant catalog, and
//! configuration cache so nothing lives in process-wide globals, and exposes
//! the operations surrounding business modules call into.

use crate::config_cache::{ConfigCache, FieldDefinition, NewFieldDefinition, TenantConfiguration};
use crate::error::CoreError;
use crate::ledger::installments::{FeeInstallment, InstallmentScheduler};
use crate::ledger::service::FeeLedger;
use crate::ledger::transaction::{FeeTransaction, TransactionInput};
use crate::router::{ConnectionHandle, HandleHealth, TenantRouter};
use crate::schema;
use crate::settings::Settings;
use crate::tenant::{self, TenantRegistry};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct AppContext {
    settings: Settings,
    router: TenantRouter,
    config_cache: ConfigCache,
    registry: RwLock<TenantRegistry>,
}

impl AppContext {
    /// Connect to the system database, ensure its schema, and load the
    /// tenant catalog.
    pub async fn init(settings: Settings) -> Result<Self, CoreError> {
        let router = TenantRouter::from_settings(&settings);
        let config_cache = ConfigCache::new(settings.config_cache_ttl);
        let ctx = AppContext {
            settings,
            router,
            config_cache,
            registry: RwLock::new(TenantRegistry::default()),
        };
        let system = ctx.router.acquire_system().await?;
        schema::ensure_system_tables(system.conn()).await?;
        ctx.reload_registry().await?;
        Ok(ctx)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn router(&self) -> &TenantRouter {
        &self.router
    }

    /// Refresh the tenant catalog from the system database.
    pub async fn reload_registry(&self) -> Result<(), CoreError> {
        let system = self.router.acquire_system().await?;
        let registry = tenant::load_registry(system.conn()).await?;
        *self.registry.write().await = registry;
        Ok(())
    }

    /// Codes of all active tenants, ordered.
    pub async fn active_tenants(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .active()
            .into_iter()
            .map(|t| t.code.clone())
            .collect()
    }

    /// Connection handle for one tenant's database.
    pub async fn acquire_tenant_connection(
        &self,
        tenant_code: &str,
    ) -> Result<Arc<ConnectionHandle<PgPool>>, CoreError> {
        self.tenant_handle(tenant_code).await
    }

    /// Create the ledger/installment/configuration tables in a tenant's
    /// database. Idempotent; used at provisioning and by the bootstrap tool.
    pub async fn ensure_tenant_schema(&self, tenant_code: &str) -> Result<(), CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        schema::ensure_tenant_tables(handle.conn()).await
    }

    pub async fn record_fee_payment(
        &self,
        tenant_code: &str,
        input: TransactionInput,
    ) -> Result<FeeTransaction, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        FeeLedger::record_payment(handle.conn(), input).await
    }

    pub async fn reverse_fee_transaction(
        &self,
        tenant_code: &str,
        transaction_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> Result<FeeTransaction, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        FeeLedger::reverse(handle.conn(), transaction_id, user_id, reason).await
    }

    pub async fn outstanding_balance(
        &self,
        tenant_code: &str,
        student_id: Uuid,
        academic_year: &str,
    ) -> Result<Decimal, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        FeeLedger::outstanding_balance(handle.conn(), student_id, academic_year).await
    }

    pub async fn transaction_history(
        &self,
        tenant_code: &str,
        student_id: Uuid,
        academic_year: Option<&str>,
        date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<FeeTransaction>, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        FeeLedger::history(handle.conn(), student_id, academic_year, date_range).await
    }

    pub async fn tenant_configuration(
        &self,
        tenant_code: &str,
    ) -> Result<TenantConfiguration, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        self.config_cache.get(tenant_code, handle.conn()).await
    }

    pub async fn update_tenant_configuration(
        &self,
        tenant_code: &str,
        settings: serde_json::Value,
    ) -> Result<TenantConfiguration, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        self.config_cache
            .put_settings(tenant_code, handle.conn(), settings)
            .await
    }

    pub async fn custom_fields(
        &self,
        tenant_code: &str,
        entity_type: &str,
    ) -> Result<Vec<FieldDefinition>, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        self.config_cache
            .get_custom_fields(tenant_code, entity_type, handle.conn())
            .await
    }

    pub async fn replace_custom_fields(
        &self,
        tenant_code: &str,
        entity_type: &str,
        fields: Vec<NewFieldDefinition>,
    ) -> Result<Vec<FieldDefinition>, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        self.config_cache
            .replace_custom_fields(tenant_code, entity_type, handle.conn(), fields)
            .await
    }

    pub async fn find_overdue_installments(
        &self,
        tenant_code: &str,
        student_id: Option<Uuid>,
    ) -> Result<Vec<FeeInstallment>, CoreError> {
        let handle = self.tenant_handle(tenant_code).await?;
        InstallmentScheduler::find_overdue(handle.conn(), student_id).await
    }

    /// Probe every cached connection, tenant and system alike.
    pub async fn health_report(&self) -> Vec<HandleHealth> {
        self.router.health_report().await
    }

    /// Close every connection. The context is unusable afterwards.
    pub async fn shutdown(&self) {
        self.router.shutdown_all().await;
        self.config_cache.invalidate_all().await;
    }

    async fn tenant_handle(
        &self,
        tenant_code: &str,
    ) -> Result<Arc<ConnectionHandle<PgPool>>, CoreError> {
        self.require_tenant(tenant_code).await?;
        self.router.acquire(tenant_code).await
    }

    /// Reject unknown or inactive tenants, reloading the catalog once in
    /// case the tenant was provisioned after this context started.
    async fn require_tenant(&self, tenant_code: &str) -> Result<(), CoreError> {
        tenant::validate_code(tenant_code)?;
        if self.is_known_active(tenant_code).await {
            return Ok(());
        }
        self.reload_registry().await?;
        if self.is_known_active(tenant_code).await {
            return Ok(());
        }
        Err(CoreError::NotFound(format!("tenant '{}'", tenant_code)))
    }

    async fn is_known_active(&self, tenant_code: &str) -> bool {
        self.registry
            .read()
            .await
            .get(tenant_code)
            .map(|t| t.is_active)
            .unwrap_or(false)
    }
}
