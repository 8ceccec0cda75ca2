//! Operational bootstrap: ensure the system and tenant schemas exist, then
//! report connection health for every provisioned tenant.

use campus_core::{AppContext, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    let ctx = AppContext::init(settings).await?;

    let tenants = ctx.active_tenants().await;
    tracing::info!(count = tenants.len(), "tenant catalog loaded");
    for code in &tenants {
        match ctx.ensure_tenant_schema(code).await {
            Ok(()) => tracing::info!(tenant = %code, "schema ensured"),
            Err(e) => tracing::warn!(tenant = %code, error = %e, "schema bootstrap failed"),
        }
    }

    for h in ctx.health_report().await {
        tracing::info!(
            key = %h.key,
            database = %h.database,
            alive = h.alive,
            created_at = %h.created_at,
            "connection"
        );
    }

    ctx.shutdown().await;
    Ok(())
}
