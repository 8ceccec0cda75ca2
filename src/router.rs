//! Per-tenant connection routing: lazy creation, liveness probing on reuse,
//! evict-and-recreate for dead connections, and single-flighted establishment
//! so concurrent callers never race to open two connections for one tenant.

use crate::error::CoreError;
use crate::settings::{Settings, SYSTEM_KEY};
use crate::tenant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Seam between the router and the underlying store, so routing semantics
/// are testable without a live server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + Sync + 'static;

    /// Establish a fully authenticated connection to `database`. Must be
    /// bounded by a timeout internally.
    async fn connect(&self, database: &str) -> Result<Self::Conn, BoxError>;

    /// Liveness probe. A hung probe must count as dead, not block.
    async fn probe(&self, conn: &Self::Conn) -> bool;

    /// Close the connection. Failures are logged by callers, never fatal.
    async fn disconnect(&self, conn: &Self::Conn) -> Result<(), BoxError>;
}

/// One live connection to one logical database. A handle is either fully
/// authenticated and present in the router's map, or absent; it is never
/// shared half-initialized.
pub struct ConnectionHandle<T> {
    database: String,
    created_at: DateTime<Utc>,
    conn: T,
}

impl<T> ConnectionHandle<T> {
    pub fn conn(&self) -> &T {
        &self.conn
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Liveness summary for one cached handle.
#[derive(Clone, Debug, serde::Serialize)]
pub struct HandleHealth {
    pub key: String,
    pub database: String,
    pub alive: bool,
    pub created_at: DateTime<Utc>,
}

/// Cloneable creation failure, fanned out to every caller waiting on the
/// same in-flight establishment.
#[derive(Clone, Debug)]
struct CreationFailed {
    key: String,
    reason: String,
}

impl CreationFailed {
    fn into_core(self) -> CoreError {
        CoreError::Connection {
            tenant: self.key,
            reason: self.reason,
        }
    }
}

type Outcome<T> = Result<Arc<ConnectionHandle<T>>, CreationFailed>;

enum Slot<T> {
    Ready(Arc<ConnectionHandle<T>>),
    Creating(watch::Receiver<Option<Outcome<T>>>),
}

enum Step<T> {
    Probe(Arc<ConnectionHandle<T>>),
    Wait(watch::Receiver<Option<Outcome<T>>>),
    Create(watch::Sender<Option<Outcome<T>>>),
}

/// Owns the tenant-code → handle map. At most one creation per key is in
/// flight at a time; all concurrent callers for that key receive the result
/// (or error) of the single in-flight creation.
pub struct ConnectionRouter<C: Connector> {
    connector: C,
    system_database: String,
    tenant_db_prefix: String,
    slots: Mutex<HashMap<String, Slot<C::Conn>>>,
}

/// The production router over PostgreSQL pools.
pub type TenantRouter = ConnectionRouter<PgConnector>;

impl<C: Connector> ConnectionRouter<C> {
    pub fn new(connector: C, system_database: String, tenant_db_prefix: String) -> Self {
        ConnectionRouter {
            connector,
            system_database,
            tenant_db_prefix,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for one tenant's database, creating it on first use.
    pub async fn acquire(
        &self,
        tenant_code: &str,
    ) -> Result<Arc<ConnectionHandle<C::Conn>>, CoreError> {
        tenant::validate_code(tenant_code)?;
        let database = tenant::tenant_database(&self.tenant_db_prefix, tenant_code);
        self.acquire_key(tenant_code, &database).await
    }

    /// Handle for the system database (tenant catalog).
    pub async fn acquire_system(&self) -> Result<Arc<ConnectionHandle<C::Conn>>, CoreError> {
        let database = self.system_database.clone();
        self.acquire_key(SYSTEM_KEY, &database).await
    }

    async fn acquire_key(
        &self,
        key: &str,
        database: &str,
    ) -> Result<Arc<ConnectionHandle<C::Conn>>, CoreError> {
        loop {
            let step = {
                let mut slots = self.slots.lock().await;
                match slots.get(key) {
                    Some(Slot::Ready(h)) => Step::Probe(h.clone()),
                    Some(Slot::Creating(rx)) => Step::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(key.to_string(), Slot::Creating(rx));
                        Step::Create(tx)
                    }
                }
            };

            match step {
                Step::Probe(h) => {
                    if self.connector.probe(h.conn()).await {
                        return Ok(h);
                    }
                    tracing::warn!(key, database = %h.database(), "cached connection failed probe, recreating");
                    // Only the caller that still sees this exact handle evicts
                    // it; everyone else loops into the fresh slot.
                    {
                        let mut slots = self.slots.lock().await;
                        if let Some(Slot::Ready(current)) = slots.get(key) {
                            if Arc::ptr_eq(current, &h) {
                                slots.remove(key);
                            }
                        }
                    }
                    if let Err(e) = self.connector.disconnect(h.conn()).await {
                        tracing::warn!(key, error = %e, "close failed for dead connection");
                    }
                }
                Step::Wait(mut rx) => {
                    let outcome = loop {
                        let current = rx.borrow().clone();
                        if let Some(o) = current {
                            break Some(o);
                        }
                        if rx.changed().await.is_err() {
                            break rx.borrow().clone();
                        }
                    };
                    match outcome {
                        Some(Ok(h)) => return Ok(h),
                        Some(Err(failed)) => return Err(failed.into_core()),
                        // Creator was dropped before publishing: clear its
                        // dead slot and start over.
                        None => {
                            let mut slots = self.slots.lock().await;
                            if let Some(Slot::Creating(current)) = slots.get(key) {
                                if current.same_channel(&rx) {
                                    slots.remove(key);
                                }
                            }
                        }
                    }
                }
                Step::Create(tx) => {
                    return match self.connector.connect(database).await {
                        Ok(conn) => {
                            let handle = Arc::new(ConnectionHandle {
                                database: database.to_string(),
                                created_at: Utc::now(),
                                conn,
                            });
                            self.slots
                                .lock()
                                .await
                                .insert(key.to_string(), Slot::Ready(handle.clone()));
                            tracing::info!(key, database, "connection established");
                            let _ = tx.send(Some(Ok(handle.clone())));
                            Ok(handle)
                        }
                        Err(e) => {
                            self.slots.lock().await.remove(key);
                            let failed = CreationFailed {
                                key: key.to_string(),
                                reason: e.to_string(),
                            };
                            let _ = tx.send(Some(Err(failed.clone())));
                            Err(failed.into_core())
                        }
                    };
                }
            }
        }
    }

    /// Drop the cached handle for one tenant, closing its connection.
    pub async fn evict(&self, tenant_code: &str) {
        let slot = self.slots.lock().await.remove(tenant_code);
        if let Some(Slot::Ready(h)) = slot {
            if let Err(e) = self.connector.disconnect(h.conn()).await {
                tracing::warn!(key = tenant_code, error = %e, "close failed during evict");
            }
        }
    }

    /// Close every cached handle, including the system handle. Individual
    /// close failures are logged and do not stop the sweep.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Slot<C::Conn>)> =
            self.slots.lock().await.drain().collect();
        for (key, slot) in drained {
            if let Slot::Ready(h) = slot {
                match self.connector.disconnect(h.conn()).await {
                    Ok(()) => tracing::info!(key = %key, database = %h.database(), "connection closed"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "close failed during shutdown"),
                }
            }
        }
    }

    /// Probe every cached handle and report liveness, ordered by key.
    pub async fn health_report(&self) -> Vec<HandleHealth> {
        let snapshot: Vec<(String, Arc<ConnectionHandle<C::Conn>>)> = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .filter_map(|(k, s)| match s {
                    Slot::Ready(h) => Some((k.clone(), h.clone())),
                    Slot::Creating(_) => None,
                })
                .collect()
        };
        let mut out = Vec::with_capacity(snapshot.len());
        for (key, h) in snapshot {
            let alive = self.connector.probe(h.conn()).await;
            out.push(HandleHealth {
                key,
                database: h.database().to_string(),
                alive,
                created_at: h.created_at(),
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

/// Connects to PostgreSQL with one small pool per logical database.
pub struct PgConnector {
    settings: Settings,
}

impl PgConnector {
    pub fn new(settings: Settings) -> Self {
        PgConnector { settings }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgPool;

    async fn connect(&self, database: &str) -> Result<PgPool, BoxError> {
        let opts = PgConnectOptions::new()
            .host(&self.settings.db_host)
            .port(self.settings.db_port)
            .username(&self.settings.db_user)
            .password(&self.settings.db_password)
            .database(database);
        let connect = PgPoolOptions::new()
            .max_connections(self.settings.pool_max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(opts);
        match tokio::time::timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok(pool)) => Ok(pool),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(format!(
                "connect timed out after {}s",
                self.settings.connect_timeout.as_secs()
            )
            .into()),
        }
    }

    async fn probe(&self, conn: &PgPool) -> bool {
        match tokio::time::timeout(self.settings.probe_timeout, sqlx::query("SELECT 1").execute(conn))
            .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "liveness probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.probe_timeout.as_secs(),
                    "liveness probe timed out"
                );
                false
            }
        }
    }

    async fn disconnect(&self, conn: &PgPool) -> Result<(), BoxError> {
        conn.close().await;
        Ok(())
    }
}

impl TenantRouter {
    /// Production router from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        ConnectionRouter::new(
            PgConnector::new(settings.clone()),
            settings.system_database.clone(),
            settings.tenant_db_prefix.clone(),
        )
    }
}
