//! Campus core: the systems core of a multi-tenant school-administration
//! backend. Per-tenant connection routing, the fee transaction ledger,
//! installment scheduling, and the tenant configuration cache.

pub mod config_cache;
pub mod context;
pub mod error;
pub mod ledger;
pub mod router;
pub mod schema;
pub mod settings;
pub mod tenant;

pub use config_cache::{ConfigCache, FieldDefinition, NewFieldDefinition, TenantConfiguration};
pub use context::AppContext;
pub use error::CoreError;
pub use ledger::{
    FeeInstallment, FeeLedger, FeeTransaction, InstallmentScheduler, InstallmentStatus,
    NewInstallment, TransactionInput, TransactionStatus, TransactionType,
};
pub use router::{
    ConnectionHandle, ConnectionRouter, Connector, HandleHealth, PgConnector, TenantRouter,
};
pub use settings::Settings;
pub use tenant::{Tenant, TenantRegistry};
