//! Provisioning and deprovisioning executors for target Postgres instances.
//!
//! The SQL surface is behind the [`DbGateway`] trait so the executor
//! ordering/gating logic is testable without a server; [`pg::PgGateway`] is
//! the live implementation. One gateway is connected per event and dropped
//! afterwards — there is no pooling, by design.

pub mod executor;
pub mod ident;
pub mod pg;

pub use executor::{deprovision, provision, DeprovisionOutcome, ProvisionOutcome};

use async_trait::async_trait;
use pgc_config::InstanceCredentials;
use std::fmt;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`DbGateway`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Could not open a connection to the instance.
    Connect(String),
    /// A statement failed (connectivity mid-statement, permissions, syntax).
    Sql(String),
    /// An interpolated identifier was rejected before reaching the server.
    InvalidIdentifier(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Connect(msg) => write!(f, "connect error: {msg}"),
            GatewayError::Sql(msg) => write!(f, "sql error: {msg}"),
            GatewayError::InvalidIdentifier(msg) => write!(f, "invalid identifier: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Sql(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Gateway traits
// ---------------------------------------------------------------------------

/// The SQL surface one reconcile pass needs against a single instance.
///
/// Implementations must be object-safe so callers can hold a
/// `Box<dyn DbGateway>` without knowing the concrete type. The administrative
/// connection is implicit in the implementation; `create_extension` and
/// `run_sql_as_role` open their own connections scoped to the named database.
#[async_trait]
pub trait DbGateway: Send {
    async fn database_exists(&mut self, name: &str) -> Result<bool, GatewayError>;
    async fn create_database(&mut self, name: &str) -> Result<(), GatewayError>;

    async fn role_exists(&mut self, name: &str) -> Result<bool, GatewayError>;
    async fn create_role(&mut self, name: &str, password: &str) -> Result<(), GatewayError>;

    /// `GRANT ALL PRIVILEGES ON DATABASE <db> TO <role>` — idempotent by
    /// nature of the underlying privilege model.
    async fn grant_database_privileges(&mut self, db: &str, role: &str)
        -> Result<(), GatewayError>;

    /// `CREATE EXTENSION IF NOT EXISTS <ext>` on an administrative connection
    /// scoped to `db`, auto-committed.
    async fn create_extension(&mut self, db: &str, extension: &str) -> Result<(), GatewayError>;

    /// Run a statement batch on a connection scoped to `db`, authenticated as
    /// `role`, inside a single transaction committed only on full success.
    async fn run_sql_as_role(
        &mut self,
        db: &str,
        role: &str,
        password: &str,
        sql: &str,
    ) -> Result<(), GatewayError>;

    async fn drop_database(&mut self, name: &str) -> Result<(), GatewayError>;
    async fn drop_role(&mut self, name: &str) -> Result<(), GatewayError>;
}

/// Opens a [`DbGateway`] for one reconcile pass.
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn connect(
        &self,
        creds: &InstanceCredentials,
    ) -> Result<Box<dyn DbGateway>, GatewayError>;
}
