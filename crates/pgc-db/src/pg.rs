//! Live [`DbGateway`] over single sqlx Postgres connections.
//!
//! One administrative connection is opened per reconcile pass and dropped
//! with the gateway. Extension creation reuses a second administrative
//! connection scoped to the target database; extra SQL opens a connection
//! authenticated as the claim's role, with a server-side statement timeout.

use crate::ident::{quote_ident, quote_literal};
use crate::{DbGateway, GatewayError, GatewayFactory};
use async_trait::async_trait;
use pgc_config::InstanceCredentials;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use tracing::debug;

fn admin_options(creds: &InstanceCredentials, database: &str) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&creds.host)
        .port(creds.port)
        .username(&creds.user)
        .password(&creds.password)
        .database(database)
}

async fn open(options: &PgConnectOptions) -> Result<PgConnection, GatewayError> {
    PgConnection::connect_with(options)
        .await
        .map_err(|e| GatewayError::Connect(e.to_string()))
}

/// Live gateway against one configured instance.
pub struct PgGateway {
    creds: InstanceCredentials,
    admin: PgConnection,
    /// Administrative connection scoped to a claim database, kept for the
    /// duration of the pass so each extension runs on the same connection in
    /// its own auto-committed statement.
    scoped_admin: Option<(String, PgConnection)>,
}

impl PgGateway {
    pub async fn connect(creds: &InstanceCredentials) -> Result<Self, GatewayError> {
        let admin = open(&admin_options(creds, &creds.dbname)).await?;
        debug!(host = %creds.host, port = creds.port, "administrative connection opened");
        Ok(PgGateway {
            creds: creds.clone(),
            admin,
            scoped_admin: None,
        })
    }

    async fn scoped_admin(&mut self, db: &str) -> Result<&mut PgConnection, GatewayError> {
        let stale = match &self.scoped_admin {
            Some((held, _)) => held != db,
            None => true,
        };
        if stale {
            let conn = open(&admin_options(&self.creds, db)).await?;
            self.scoped_admin = Some((db.to_string(), conn));
        }
        Ok(&mut self.scoped_admin.as_mut().expect("just set").1)
    }
}

#[async_trait]
impl DbGateway for PgGateway {
    async fn database_exists(&mut self, name: &str) -> Result<bool, GatewayError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(name)
                .fetch_optional(&mut self.admin)
                .await?;
        Ok(row.is_some())
    }

    async fn create_database(&mut self, name: &str) -> Result<(), GatewayError> {
        let stmt = format!("CREATE DATABASE {}", quote_ident(name)?);
        self.admin.execute(stmt.as_str()).await?;
        Ok(())
    }

    async fn role_exists(&mut self, name: &str) -> Result<bool, GatewayError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM pg_roles WHERE rolname = $1")
            .bind(name)
            .fetch_optional(&mut self.admin)
            .await?;
        Ok(row.is_some())
    }

    async fn create_role(&mut self, name: &str, password: &str) -> Result<(), GatewayError> {
        let stmt = format!(
            "CREATE ROLE {} PASSWORD {} LOGIN",
            quote_ident(name)?,
            quote_literal(password)?
        );
        self.admin.execute(stmt.as_str()).await?;
        Ok(())
    }

    async fn grant_database_privileges(
        &mut self,
        db: &str,
        role: &str,
    ) -> Result<(), GatewayError> {
        let stmt = format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
            quote_ident(db)?,
            quote_ident(role)?
        );
        self.admin.execute(stmt.as_str()).await?;
        Ok(())
    }

    async fn create_extension(&mut self, db: &str, extension: &str) -> Result<(), GatewayError> {
        let stmt = format!(
            "CREATE EXTENSION IF NOT EXISTS {}",
            quote_ident(extension)?
        );
        let conn = self.scoped_admin(db).await?;
        conn.execute(stmt.as_str()).await?;
        Ok(())
    }

    async fn run_sql_as_role(
        &mut self,
        db: &str,
        role: &str,
        password: &str,
        sql: &str,
    ) -> Result<(), GatewayError> {
        let timeout_ms = self.creds.statement_timeout_secs.saturating_mul(1000);
        let options = PgConnectOptions::new()
            .host(&self.creds.host)
            .port(self.creds.port)
            .username(role)
            .password(password)
            .database(db)
            .options([("statement_timeout", timeout_ms.to_string())]);

        let mut conn = open(&options).await?;
        let mut tx = conn.begin().await?;
        (&mut *tx).execute(sql).await?;
        tx.commit().await?;
        conn.close().await.ok();
        Ok(())
    }

    async fn drop_database(&mut self, name: &str) -> Result<(), GatewayError> {
        // A scoped connection into the target database would block the drop.
        if let Some((held, conn)) = self.scoped_admin.take() {
            if held == name {
                conn.close().await.ok();
            } else {
                self.scoped_admin = Some((held, conn));
            }
        }
        let stmt = format!("DROP DATABASE IF EXISTS {}", quote_ident(name)?);
        self.admin.execute(stmt.as_str()).await?;
        Ok(())
    }

    async fn drop_role(&mut self, name: &str) -> Result<(), GatewayError> {
        let stmt = format!("DROP ROLE IF EXISTS {}", quote_ident(name)?);
        self.admin.execute(stmt.as_str()).await?;
        Ok(())
    }
}

/// Factory opening one [`PgGateway`] per reconcile pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgGatewayFactory;

#[async_trait]
impl GatewayFactory for PgGatewayFactory {
    async fn connect(
        &self,
        creds: &InstanceCredentials,
    ) -> Result<Box<dyn DbGateway>, GatewayError> {
        Ok(Box::new(PgGateway::connect(creds).await?))
    }
}
