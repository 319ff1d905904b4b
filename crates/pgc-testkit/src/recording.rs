//! A gateway factory whose gateways mutate shared in-memory instance state
//! and log every mutating statement.

use async_trait::async_trait;
use pgc_config::InstanceCredentials;
use pgc_db::{DbGateway, GatewayError, GatewayFactory};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Shared instance state. Pre-seed `databases`/`roles` to model objects that
/// exist before the controller starts; set the `fail_*` fields to inject
/// failures.
#[derive(Debug, Default)]
pub struct RecordingState {
    pub databases: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    /// Rendered mutating statements, in issue order. Existence probes are
    /// not statements and are not recorded.
    pub statements: Vec<String>,
    pub fail_connect: bool,
    pub fail_drop_database: bool,
    pub fail_drop_role: bool,
    pub fail_extensions: BTreeSet<String>,
    pub fail_extra_sql: bool,
}

/// Factory handing out gateways over one shared [`RecordingState`].
#[derive(Debug, Default)]
pub struct RecordingFactory {
    state: Arc<Mutex<RecordingState>>,
    connected_hosts: Mutex<Vec<String>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingFactory::default())
    }

    pub fn with_state(state: RecordingState) -> Arc<Self> {
        Arc::new(RecordingFactory {
            state: Arc::new(Mutex::new(state)),
            connected_hosts: Mutex::new(Vec::new()),
        })
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connected_hosts.lock().unwrap().len()
    }

    /// Hosts passed to `connect`, in order — shows which instance each
    /// event was routed to.
    pub fn connected_hosts(&self) -> Vec<String> {
        self.connected_hosts.lock().unwrap().clone()
    }

    pub fn state(&self) -> Arc<Mutex<RecordingState>> {
        Arc::clone(&self.state)
    }
}

struct RecordingGateway {
    state: Arc<Mutex<RecordingState>>,
}

#[async_trait]
impl DbGateway for RecordingGateway {
    async fn database_exists(&mut self, name: &str) -> Result<bool, GatewayError> {
        Ok(self.state.lock().unwrap().databases.contains(name))
    }

    async fn create_database(&mut self, name: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.databases.insert(name.to_string());
        state.statements.push(format!("CREATE DATABASE {name}"));
        Ok(())
    }

    async fn role_exists(&mut self, name: &str) -> Result<bool, GatewayError> {
        Ok(self.state.lock().unwrap().roles.contains(name))
    }

    async fn create_role(&mut self, name: &str, _password: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.roles.insert(name.to_string());
        state.statements.push(format!("CREATE ROLE {name}"));
        Ok(())
    }

    async fn grant_database_privileges(
        &mut self,
        db: &str,
        role: &str,
    ) -> Result<(), GatewayError> {
        self.state
            .lock()
            .unwrap()
            .statements
            .push(format!("GRANT {db} TO {role}"));
        Ok(())
    }

    async fn create_extension(&mut self, db: &str, extension: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_extensions.contains(extension) {
            return Err(GatewayError::Sql(format!("extension {extension} refused")));
        }
        state
            .statements
            .push(format!("CREATE EXTENSION {db}.{extension}"));
        Ok(())
    }

    async fn run_sql_as_role(
        &mut self,
        db: &str,
        role: &str,
        _password: &str,
        _sql: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_extra_sql {
            return Err(GatewayError::Sql("extra sql refused".to_string()));
        }
        state.statements.push(format!("EXTRA SQL ON {db} AS {role}"));
        Ok(())
    }

    async fn drop_database(&mut self, name: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_drop_database {
            return Err(GatewayError::Sql("database has open connections".to_string()));
        }
        state.databases.remove(name);
        state.statements.push(format!("DROP DATABASE {name}"));
        Ok(())
    }

    async fn drop_role(&mut self, name: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_drop_role {
            return Err(GatewayError::Sql("role owns objects".to_string()));
        }
        state.roles.remove(name);
        state.statements.push(format!("DROP ROLE {name}"));
        Ok(())
    }
}

#[async_trait]
impl GatewayFactory for RecordingFactory {
    async fn connect(
        &self,
        creds: &InstanceCredentials,
    ) -> Result<Box<dyn DbGateway>, GatewayError> {
        if self.state.lock().unwrap().fail_connect {
            return Err(GatewayError::Connect("refused by test".to_string()));
        }
        self.connected_hosts
            .lock()
            .unwrap()
            .push(creds.host.clone());
        Ok(Box::new(RecordingGateway {
            state: Arc::clone(&self.state),
        }))
    }
}
