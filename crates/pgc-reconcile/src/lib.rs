//! The event → action state machine.
//!
//! One decoded event maps deterministically and idempotently onto
//! provisioning or deprovisioning actions against a single resolved
//! instance. Every event is processed under its own gateway lifetime: the
//! connection is acquired, used, and released for that event alone.
//!
//! Nothing here ever raises past [`EventHandler::handle`] — a failed pass is
//! logged and dropped so the stream keeps flowing.

use async_trait::async_trait;
use pgc_config::CredentialResolver;
use pgc_db::{deprovision, provision, GatewayFactory};
use pgc_schemas::{ChangeEvent, ClaimEvent};
use pgc_watch::EventHandler;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reconciles claim events against target instances.
pub struct Reconciler {
    resolver: CredentialResolver,
    factory: Arc<dyn GatewayFactory>,
}

impl Reconciler {
    pub fn new(resolver: CredentialResolver, factory: Arc<dyn GatewayFactory>) -> Self {
        Reconciler { resolver, factory }
    }

    async fn apply(&mut self, event: &ClaimEvent) {
        let Some(mut gateway) = self.open_gateway(event).await else {
            return;
        };

        match provision(gateway.as_mut(), &event.resource_name, &event.claim).await {
            Ok(outcome) => {
                info!(
                    resource = %event.resource_name,
                    db = %event.claim.db_name,
                    db_created = outcome.db_created,
                    role_created = outcome.role_created,
                    "claim reconciled"
                );
            }
            Err(err) => {
                error!(
                    resource = %event.resource_name,
                    db = %event.claim.db_name,
                    error = %err,
                    "provisioning failed; event dropped"
                );
            }
        }
    }

    async fn retire(&mut self, event: &ClaimEvent) {
        let Some(mut gateway) = self.open_gateway(event).await else {
            return;
        };

        // Never raises — each drop is individually caught and logged.
        let outcome = deprovision(gateway.as_mut(), &event.resource_name, &event.claim).await;
        info!(
            resource = %event.resource_name,
            db = %event.claim.db_name,
            db_dropped = outcome.db_dropped,
            role_dropped = outcome.role_dropped,
            "claim deletion handled"
        );
    }

    /// Resolve credentials and open the per-event gateway. On any failure
    /// the event is dropped with an error log and `None` is returned.
    async fn open_gateway(&self, event: &ClaimEvent) -> Option<Box<dyn pgc_db::DbGateway>> {
        let instance_id = event.claim.db_instance_id.as_deref();
        let Some(creds) = self.resolver.resolve(instance_id) else {
            error!(
                resource = %event.resource_name,
                instance = instance_id.unwrap_or(pgc_config::DEFAULT_INSTANCE_ID),
                "no credentials configured for instance; event dropped"
            );
            return None;
        };

        match self.factory.connect(creds).await {
            Ok(gateway) => Some(gateway),
            Err(err) => {
                error!(
                    resource = %event.resource_name,
                    instance = instance_id.unwrap_or(pgc_config::DEFAULT_INSTANCE_ID),
                    error = %err,
                    "instance connection failed; event dropped"
                );
                None
            }
        }
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Created(ev) => self.apply(&ev).await,
            ChangeEvent::Deleted(ev) => self.retire(&ev).await,
            ChangeEvent::Updated(ev) => {
                // In-place modification of a claim's desired state is
                // unsupported; observed and discarded.
                warn!(
                    resource = %ev.resource_name,
                    db = %ev.claim.db_name,
                    "claim update ignored: in-place modification is unsupported"
                );
            }
            ChangeEvent::Gone { notice } => {
                debug!(notice = %notice, "Gone event reached the handler; owned by the driver");
            }
            ChangeEvent::Malformed { detail } => {
                debug!(detail = %detail, "malformed event reached the handler; owned by the driver");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pgc_config::load_layered_yaml_from_strings;
    use pgc_db::{DbGateway, GatewayError};
    use pgc_schemas::{DatabaseClaim, OnDeletion};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Factory that refuses nothing and records how many connections were
    /// ever attempted; the gateways it hands out count statements.
    #[derive(Default)]
    struct CountingFactory {
        connects: AtomicUsize,
        statements: Arc<AtomicUsize>,
    }

    struct CountingGateway {
        statements: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DbGateway for CountingGateway {
        async fn database_exists(&mut self, _name: &str) -> Result<bool, GatewayError> {
            Ok(false)
        }
        async fn create_database(&mut self, _name: &str) -> Result<(), GatewayError> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn role_exists(&mut self, _name: &str) -> Result<bool, GatewayError> {
            Ok(false)
        }
        async fn create_role(&mut self, _n: &str, _p: &str) -> Result<(), GatewayError> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn grant_database_privileges(
            &mut self,
            _db: &str,
            _role: &str,
        ) -> Result<(), GatewayError> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn create_extension(&mut self, _db: &str, _ext: &str) -> Result<(), GatewayError> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn run_sql_as_role(
            &mut self,
            _db: &str,
            _role: &str,
            _pw: &str,
            _sql: &str,
        ) -> Result<(), GatewayError> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn drop_database(&mut self, _name: &str) -> Result<(), GatewayError> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn drop_role(&mut self, _name: &str) -> Result<(), GatewayError> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl GatewayFactory for CountingFactory {
        async fn connect(
            &self,
            _creds: &pgc_config::InstanceCredentials,
        ) -> Result<Box<dyn DbGateway>, GatewayError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingGateway {
                statements: Arc::clone(&self.statements),
            }))
        }
    }

    fn resolver() -> CredentialResolver {
        let doc = r#"
watch:
  base_url: https://c
  resource_path: /apis/x
instances:
  default:
    host: h
    user: u
    password: p
"#;
        load_layered_yaml_from_strings(&[doc])
            .unwrap()
            .config
            .resolver()
    }

    fn claim_event(instance_id: Option<&str>) -> ClaimEvent {
        ClaimEvent {
            resource_name: "claim-1".to_string(),
            cursor: Some("1".to_string()),
            claim: DatabaseClaim {
                db_name: "appdb".to_string(),
                db_role_name: "approle".to_string(),
                db_role_password: "pw".to_string(),
                db_instance_id: instance_id.map(str::to_string),
                db_extensions: vec![],
                extra_sql: None,
                on_deletion: OnDeletion::default(),
            },
        }
    }

    #[tokio::test]
    async fn unknown_instance_is_skipped_without_a_connection_attempt() {
        let factory = Arc::new(CountingFactory::default());
        let mut reconciler = Reconciler::new(resolver(), Arc::clone(&factory));

        reconciler
            .handle(ChangeEvent::Created(claim_event(Some("ghost"))))
            .await;

        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
        assert_eq!(factory.statements.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn updated_events_never_touch_the_database() {
        let factory = Arc::new(CountingFactory::default());
        let mut reconciler = Reconciler::new(resolver(), Arc::clone(&factory));

        reconciler
            .handle(ChangeEvent::Updated(claim_event(None)))
            .await;

        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
        assert_eq!(factory.statements.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn created_event_connects_once_and_provisions() {
        let factory = Arc::new(CountingFactory::default());
        let mut reconciler = Reconciler::new(resolver(), Arc::clone(&factory));

        reconciler
            .handle(ChangeEvent::Created(claim_event(None)))
            .await;

        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        // create db + create role + grant
        assert_eq!(factory.statements.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connect_failure_drops_the_event_without_panicking() {
        struct RefusingFactory;

        #[async_trait]
        impl GatewayFactory for RefusingFactory {
            async fn connect(
                &self,
                _creds: &pgc_config::InstanceCredentials,
            ) -> Result<Box<dyn DbGateway>, GatewayError> {
                Err(GatewayError::Connect("refused".to_string()))
            }
        }

        let mut reconciler = Reconciler::new(resolver(), Arc::new(RefusingFactory));
        reconciler
            .handle(ChangeEvent::Created(claim_event(None)))
            .await;
        // Reaching this point is the assertion: the failure was contained.
    }
}
