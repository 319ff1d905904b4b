//! The provisioning / deprovisioning state machines.
//!
//! # Invariants
//! - Ensure-database and ensure-role are probe-then-create, never
//!   create-and-ignore-duplicate, so "already satisfied" is distinguishable
//!   from a failed create.
//! - Extensions and extra SQL run **iff the database was created by this very
//!   call** (`db_created` is a local boolean, not a re-query). Replaying a
//!   Created event for a pre-existing database performs only the grant step.
//! - Failures in the core steps (database, role, grant) propagate and abort
//!   the event. Failures in extension creation or extra SQL are caught and
//!   logged per category; committed steps are never rolled back.
//! - Drops are independent: a failed database drop never suppresses the role
//!   drop attempt, and vice versa. Deprovisioning never raises.

use crate::{DbGateway, GatewayError};
use pgc_schemas::DatabaseClaim;
use tracing::{error, info, warn};

/// What one provisioning pass actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub db_created: bool,
    pub role_created: bool,
    pub extensions_applied: usize,
    pub extensions_failed: usize,
    pub extra_sql_applied: bool,
    pub extra_sql_failed: bool,
}

/// What one deprovisioning pass actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeprovisionOutcome {
    pub db_dropped: bool,
    pub role_dropped: bool,
}

/// Drive the target instance toward the claim's desired state.
///
/// Errors from the core steps (1–3) propagate; the caller drops the event
/// and the stream continues.
pub async fn provision(
    gateway: &mut dyn DbGateway,
    resource_name: &str,
    claim: &DatabaseClaim,
) -> Result<ProvisionOutcome, GatewayError> {
    let mut outcome = ProvisionOutcome::default();

    // 1. Ensure database. `db_created` gates the first-time-only steps below.
    if gateway.database_exists(&claim.db_name).await? {
        info!(
            resource = %resource_name,
            db = %claim.db_name,
            "database already exists"
        );
    } else {
        gateway.create_database(&claim.db_name).await?;
        outcome.db_created = true;
        info!(resource = %resource_name, db = %claim.db_name, "database created");
    }

    // 2. Ensure role — independent of whether the database was created.
    if gateway.role_exists(&claim.db_role_name).await? {
        info!(
            resource = %resource_name,
            role = %claim.db_role_name,
            "role already exists"
        );
    } else {
        gateway
            .create_role(&claim.db_role_name, &claim.db_role_password)
            .await?;
        outcome.role_created = true;
        info!(resource = %resource_name, role = %claim.db_role_name, "role created");
    }

    // 3. Grant — always, idempotent under the privilege model.
    gateway
        .grant_database_privileges(&claim.db_name, &claim.db_role_name)
        .await?;

    // 4/5. First-time-only initialization. Not reapplied to a database that
    // already existed, even when the claim requests them.
    if !outcome.db_created {
        return Ok(outcome);
    }

    for extension in &claim.db_extensions {
        match gateway.create_extension(&claim.db_name, extension).await {
            Ok(()) => {
                outcome.extensions_applied += 1;
                info!(
                    resource = %resource_name,
                    db = %claim.db_name,
                    extension = %extension,
                    "extension created"
                );
            }
            Err(err) => {
                outcome.extensions_failed += 1;
                error!(
                    resource = %resource_name,
                    db = %claim.db_name,
                    extension = %extension,
                    error = %err,
                    "extension creation failed; continuing"
                );
            }
        }
    }

    if let Some(sql) = &claim.extra_sql {
        match gateway
            .run_sql_as_role(
                &claim.db_name,
                &claim.db_role_name,
                &claim.db_role_password,
                sql,
            )
            .await
        {
            Ok(()) => {
                outcome.extra_sql_applied = true;
                info!(resource = %resource_name, db = %claim.db_name, "extra SQL applied");
            }
            Err(err) => {
                outcome.extra_sql_failed = true;
                error!(
                    resource = %resource_name,
                    db = %claim.db_name,
                    error = %err,
                    "extra SQL failed; database remains partially initialized"
                );
            }
        }
    }

    Ok(outcome)
}

/// Tear down per the claim's `onDeletion` opt-ins. Both flags default to
/// false — with no opt-in this observes the deletion and does nothing.
pub async fn deprovision(
    gateway: &mut dyn DbGateway,
    resource_name: &str,
    claim: &DatabaseClaim,
) -> DeprovisionOutcome {
    let mut outcome = DeprovisionOutcome::default();

    if claim.on_deletion.drop_db {
        match gateway.drop_database(&claim.db_name).await {
            Ok(()) => {
                outcome.db_dropped = true;
                info!(resource = %resource_name, db = %claim.db_name, "database dropped");
            }
            Err(err) => {
                error!(
                    resource = %resource_name,
                    db = %claim.db_name,
                    error = %err,
                    "database drop failed"
                );
            }
        }
    }

    if claim.on_deletion.drop_role {
        match gateway.drop_role(&claim.db_role_name).await {
            Ok(()) => {
                outcome.role_dropped = true;
                info!(resource = %resource_name, role = %claim.db_role_name, "role dropped");
            }
            Err(err) => {
                error!(
                    resource = %resource_name,
                    role = %claim.db_role_name,
                    error = %err,
                    "role drop failed"
                );
            }
        }
    }

    if !claim.on_deletion.drop_db && !claim.on_deletion.drop_role {
        warn!(
            resource = %resource_name,
            db = %claim.db_name,
            "claim deleted without onDeletion opt-in; nothing dropped"
        );
    }

    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
