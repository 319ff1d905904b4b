//! Boundary types for database-claim change events.
//!
//! Everything that crosses the watch transport is decoded here, once, into
//! strongly-typed values. Downstream crates match on [`ChangeEvent`] and the
//! compiler keeps those matches exhaustive; nothing past this module touches
//! raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// Claim types
// ---------------------------------------------------------------------------

/// Destructive-action opt-in carried by a claim.
///
/// Both flags default to `false`: deletion of a claim is observed but has no
/// destructive side effect unless the claim explicitly asked for one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnDeletion {
    #[serde(rename = "dropDB", default)]
    pub drop_db: bool,
    #[serde(rename = "dropRole", default)]
    pub drop_role: bool,
}

/// Desired-state record describing one database + role to provision.
///
/// Field names mirror the wire shape (`dbName`, `dbRoleName`, ...). The role
/// password is a secret; `Debug` redacts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseClaim {
    #[serde(rename = "dbName")]
    pub db_name: String,

    #[serde(rename = "dbRoleName")]
    pub db_role_name: String,

    #[serde(rename = "dbRolePassword")]
    pub db_role_password: String,

    /// Logical id of the target instance. `None` resolves to the reserved
    /// `"default"` instance.
    #[serde(rename = "dbInstanceId", default, skip_serializing_if = "Option::is_none")]
    pub db_instance_id: Option<String>,

    /// Extensions to create in the database on first provision.
    #[serde(rename = "dbExtensions", default, skip_serializing_if = "Vec::is_empty")]
    pub db_extensions: Vec<String>,

    /// Arbitrary statement batch run once, on first provision, as the role.
    #[serde(rename = "extraSQL", default, skip_serializing_if = "Option::is_none")]
    pub extra_sql: Option<String>,

    #[serde(rename = "onDeletion", default)]
    pub on_deletion: OnDeletion,
}

impl fmt::Debug for DatabaseClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the role password.
        f.debug_struct("DatabaseClaim")
            .field("db_name", &self.db_name)
            .field("db_role_name", &self.db_role_name)
            .field("db_role_password", &"<REDACTED>")
            .field("db_instance_id", &self.db_instance_id)
            .field("db_extensions", &self.db_extensions)
            .field("extra_sql", &self.extra_sql)
            .field("on_deletion", &self.on_deletion)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// One raw notification exactly as delivered by the watch transport.
///
/// `kind` is the transport's type discriminator (`ADDED` / `MODIFIED` /
/// `DELETED`, or `ERROR` for status objects); `object` is either a claim
/// resource or a status payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWatchEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub object: Value,
}

// ---------------------------------------------------------------------------
// Decoded events
// ---------------------------------------------------------------------------

/// A well-shaped, claim-bearing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEvent {
    /// `metadata.name` of the claim resource — the reconcile log key.
    pub resource_name: String,
    /// `metadata.resourceVersion`, when the transport supplied one.
    pub cursor: Option<String>,
    pub claim: DatabaseClaim,
}

/// A change notification, decoded at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(ClaimEvent),
    Updated(ClaimEvent),
    Deleted(ClaimEvent),
    /// The stream's cursor is no longer resumable from history. Carries the
    /// raw diagnostic so the resume logic can extract a replacement cursor.
    Gone { notice: String },
    /// Required fields were missing or undecodable. Logged and skipped; the
    /// cursor is never advanced past a malformed event.
    Malformed { detail: String },
}

/// Status code a watch transport uses to signal an expired cursor.
pub const GONE_STATUS_CODE: i64 = 410;

impl ChangeEvent {
    /// Decode one raw notification.
    ///
    /// Never fails: anything that cannot be decoded into a claim-bearing
    /// variant or a `Gone` status becomes `Malformed` with a diagnostic.
    pub fn decode(raw: &RawWatchEvent) -> ChangeEvent {
        match raw.kind.as_str() {
            "ADDED" => Self::decode_claim(raw, ChangeEvent::Created),
            "MODIFIED" => Self::decode_claim(raw, ChangeEvent::Updated),
            "DELETED" => Self::decode_claim(raw, ChangeEvent::Deleted),
            "ERROR" => Self::decode_status(&raw.object),
            other => ChangeEvent::Malformed {
                detail: format!("unknown event type '{other}'"),
            },
        }
    }

    /// The resource version to advance the cursor to, when this event
    /// carries one.
    pub fn cursor(&self) -> Option<&str> {
        match self {
            ChangeEvent::Created(ev) | ChangeEvent::Updated(ev) | ChangeEvent::Deleted(ev) => {
                ev.cursor.as_deref()
            }
            ChangeEvent::Gone { .. } | ChangeEvent::Malformed { .. } => None,
        }
    }

    fn decode_claim(raw: &RawWatchEvent, wrap: fn(ClaimEvent) -> ChangeEvent) -> ChangeEvent {
        let metadata = raw.object.get("metadata");
        let spec = raw.object.get("spec");

        let Some(name) = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
        else {
            return ChangeEvent::Malformed {
                detail: "missing metadata.name".to_string(),
            };
        };

        let Some(spec) = spec else {
            return ChangeEvent::Malformed {
                detail: format!("resource '{name}': missing spec"),
            };
        };

        let claim: DatabaseClaim = match serde_json::from_value(spec.clone()) {
            Ok(claim) => claim,
            Err(err) => {
                return ChangeEvent::Malformed {
                    detail: format!("resource '{name}': undecodable spec: {err}"),
                }
            }
        };

        if claim.db_name.is_empty() || claim.db_role_name.is_empty() {
            return ChangeEvent::Malformed {
                detail: format!("resource '{name}': dbName and dbRoleName must be non-empty"),
            };
        }

        let cursor = metadata
            .and_then(|m| m.get("resourceVersion"))
            .and_then(Value::as_str)
            .map(str::to_string);

        wrap(ClaimEvent {
            resource_name: name.to_string(),
            cursor,
            claim,
        })
    }

    fn decode_status(object: &Value) -> ChangeEvent {
        let code = object.get("code").and_then(Value::as_i64);
        let message = object
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if code == Some(GONE_STATUS_CODE) {
            ChangeEvent::Gone {
                notice: message.to_string(),
            }
        } else {
            ChangeEvent::Malformed {
                detail: format!(
                    "status event with code {:?}: {message}",
                    code
                ),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
