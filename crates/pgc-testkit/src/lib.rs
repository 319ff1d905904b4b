//! In-process fixtures for end-to-end controller scenarios.
//!
//! No network and no database: [`ScriptedSource`] plays back watch streams,
//! [`RecordingFactory`] hands out gateways that track instance state and log
//! every mutating statement. The scenario tests under `tests/` wire these
//! into the real driver and reconciler.

pub mod recording;
pub mod scripted;

pub use recording::{RecordingFactory, RecordingState};
pub use scripted::{ScriptedSource, StreamScript};

use pgc_config::CredentialResolver;
use pgc_schemas::RawWatchEvent;
use serde_json::{json, Value};

/// Resolver with a `default` and an `east-1` instance, matching what the
/// scenario claims reference.
pub fn test_resolver() -> CredentialResolver {
    let doc = r#"
watch:
  base_url: https://scripted
  resource_path: /apis/test
instances:
  default:
    host: db-default.test
    user: postgres
    password: pw
  east-1:
    host: db-east.test
    user: postgres
    password: pw
"#;
    pgc_config::load_layered_yaml_from_strings(&[doc])
        .expect("test config must load")
        .config
        .resolver()
}

/// Minimal claim spec; extend with `merge_spec` for extras.
pub fn claim_spec(db: &str, role: &str) -> Value {
    json!({
        "dbName": db,
        "dbRoleName": role,
        "dbRolePassword": "test-pw"
    })
}

/// Overlay `extra` keys onto a claim spec.
pub fn merge_spec(mut spec: Value, extra: Value) -> Value {
    if let (Some(base), Some(over)) = (spec.as_object_mut(), extra.as_object()) {
        for (k, v) in over {
            base.insert(k.clone(), v.clone());
        }
    }
    spec
}

fn claim_event(kind: &str, name: &str, resource_version: &str, spec: Value) -> RawWatchEvent {
    RawWatchEvent {
        kind: kind.to_string(),
        object: json!({
            "metadata": {"name": name, "resourceVersion": resource_version},
            "spec": spec
        }),
    }
}

pub fn added(name: &str, resource_version: &str, spec: Value) -> RawWatchEvent {
    claim_event("ADDED", name, resource_version, spec)
}

pub fn modified(name: &str, resource_version: &str, spec: Value) -> RawWatchEvent {
    claim_event("MODIFIED", name, resource_version, spec)
}

pub fn deleted(name: &str, resource_version: &str, spec: Value) -> RawWatchEvent {
    claim_event("DELETED", name, resource_version, spec)
}

/// A 410 status frame carrying the expiry diagnostic.
pub fn gone(message: &str) -> RawWatchEvent {
    RawWatchEvent {
        kind: "ERROR".to_string(),
        object: json!({"code": 410, "message": message}),
    }
}
