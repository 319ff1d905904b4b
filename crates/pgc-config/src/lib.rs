//! Static controller configuration.
//!
//! Configuration is a set of YAML documents merged in order (later documents
//! override earlier ones), enumerating the watch endpoint and the target
//! database instances keyed by logical id. The reserved id `"default"` is
//! what a claim with no `dbInstanceId` resolves to.
//!
//! # Secrets contract
//! - YAML may store an instance password inline (`password:`) or, preferred,
//!   the **name** of an env var holding it (`password_env:`).
//! - Error messages reference env var NAMES, never values.
//! - `Debug` impls on credential-bearing structs redact the password.
//! - The config hash is computed with every password leaf redacted, so it is
//!   stable across secret rotation and safe to log.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;

/// Reserved instance id a claim with no `dbInstanceId` resolves to.
pub const DEFAULT_INSTANCE_ID: &str = "default";

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_MAINTENANCE_DB: &str = "postgres";
const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Resolved types
// ---------------------------------------------------------------------------

/// Connection parameters for one target instance, secrets resolved.
///
/// Immutable after load; many claims may reference the same instance.
#[derive(Clone, PartialEq, Eq)]
pub struct InstanceCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Maintenance database the administrative connection opens against.
    pub dbname: String,
    /// Bound on any single statement of user-supplied extra SQL.
    pub statement_timeout_secs: u64,
}

impl fmt::Debug for InstanceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<REDACTED>")
            .field("dbname", &self.dbname)
            .field("statement_timeout_secs", &self.statement_timeout_secs)
            .finish()
    }
}

/// Watch endpoint parameters for the live transport.
#[derive(Clone)]
pub struct WatchConfig {
    /// e.g. `https://cluster.example:6443`
    pub base_url: String,
    /// e.g. `/apis/postgresql.org/v1/pgdatabases`
    pub resource_path: String,
    /// Bearer token resolved from the env var named in the file, if any.
    pub bearer_token: Option<String>,
}

impl fmt::Debug for WatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchConfig")
            .field("base_url", &self.base_url)
            .field("resource_path", &self.resource_path)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// The full controller configuration, secrets resolved.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub log_level: String,
    pub watch: WatchConfig,
    pub instances: BTreeMap<String, InstanceCredentials>,
}

impl ControllerConfig {
    pub fn resolver(&self) -> CredentialResolver {
        CredentialResolver {
            instances: self.instances.clone(),
        }
    }
}

/// Load result: the resolved config plus a hash of the merged document
/// (passwords redacted) for the startup log.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub config: ControllerConfig,
}

// ---------------------------------------------------------------------------
// Credential resolver
// ---------------------------------------------------------------------------

/// Pure lookup from instance id to connection parameters.
///
/// No state beyond the loaded config, no side effects; safe to call
/// repeatedly and concurrently.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    instances: BTreeMap<String, InstanceCredentials>,
}

impl CredentialResolver {
    /// Resolve an instance id; `None` maps to [`DEFAULT_INSTANCE_ID`].
    pub fn resolve(&self, instance_id: Option<&str>) -> Option<&InstanceCredentials> {
        self.instances
            .get(instance_id.unwrap_or(DEFAULT_INSTANCE_ID))
    }
}

// ---------------------------------------------------------------------------
// File shapes (serde; secrets unresolved)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    watch: RawWatch,
    #[serde(default)]
    instances: BTreeMap<String, RawInstance>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct RawWatch {
    base_url: String,
    resource_path: String,
    #[serde(default)]
    bearer_token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawInstance {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    user: String,
    #[serde(default)]
    password: Option<String>,
    /// Name of the env var holding the password. Takes precedence over an
    /// inline `password` when both are present.
    #[serde(default)]
    password_env: Option<String>,
    #[serde(default = "default_dbname")]
    dbname: String,
    #[serde(default = "default_statement_timeout")]
    statement_timeout_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_dbname() -> String {
    DEFAULT_MAINTENANCE_DB.to_string()
}

fn default_statement_timeout() -> u64 {
    DEFAULT_STATEMENT_TIMEOUT_SECS
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and merge YAML config documents from `paths`, in order.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read config path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

/// Merge YAML documents in order (earlier = base, later = override), resolve
/// secrets, and compute the redacted config hash.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    let config_hash = sha256_hex(canonicalize_redacted(&merged)?.as_bytes());

    let raw: RawConfig =
        serde_json::from_value(merged).context("CONFIG_INVALID: config shape mismatch")?;
    let config = resolve(raw)?;

    Ok(LoadedConfig {
        config_hash,
        config,
    })
}

fn resolve(raw: RawConfig) -> Result<ControllerConfig> {
    let bearer_token = match &raw.watch.bearer_token_env {
        Some(var) => Some(require_env(var, "watch bearer token")?),
        None => None,
    };

    let mut instances = BTreeMap::new();
    for (id, inst) in raw.instances {
        let password = match (&inst.password_env, &inst.password) {
            (Some(var), _) => require_env(var, &format!("instance '{id}' password"))?,
            (None, Some(inline)) if !inline.is_empty() => inline.clone(),
            _ => bail!(
                "CONFIG_SECRET_MISSING: instance '{id}' needs either \
                 'password_env' (env var name) or a non-empty 'password'"
            ),
        };

        instances.insert(
            id,
            InstanceCredentials {
                host: inst.host,
                port: inst.port,
                user: inst.user,
                password,
                dbname: inst.dbname,
                statement_timeout_secs: inst.statement_timeout_secs,
            },
        );
    }

    Ok(ControllerConfig {
        log_level: raw.log_level,
        watch: WatchConfig {
            base_url: raw.watch.base_url,
            resource_path: raw.watch.resource_path,
            bearer_token,
        },
        instances,
    })
}

/// Resolve a named env var; the error mentions the NAME, never a value.
fn require_env(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!(
            "CONFIG_SECRET_MISSING: required env var '{var_name}' ({what}) \
             is not set or empty"
        ),
    }
}

// ---------------------------------------------------------------------------
// Merge / hash helpers
// ---------------------------------------------------------------------------

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

/// Serialize with every `password` leaf replaced, so the hash is stable
/// across secret rotation and the canonical form is loggable.
fn canonicalize_redacted(v: &Value) -> Result<String> {
    let mut clone = v.clone();
    redact_passwords(&mut clone);
    serde_json::to_string(&clone).context("canonical json serialize failed")
}

fn redact_passwords(v: &mut Value) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter_mut() {
                if k == "password" {
                    *vv = Value::String("<REDACTED>".to_string());
                } else {
                    redact_passwords(vv);
                }
            }
        }
        Value::Array(arr) => {
            for vv in arr.iter_mut() {
                redact_passwords(vv);
            }
        }
        _ => {}
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
