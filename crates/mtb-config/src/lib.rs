//! mtb-config
//!
//! Layered YAML configuration for the bridge daemon.
//!
//! Layers are merged in order (earlier = base, later = override), the merged
//! document is canonicalised to compact JSON and hashed, and the result is
//! deserialised into an immutable [`BridgeConfig`]. Secrets never live in
//! YAML: the file names the env var, [`secrets::resolve_secrets`] reads it.

pub mod secrets;

use anyhow::{bail, Context, Result};
use mtb_schemas::CallbackFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

pub use secrets::{resolve_secrets, ResolvedSecrets};

/// Known secret-like prefixes. If any leaf string value in the effective
/// config starts with one of these, loading aborts with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // Stripe / OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "gho_",       // GitHub OAuth
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
    "xoxp-",      // Slack user token
];

// ---------------------------------------------------------------------------
// Raw layered loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses as null; treat it as "no overrides".
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

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

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's default Map is ordered by key, so the compact form is canonical.
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, k.replace('~', "~0").replace('/', "~1"));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{}/{}", prefix, i), out);
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

// ---------------------------------------------------------------------------
// Typed bridge config
// ---------------------------------------------------------------------------

/// Immutable startup configuration of one bridge process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub listener: ListenerConfig,
    pub broker: BrokerConfig,
    pub callback: CallbackConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    /// Host or IP, optionally with an `http://` scheme the terminal scripts
    /// like to include.
    pub address: String,
    pub port: u16,
    /// Prefix under which every API route is mounted.
    pub base_path: String,
    /// Path of the route index document.
    pub docs_path: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1".to_string(),
            port: 15556,
            base_path: "/v1".to_string(),
            docs_path: "/v1/docs".to_string(),
        }
    }
}

impl ListenerConfig {
    /// `address` without scheme or trailing slash.
    pub fn host(&self) -> &str {
        let a = self.address.trim();
        let a = a
            .strip_prefix("http://")
            .or_else(|| a.strip_prefix("https://"))
            .unwrap_or(a);
        a.trim_end_matches('/')
    }

    /// Human-readable endpoint, e.g. `http://127.0.0.1:15556`.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host(), self.port)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let target = format!("{}:{}", self.host(), self.port);
        target
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve listener address {target}"))?
            .next()
            .with_context(|| format!("listener address {target} resolved to nothing"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Uniform bound on how long an inbound request waits for its response.
    pub command_wait_timeout_ms: u64,
    /// Upper bound for the `wait_ms` of a long-polling "has command?" call.
    pub max_poll_wait_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            command_wait_timeout_ms: 30_000,
            max_poll_wait_ms: 10_000,
        }
    }
}

impl BrokerConfig {
    pub fn command_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.command_wait_timeout_ms)
    }

    pub fn max_poll_wait(&self) -> Duration {
        Duration::from_millis(self.max_poll_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CallbackConfig {
    /// Callback registered at boot; the polling client may replace it.
    pub url: Option<String>,
    pub format: String,
    pub delivery_timeout_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            url: None,
            format: "json".to_string(),
            delivery_timeout_ms: 5_000,
        }
    }
}

impl CallbackConfig {
    pub fn format(&self) -> Result<CallbackFormat> {
        CallbackFormat::parse(&self.format)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// NAME of the env var holding the initial token. Never the token itself.
    pub token_env: Option<String>,
    /// Fail startup when the named env var is unset or blank.
    pub require_token: bool,
    /// Also demand the token on inbound command routes.
    pub guard_inbound_commands: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: Some("MTB_AUTH_TOKEN".to_string()),
            require_token: false,
            guard_inbound_commands: false,
        }
    }
}

impl BridgeConfig {
    /// Deserialise and validate a merged config document.
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let cfg: BridgeConfig = serde_json::from_value(loaded.config_json.clone())
            .context("CONFIG_INVALID: config does not match the bridge schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load, merge and validate YAML layers from disk.
    pub fn load(paths: &[&str]) -> Result<(Self, LoadedConfig)> {
        let loaded = load_layered_yaml(paths)?;
        let cfg = Self::from_loaded(&loaded)?;
        Ok((cfg, loaded))
    }

    pub fn validate(&self) -> Result<()> {
        if self.listener.host().is_empty() {
            bail!("CONFIG_INVALID listener.address: must not be empty");
        }
        check_path("listener.base_path", &self.listener.base_path)?;
        check_path("listener.docs_path", &self.listener.docs_path)?;
        if self.broker.command_wait_timeout_ms == 0 {
            bail!("CONFIG_INVALID broker.command_wait_timeout_ms: must be > 0");
        }
        self.callback
            .format()
            .context("CONFIG_INVALID callback.format")?;
        if let Some(url) = &self.callback.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("CONFIG_INVALID callback.url: must be an http(s) URL, got '{url}'");
            }
        }
        if let Some(name) = &self.auth.token_env {
            if name.trim().is_empty() {
                bail!("CONFIG_INVALID auth.token_env: must name an env var when present");
            }
        }
        Ok(())
    }
}

fn check_path(field: &str, p: &str) -> Result<()> {
    if !p.starts_with('/') {
        bail!("CONFIG_INVALID {field}: must start with '/', got '{p}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_strips_scheme_and_slash() {
        let mut l = ListenerConfig::default();
        assert_eq!(l.host(), "127.0.0.1");
        l.address = "https://localhost/".to_string();
        assert_eq!(l.host(), "localhost");
        l.address = "10.0.0.5".to_string();
        assert_eq!(l.endpoint(), "http://10.0.0.5:15556");
    }

    #[test]
    fn socket_addr_parses_ip_listener() {
        let l = ListenerConfig {
            port: 8080,
            ..ListenerConfig::default()
        };
        assert_eq!(l.socket_addr().unwrap(), "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn empty_document_is_default() {
        let loaded = load_layered_yaml_from_strings(&[""]).unwrap();
        let cfg = BridgeConfig::from_loaded(&loaded).unwrap();
        assert_eq!(cfg, BridgeConfig::default());
    }
}
