//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (`auth.token_env`).
//! - At startup the daemon calls [`resolve_secrets`] once and hands the
//!   result to the broker; nothing else reads these env vars.
//! - `Debug` output redacts values; errors name the variable, never its value.

use anyhow::{bail, Result};

use crate::BridgeConfig;

/// Secrets resolved from the environment for one bridge process.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Initial auth token. `None` when the named env var is unset or blank,
    /// which leaves the poll surface unguarded until a token is set.
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Resolve a named environment variable; blank counts as unset.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Resolve every secret the config names.
///
/// # Errors
/// `SECRETS_MISSING` when `auth.require_token` is set and the named variable
/// is absent or blank (or no variable is named at all).
pub fn resolve_secrets(cfg: &BridgeConfig) -> Result<ResolvedSecrets> {
    let auth_token = cfg.auth.token_env.as_deref().and_then(resolve_env);

    if cfg.auth.require_token && auth_token.is_none() {
        match cfg.auth.token_env.as_deref() {
            Some(name) => bail!(
                "SECRETS_MISSING: required env var '{}' (auth token) is not set or empty",
                name
            ),
            None => bail!("SECRETS_MISSING: auth.require_token is set but auth.token_env is not"),
        }
    }

    Ok(ResolvedSecrets { auth_token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let s = ResolvedSecrets {
            auth_token: Some("hunter2-token".to_string()),
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<REDACTED>"));
    }
}
