//! Process-wide auth token.
//!
//! Replaced wholesale, never versioned. When no token is configured every
//! caller is accepted. Tokens are compared by SHA-256 digest so the check
//! does not short-circuit on the first differing byte of the secret.

use std::sync::{PoisonError, RwLock};

use sha2::{Digest, Sha256};

use crate::error::BrokerError;

#[derive(Default)]
pub struct AuthToken {
    current: RwLock<Option<String>>,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("configured", &self.is_configured())
            .finish()
    }
}

fn digest(s: &str) -> Vec<u8> {
    Sha256::digest(s.as_bytes()).to_vec()
}

impl AuthToken {
    pub fn new(initial: Option<String>) -> Self {
        let t = Self::default();
        t.replace(initial);
        t
    }

    /// Install `token`; `None` or blank clears the guard.
    pub fn replace(&self, token: Option<String>) {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn is_configured(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Credential to attach to outbound calls.
    pub fn current(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Accept the caller when no token is configured or `presented` matches.
    pub fn check(&self, presented: Option<&str>) -> Result<(), BrokerError> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(expected) = guard.as_deref() else {
            return Ok(());
        };
        match presented {
            Some(p) if digest(p.trim()) == digest(expected) => Ok(()),
            _ => Err(BrokerError::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_accepts_anyone() {
        let t = AuthToken::new(None);
        assert!(t.check(None).is_ok());
        assert!(t.check(Some("whatever")).is_ok());
    }

    #[test]
    fn configured_requires_exact_match() {
        let t = AuthToken::new(Some("T".to_string()));
        assert!(t.check(Some("T")).is_ok());
        assert_eq!(t.check(Some("U")), Err(BrokerError::Unauthorized));
        assert_eq!(t.check(None), Err(BrokerError::Unauthorized));
    }

    #[test]
    fn blank_replacement_clears() {
        let t = AuthToken::new(Some("T".to_string()));
        t.replace(Some("   ".to_string()));
        assert!(!t.is_configured());
        assert!(t.current().is_none());
    }

    #[test]
    fn debug_hides_token() {
        let t = AuthToken::new(Some("very-secret".to_string()));
        assert!(!format!("{t:?}").contains("very-secret"));
    }
}
