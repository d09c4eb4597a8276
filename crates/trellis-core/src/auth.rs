//! Identity collaborator: credential in, principal out.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::TokenConfig;
use crate::error::TrackerError;
use crate::model::project::Role;

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: i64,
    pub role: Role,
}

impl Principal {
    #[must_use]
    pub const fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,

    #[error("unrecognized credential")]
    Unknown,
}

impl From<AuthError> for TrackerError {
    fn from(_: AuthError) -> Self {
        Self::Unauthorized
    }
}

/// Resolves a bearer credential to a principal.
pub trait Authenticator: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AuthError`] when the credential is empty or unknown.
    fn authenticate(&self, credential: &str) -> Result<Principal, AuthError>;
}

/// BLAKE3 hex digest of a raw token, the form stored in configuration.
#[must_use]
pub fn token_digest(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

/// Fixed token table loaded from configuration. Only digests are held.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    by_digest: HashMap<String, Principal>,
}

impl StaticTokenAuthenticator {
    #[must_use]
    pub fn new(tokens: &[TokenConfig]) -> Self {
        let by_digest = tokens
            .iter()
            .map(|token| {
                (
                    token.token_blake3.trim().to_ascii_lowercase(),
                    Principal::new(token.user_id, token.role),
                )
            })
            .collect();
        Self { by_digest }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, credential: &str) -> Result<Principal, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }
        self.by_digest
            .get(&token_digest(credential))
            .copied()
            .ok_or(AuthError::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StaticTokenAuthenticator {
        StaticTokenAuthenticator::new(&[
            TokenConfig {
                token_blake3: token_digest("s3cret"),
                user_id: 1,
                role: Role::Admin,
            },
            TokenConfig {
                token_blake3: token_digest("member-token").to_ascii_uppercase(),
                user_id: 2,
                role: Role::Member,
            },
        ])
    }

    #[test]
    fn known_token_resolves_to_principal() {
        let auth = table();
        let principal = auth.authenticate("s3cret").expect("authenticate");
        assert_eq!(principal, Principal::new(1, Role::Admin));
        assert!(principal.is_admin());
    }

    #[test]
    fn digest_comparison_ignores_case_in_config() {
        let principal = table().authenticate("member-token").expect("authenticate");
        assert_eq!(principal.user_id, 2);
        assert!(!principal.is_admin());
    }

    #[test]
    fn empty_and_unknown_tokens_are_rejected() {
        let auth = table();
        assert_eq!(auth.authenticate("  "), Err(AuthError::Missing));
        assert_eq!(auth.authenticate("nope"), Err(AuthError::Unknown));
        assert!(matches!(
            TrackerError::from(AuthError::Unknown),
            TrackerError::Unauthorized
        ));
    }
}
