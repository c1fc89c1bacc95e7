//! Principal identity resolution.
//!
//! The real-time layer never invents a user. Whoever composes the
//! application injects an [`IdentityResolver`]; when no principal is
//! authenticated the resolver returns [`IdentityError::Unauthenticated`] and
//! the caller decides what to do.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::PrincipalId;

/// The authenticated user a session acts on behalf of.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable principal identifier.
    pub id: PrincipalId,
    /// Optional human-readable name, used only in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Principal {
    /// Create a principal with no display name.
    pub fn new(id: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

/// Errors raised while resolving the current principal.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No principal is authenticated.
    #[error("no authenticated principal")]
    Unauthenticated,
    /// The identity backend failed.
    #[error("identity lookup failed: {0}")]
    Backend(String),
}

/// Source of the currently authenticated principal.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the current principal.
    fn resolve(&self) -> Result<Principal, IdentityError>;
}

impl<T: IdentityResolver + ?Sized> IdentityResolver for Arc<T> {
    fn resolve(&self) -> Result<Principal, IdentityError> {
        (**self).resolve()
    }
}

/// Fixed identity, for tests and command-line tools where the principal is
/// supplied explicitly.
#[derive(Clone, Debug, Default)]
pub struct StaticIdentity {
    principal: Option<Principal>,
}

impl StaticIdentity {
    /// Always resolve to `principal`.
    pub fn new(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }

    /// Never resolve; models a signed-out user.
    pub fn unauthenticated() -> Self {
        Self { principal: None }
    }
}

impl IdentityResolver for StaticIdentity {
    fn resolve(&self) -> Result<Principal, IdentityError> {
        self.principal.clone().ok_or(IdentityError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn static_identity_resolves() {
        let identity = StaticIdentity::new(Principal::new("u1"));
        let principal = identity.resolve().unwrap();
        assert_eq!(principal.id.as_str(), "u1");
        assert!(principal.display_name.is_none());
    }

    #[test]
    fn unauthenticated_is_an_error() {
        let identity = StaticIdentity::unauthenticated();
        assert_matches!(identity.resolve(), Err(IdentityError::Unauthenticated));
    }

    #[test]
    fn arc_resolver_delegates() {
        let identity: Arc<dyn IdentityResolver> =
            Arc::new(StaticIdentity::new(Principal::new("u2")));
        assert_eq!(identity.resolve().unwrap().id.as_str(), "u2");
    }

    #[test]
    fn principal_serde_camel_case() {
        let principal = Principal {
            id: PrincipalId::from("u3"),
            display_name: Some("Ada".into()),
        };
        let json = serde_json::to_value(&principal).unwrap();
        assert_eq!(json["id"], "u3");
        assert_eq!(json["displayName"], "Ada");
    }

    #[test]
    fn error_display() {
        assert_eq!(
            IdentityError::Unauthenticated.to_string(),
            "no authenticated principal"
        );
        assert!(
            IdentityError::Backend("timeout".into())
                .to_string()
                .contains("timeout")
        );
    }
}
