//! Session identity and connection URL construction.

use std::fmt;

use serde::{Deserialize, Serialize};
use sift_core::{ClientId, IdentityResolver, PrincipalId, WorkspaceId};
use url::Url;

use crate::client_id::ClientIdStore;
use crate::errors::Result;

/// Who is connecting, to which workspace, from which client.
///
/// At most one live transport exists per session manager, and it always
/// belongs to the current key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    /// Authenticated principal.
    pub principal_id: PrincipalId,
    /// Workspace whose events the session receives.
    pub workspace_id: WorkspaceId,
    /// Stable client identifier.
    pub client_id: ClientId,
}

impl SessionKey {
    /// Assemble a key from known parts.
    pub fn new(
        principal_id: impl Into<PrincipalId>,
        workspace_id: impl Into<WorkspaceId>,
        client_id: impl Into<ClientId>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            workspace_id: workspace_id.into(),
            client_id: client_id.into(),
        }
    }

    /// Resolve the principal through `identity` and look up (or mint) its
    /// client id in `store`.
    ///
    /// Fails with [`crate::errors::RealtimeError::Identity`] when nobody is
    /// signed in; there is no placeholder principal.
    pub fn resolve(
        identity: &dyn IdentityResolver,
        workspace_id: impl Into<WorkspaceId>,
        store: &dyn ClientIdStore,
    ) -> Result<Self> {
        let principal = identity.resolve()?;
        let client_id = store.get_or_create(&principal.id)?;
        Ok(Self {
            principal_id: principal.id,
            workspace_id: workspace_id.into(),
            client_id,
        })
    }

    /// `base` with `principalId`, `workspaceId`, `clientId`, and the
    /// cache-busting `t` (epoch millis) appended as query parameters.
    pub fn connection_url(&self, base: &Url, nonce_ms: i64) -> Url {
        let mut url = base.clone();
        let _ = url
            .query_pairs_mut()
            .append_pair("principalId", self.principal_id.as_str())
            .append_pair("workspaceId", self.workspace_id.as_str())
            .append_pair("clientId", self.client_id.as_str())
            .append_pair("t", &nonce_ms.to_string());
        url
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.principal_id, self.workspace_id, self.client_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_id::MemoryClientIdStore;
    use crate::errors::RealtimeError;
    use assert_matches::assert_matches;
    use sift_core::{Principal, StaticIdentity};
    use std::collections::HashMap;

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn url_carries_identity() {
        let key = SessionKey::new("u1", "w1", "c1");
        let base = Url::parse("ws://localhost:8000/ws").unwrap();
        let url = key.connection_url(&base, 1_700_000_000_000);
        let q = query(&url);
        assert_eq!(url.path(), "/ws");
        assert_eq!(q["principalId"], "u1");
        assert_eq!(q["workspaceId"], "w1");
        assert_eq!(q["clientId"], "c1");
        assert_eq!(q["t"], "1700000000000");
    }

    #[test]
    fn url_escapes_values_and_keeps_base_query() {
        let key = SessionKey::new("a b&c", "w/1", "c=1");
        let base = Url::parse("wss://sift.example.com/ws?v=2").unwrap();
        let url = key.connection_url(&base, 0);
        let q = query(&url);
        assert_eq!(q["v"], "2");
        assert_eq!(q["principalId"], "a b&c");
        assert_eq!(q["workspaceId"], "w/1");
        assert_eq!(q["clientId"], "c=1");
    }

    #[test]
    fn resolve_uses_store() {
        let store = MemoryClientIdStore::new();
        let identity = StaticIdentity::new(Principal::new("u1"));
        let a = SessionKey::resolve(&identity, "w1", &store).unwrap();
        let b = SessionKey::resolve(&identity, "w2", &store).unwrap();
        assert_eq!(a.principal_id.as_str(), "u1");
        assert_eq!(a.client_id, b.client_id);
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_without_principal_fails() {
        let store = MemoryClientIdStore::new();
        let result = SessionKey::resolve(&StaticIdentity::unauthenticated(), "w1", &store);
        assert_matches!(result, Err(RealtimeError::Identity(_)));
    }

    #[test]
    fn display_joins_parts() {
        assert_eq!(SessionKey::new("u", "w", "c").to_string(), "u/w/c");
    }
}
