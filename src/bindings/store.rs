//! Binding store implementations.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use tracing::debug;

use crate::mtls::PeerIdentity;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Workspace
// ─────────────────────────────────────────────────────────────────────────────

/// A tenant workspace identifier resolved from the binding store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace(String);

impl Workspace {
    /// Wrap a workspace string as returned by the store.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The workspace as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the store returned an empty workspace string.
    ///
    /// Should never happen for a well-formed binding row; the transformer
    /// substitutes a sentinel segment when it does.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Lookup of the workspace bound to a SPIFFE identity.
///
/// `Ok(None)` is the distinct not-found outcome (zero rows); errors mean the
/// store itself could not be queried. Implementations must be safe for
/// concurrent per-request use.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Resolve the workspace bound to `identity`, if any.
    async fn resolve(&self, identity: &PeerIdentity) -> Result<Option<Workspace>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SQL-backed store
// ─────────────────────────────────────────────────────────────────────────────

/// Binding store backed by a MySQL `bindings` table.
///
/// Schema contract: `bindings(spiffe_id VARCHAR PRIMARY KEY, workspace VARCHAR)`,
/// at most one row per identity.
pub struct SqlBindingStore {
    pool: MySqlPool,
}

impl SqlBindingStore {
    /// Connect to the binding database and verify the connection with a ping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LookupUnavailable`] if the pool cannot be created or
    /// the ping fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPool::connect(database_url)
            .await
            .map_err(Error::LookupUnavailable)?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(Error::LookupUnavailable)?;

        debug!("Binding store connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared pools).
    #[must_use]
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BindingStore for SqlBindingStore {
    async fn resolve(&self, identity: &PeerIdentity) -> Result<Option<Workspace>> {
        let workspace: Option<String> =
            sqlx::query_scalar("SELECT workspace FROM bindings WHERE spiffe_id = ?")
                .bind(identity.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::LookupUnavailable)?;

        Ok(workspace.map(Workspace::new))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory binding store for tests and local development.
///
/// Can be switched into an unavailable state to exercise the
/// store-failure path.
#[derive(Default)]
pub struct MemoryBindingStore {
    bindings: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryBindingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of a binding.
    #[must_use]
    pub fn with_binding(self, identity: &str, workspace: &str) -> Self {
        self.insert(identity, workspace);
        self
    }

    /// Insert or replace a binding.
    pub fn insert(&self, identity: &str, workspace: &str) {
        self.bindings
            .write()
            .expect("binding map poisoned")
            .insert(identity.to_string(), workspace.to_string());
    }

    /// Make every subsequent lookup fail, simulating an unreachable store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn resolve(&self, identity: &PeerIdentity) -> Result<Option<Workspace>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::LookupUnavailable(sqlx::Error::PoolClosed));
        }

        let bindings = self.bindings.read().expect("binding map poisoned");
        Ok(bindings.get(identity.as_str()).cloned().map(Workspace::new))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(spiffe_id: &str) -> PeerIdentity {
        PeerIdentity::parse(spiffe_id).unwrap()
    }

    #[tokio::test]
    async fn memory_store_resolves_known_identity() {
        // GIVEN: a store with one binding
        let store = MemoryBindingStore::new().with_binding("spiffe://td/a", "ws-a");
        // WHEN: resolving that identity
        let result = store.resolve(&identity("spiffe://td/a")).await.unwrap();
        // THEN: the bound workspace comes back
        assert_eq!(result, Some(Workspace::new("ws-a")));
    }

    #[tokio::test]
    async fn memory_store_returns_none_for_unknown_identity() {
        let store = MemoryBindingStore::new().with_binding("spiffe://td/a", "ws-a");
        let result = store.resolve(&identity("spiffe://td/other")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn unavailable_store_errors_rather_than_returning_none() {
        // Not-found and store failure are distinct outcomes
        let store = MemoryBindingStore::new().with_binding("spiffe://td/a", "ws-a");
        store.set_unavailable(true);
        let result = store.resolve(&identity("spiffe://td/a")).await;
        assert!(matches!(result, Err(Error::LookupUnavailable(_))));
    }

    #[tokio::test]
    async fn store_recovers_when_availability_restored() {
        let store = MemoryBindingStore::new().with_binding("spiffe://td/a", "ws-a");
        store.set_unavailable(true);
        assert!(store.resolve(&identity("spiffe://td/a")).await.is_err());
        store.set_unavailable(false);
        assert!(store.resolve(&identity("spiffe://td/a")).await.is_ok());
    }

    #[test]
    fn empty_workspace_is_detected() {
        assert!(Workspace::new("").is_empty());
        assert!(!Workspace::new("w1").is_empty());
    }
}
