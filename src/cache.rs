use crate::error::CacheError;
use crate::permission::Permission;
use crate::types::{RoleName, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default lifetime of a cached authorization payload.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Key-value backend with per-entry TTL, such as a distributed cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the stored value, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value`, overwriting any existing entry.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Deletes the entry if present.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// No-op backend; every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl CacheBackend for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `user-auth-data:{id}`
    User(UserId),
    /// `role-permissions:{name}`
    Role(RoleName),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user-auth-data:{id}"),
            Self::Role(name) => write!(f, "role-permissions:{name}"),
        }
    }
}

/// Resolved authorization data for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthData {
    pub roles: Vec<RoleName>,
    pub permissions: Vec<Permission>,
}

/// Read-through cache over a [`CacheBackend`].
///
/// Backend failures and undecodable entries are logged and reported as
/// misses. Write failures never reach the caller; only
/// [`AuthorizationCache::try_invalidate`] returns the backend error.
#[derive(Debug, Clone)]
pub struct AuthorizationCache<B> {
    backend: B,
    ttl: Duration,
}

impl<B: CacheBackend> AuthorizationCache<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn get_auth_data(&self, user: &UserId) -> Option<AuthData> {
        self.get_json(&CacheKey::User(user.clone())).await
    }

    pub async fn set_auth_data(&self, user: &UserId, data: &AuthData) {
        self.set_json(&CacheKey::User(user.clone()), data).await;
    }

    pub async fn get_role_permissions(&self, role: &RoleName) -> Option<Vec<Permission>> {
        self.get_json(&CacheKey::Role(role.clone())).await
    }

    pub async fn set_role_permissions(&self, role: &RoleName, permissions: &[Permission]) {
        self.set_json(&CacheKey::Role(role.clone()), &permissions).await;
    }

    /// Deletes the entry for `key`, returning the backend failure.
    pub async fn try_invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        let rendered = key.to_string();
        self.backend.remove(&rendered).await?;
        tracing::info!(key = %rendered, "cache entry invalidated");
        Ok(())
    }

    /// Deletes the entry for `key`. Failures are logged.
    pub async fn invalidate(&self, key: &CacheKey) {
        if let Err(err) = self.try_invalidate(key).await {
            tracing::warn!(key = %key, error = %err, "cache invalidation failed");
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let rendered = key.to_string();
        let raw = match self.backend.get(&rendered).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key = %rendered, "cache miss");
                return None;
            }
            Err(err) => {
                tracing::warn!(key = %rendered, error = %err, "cache read failed; miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!(key = %rendered, "cache hit");
                Some(value)
            }
            Err(err) => {
                tracing::warn!(key = %rendered, error = %err, "discarding undecodable cache entry");
                None
            }
        }
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) {
        let rendered = key.to_string();
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key = %rendered, error = %err, "cache payload encoding failed");
                return;
            }
        };
        if let Err(err) = self.backend.set(&rendered, raw, self.ttl).await {
            tracing::warn!(key = %rendered, error = %err, "cache write failed");
        }
    }
}
