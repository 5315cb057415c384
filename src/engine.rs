use crate::cache::{
    AuthData, AuthorizationCache, CacheBackend, CacheKey, DEFAULT_CACHE_TTL, NoCache,
};
use crate::config::AuthConfig;
use crate::context::AuthorizationContext;
use crate::error::{Error, NotFound, Result, SessionError, StoreError};
use crate::permission::{Action, Permission, Resource};
use crate::policy::{AllowedActions, Decision, ResourceState, RuleSet};
use crate::store::Store;
use crate::subject::{
    AuthEvent, ExternalIdentity, PermissionHolder, PermissionRequest, Role, User,
};
use crate::token::{
    TokenIssuer, TokenPair, TokenVerifier, generate_refresh_token, is_well_formed_refresh_token,
};
use crate::types::{RoleName, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Work run after a mutation is saved, before the call returns.
///
/// Failures are logged; the saved change is never rolled back.
#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn on_committed(&self, events: &[AuthEvent]) -> std::result::Result<(), StoreError>;
}

/// Authorization engine with pluggable store and optional cache.
pub struct Engine<S, B = NoCache> {
    store: S,
    cache: AuthorizationCache<B>,
    issuer: TokenIssuer,
    rules: RuleSet,
    hooks: Vec<Arc<dyn CommitHook>>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder<S, B = NoCache> {
    store: S,
    backend: B,
    cache_ttl: Duration,
    issuer: TokenIssuer,
    rules: RuleSet,
    hooks: Vec<Arc<dyn CommitHook>>,
}

impl<S> EngineBuilder<S, NoCache> {
    /// Creates a builder with the standard rule set and no cache.
    pub fn new(store: S, issuer: TokenIssuer) -> Self {
        Self {
            store,
            backend: NoCache,
            cache_ttl: DEFAULT_CACHE_TTL,
            issuer,
            rules: RuleSet::standard(),
            hooks: Vec::new(),
        }
    }

    /// Creates a builder whose issuer and cache TTL come from `config`.
    pub fn from_config(store: S, config: &AuthConfig) -> Result<Self> {
        Ok(Self::new(store, config.token_issuer()?).cache_ttl(config.cache_ttl))
    }
}

impl<S, B> EngineBuilder<S, B> {
    /// Sets the cache backend.
    pub fn cache<B2: CacheBackend>(self, backend: B2) -> EngineBuilder<S, B2> {
        EngineBuilder {
            store: self.store,
            backend,
            cache_ttl: self.cache_ttl,
            issuer: self.issuer,
            rules: self.rules,
            hooks: self.hooks,
        }
    }

    /// Sets the lifetime of cached entries.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Replaces the resource rules.
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Registers post-commit work, run in registration order.
    pub fn hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Builds the engine.
    pub fn build(self) -> Engine<S, B>
    where
        B: CacheBackend,
    {
        Engine {
            store: self.store,
            cache: AuthorizationCache::new(self.backend).with_ttl(self.cache_ttl),
            issuer: self.issuer,
            rules: self.rules,
            hooks: self.hooks,
        }
    }
}

impl<S, B> Engine<S, B>
where
    S: Store,
    B: CacheBackend,
{
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &AuthorizationCache<B> {
        &self.cache
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Verifier matching this engine's issuer.
    pub fn verifier(&self) -> TokenVerifier {
        self.issuer.verifier()
    }

    /// Roles and effective permissions of a user, served from the cache when
    /// possible. A cache failure falls back to the store.
    pub async fn resolve_auth_data(&self, user_id: &UserId) -> Result<AuthData> {
        if let Some(cached) = self.cache.get_auth_data(user_id).await {
            return Ok(cached);
        }

        let user = self.load_user(user_id).await?;
        Ok(self.fill_auth_data(&user).await)
    }

    async fn fill_auth_data(&self, user: &User) -> AuthData {
        let data = auth_data(user);
        self.cache.set_auth_data(user.id(), &data).await;
        data
    }

    /// Authorization context for `user_id` built from resolved auth data.
    pub async fn resolve_context(&self, user_id: &UserId) -> Result<AuthorizationContext> {
        let data = self.resolve_auth_data(user_id).await?;
        Ok(AuthorizationContext::new(
            user_id.clone(),
            data.roles,
            data.permissions,
        ))
    }

    /// Permissions granted by one role, served from the cache when possible.
    pub async fn role_permissions(&self, role: &RoleName) -> Result<Vec<Permission>> {
        if let Some(cached) = self.cache.get_role_permissions(role).await {
            return Ok(cached);
        }

        let loaded = self.load_role(role).await?;
        let permissions = sorted(loaded.permissions().iter().cloned());
        self.cache.set_role_permissions(role, &permissions).await;
        Ok(permissions)
    }

    /// Exchanges a verified external identity for an internal token pair.
    ///
    /// Unknown identities are provisioned as new users. The refresh token is
    /// rotated on every exchange.
    pub async fn exchange_token(
        &self,
        identity: ExternalIdentity,
        expires_at: SystemTime,
    ) -> Result<TokenPair> {
        let existing = self
            .store
            .find_user_by_identity(&identity.identity_id)
            .await
            .map_err(Error::from)?;
        let user = match existing {
            Some(user) => user,
            None => {
                let user = User::provision(identity);
                tracing::info!(
                    user = %user.id(),
                    identity = %user.identity_id(),
                    "provisioned user"
                );
                user
            }
        };
        if user.is_locked() {
            tracing::info!(user = %user.id(), "token exchange refused for locked account");
            return Err(SessionError::AccountLocked.into());
        }
        self.rotate_and_issue(user, expires_at).await
    }

    /// Issues a new token pair for the holder of `refresh_token`.
    pub async fn refresh(&self, refresh_token: &str, expires_at: SystemTime) -> Result<TokenPair> {
        if !is_well_formed_refresh_token(refresh_token) {
            return Err(SessionError::MalformedRefreshToken.into());
        }
        let user = self
            .store
            .find_user_by_refresh_token(refresh_token)
            .await
            .map_err(Error::from)?
            .ok_or(SessionError::UnknownRefreshToken)?;
        if user.is_locked() {
            return Err(SessionError::AccountLocked.into());
        }
        if !user.is_email_confirmed() {
            return Err(SessionError::AccountNotConfirmed.into());
        }
        self.rotate_and_issue(user, expires_at).await
    }

    /// Decision for one action on a resource instance.
    pub fn authorize(
        &self,
        ctx: &AuthorizationContext,
        action: Action,
        resource: Resource,
        state: &ResourceState,
    ) -> Decision {
        self.rules.decide(action, resource, state, ctx)
    }

    /// Every action the caller may perform on a resource instance.
    pub fn allowed_actions(
        &self,
        ctx: &AuthorizationContext,
        resource: Resource,
        state: &ResourceState,
    ) -> AllowedActions {
        self.rules.evaluate(resource, state, ctx)
    }

    /// Verifies `token` and decides one action for its bearer.
    pub fn authorize_token(
        &self,
        token: &str,
        action: Action,
        resource: Resource,
        state: &ResourceState,
    ) -> Result<Decision> {
        let ctx = self.verifier().validate_token(token)?;
        Ok(self.authorize(&ctx, action, resource, state))
    }

    pub async fn add_user_permissions(
        &self,
        user_id: &UserId,
        requests: &[PermissionRequest],
    ) -> Result<()> {
        let mut user = self.load_user(user_id).await?;
        user.add_permissions(requests)?;
        self.commit_user(user).await
    }

    pub async fn remove_user_permissions(
        &self,
        user_id: &UserId,
        requests: &[PermissionRequest],
    ) -> Result<()> {
        let mut user = self.load_user(user_id).await?;
        user.remove_permissions(requests)?;
        self.commit_user(user).await
    }

    pub async fn add_role_permissions(
        &self,
        role: &RoleName,
        requests: &[PermissionRequest],
    ) -> Result<()> {
        let mut role = self.load_role(role).await?;
        role.add_permissions(requests)?;
        self.commit_role(role).await
    }

    pub async fn remove_role_permissions(
        &self,
        role: &RoleName,
        requests: &[PermissionRequest],
    ) -> Result<()> {
        let mut role = self.load_role(role).await?;
        role.remove_permissions(requests)?;
        self.commit_role(role).await
    }

    pub async fn assign_role(&self, user_id: &UserId, role: &RoleName) -> Result<()> {
        let mut user = self.load_user(user_id).await?;
        let role = self.load_role(role).await?;
        user.assign_role(role)?;
        self.commit_user(user).await
    }

    pub async fn remove_role(&self, user_id: &UserId, role: &RoleName) -> Result<()> {
        let mut user = self.load_user(user_id).await?;
        user.remove_role(role)?;
        self.commit_user(user).await
    }

    async fn load_user(&self, user_id: &UserId) -> Result<User> {
        self.store
            .find_user_by_id(user_id)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| NotFound::Subject(user_id.clone()).into())
    }

    async fn load_role(&self, role: &RoleName) -> Result<Role> {
        self.store
            .find_role_by_name(role)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| NotFound::Role(role.clone()).into())
    }

    async fn rotate_and_issue(&self, mut user: User, expires_at: SystemTime) -> Result<TokenPair> {
        let refresh_token = generate_refresh_token();
        user.set_refresh_token(Some(refresh_token.clone()));
        self.store.save_user(&user).await.map_err(Error::from)?;

        let data = match self.cache.get_auth_data(user.id()).await {
            Some(cached) => cached,
            None => self.fill_auth_data(&user).await,
        };
        let access_token = self
            .issuer
            .issue_token_for(&user, &data.roles, &data.permissions, expires_at)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    async fn commit_user(&self, mut user: User) -> Result<()> {
        let keys = [CacheKey::User(user.id().clone())];
        let events = user.take_events();
        self.evict_before_commit(&keys).await?;
        self.store.save_user(&user).await.map_err(Error::from)?;
        tracing::info!(user = %user.id(), changes = events.len(), "user authorization updated");

        self.evict_after_commit(&keys).await;
        self.run_hooks(&events).await;
        Ok(())
    }

    async fn commit_role(&self, mut role: Role) -> Result<()> {
        let members = self
            .store
            .users_with_role(role.name())
            .await
            .map_err(Error::from)?;
        let keys: Vec<CacheKey> = std::iter::once(CacheKey::Role(role.name().clone()))
            .chain(members.into_iter().map(CacheKey::User))
            .collect();
        let events = role.take_events();
        self.evict_before_commit(&keys).await?;
        self.store.save_role(&role).await.map_err(Error::from)?;
        tracing::info!(role = %role.name(), changes = events.len(), "role permissions updated");

        self.evict_after_commit(&keys).await;
        self.run_hooks(&events).await;
        Ok(())
    }

    /// Fails when any entry cannot be evicted; nothing has been saved yet.
    async fn evict_before_commit(&self, keys: &[CacheKey]) -> Result<()> {
        for key in keys {
            self.cache.try_invalidate(key).await?;
        }
        Ok(())
    }

    /// Drops entries refilled from the old state between eviction and save.
    async fn evict_after_commit(&self, keys: &[CacheKey]) {
        for key in keys {
            self.cache.invalidate(key).await;
        }
    }

    async fn run_hooks(&self, events: &[AuthEvent]) {
        for hook in &self.hooks {
            if let Err(err) = hook.on_committed(events).await {
                tracing::warn!(error = %err, "post-commit hook failed");
            }
        }
    }
}

fn auth_data(user: &User) -> AuthData {
    AuthData {
        roles: user.role_names().cloned().collect(),
        permissions: sorted(user.effective_permissions()),
    }
}

fn sorted(permissions: impl IntoIterator<Item = Permission>) -> Vec<Permission> {
    let mut permissions: Vec<Permission> = permissions.into_iter().collect();
    permissions.sort_unstable_by(|a, b| a.key().cmp(b.key()));
    permissions
}
