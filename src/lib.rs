//! Permission-based authorization engine.
//!
//! This crate provides a compact permission value type with wildcard
//! coverage, user and role aggregates whose effective permissions are the
//! union of direct and role grants, per-resource action rules combining
//! ownership with permission checks, EdDSA-signed internal tokens, and a
//! read-through authorization cache evicted around every mutation. Store and
//! cache backends are pluggable async traits. Every check is deny-by-default.
//!
//! # Examples
//!
//! Deciding an action from a context built by hand:
//! ```
//! use rs_grant::{
//!     Action, AuthorizationContext, Decision, Permission, Resource, ResourceId, ResourceState,
//!     ResourceStatus, RuleSet, UserId,
//! };
//!
//! let caller = UserId::try_from("u1").unwrap();
//! let ctx = AuthorizationContext::new(
//!     caller,
//!     Vec::new(),
//!     [Permission::allow(Action::Update, Resource::Course, ResourceId::WILDCARD)],
//! );
//! let course = ResourceState::new("42", None, ResourceStatus::Draft);
//! let rules = RuleSet::standard();
//! assert_eq!(rules.decide(Action::Update, Resource::Course, &course, &ctx), Decision::Allow);
//! assert_eq!(rules.decide(Action::Delete, Resource::Course, &course, &ctx), Decision::Deny);
//! ```
//!
//! Wiring an engine with the in-memory store and cache (enable `memory-store`
//! and `memory-cache`):
//! ```no_run
//! # #[cfg(all(feature = "memory-store", feature = "memory-cache"))]
//! # {
//! use rs_grant::{AuthConfig, EngineBuilder, MemoryCache, MemoryStore};
//! let config = AuthConfig::from_env().unwrap();
//! let engine = EngineBuilder::from_config(MemoryStore::new(), &config)
//!     .unwrap()
//!     .cache(MemoryCache::new(1024))
//!     .build();
//! # let _ = engine;
//! # }
//! ```
#![forbid(unsafe_code)]

mod cache;
mod config;
mod context;
mod engine;
mod error;
mod keys;
mod permission;
mod policy;
mod store;
mod subject;
mod token;
mod types;
#[cfg(feature = "memory-cache")]
mod memory_cache;

#[cfg(feature = "memory-store")]
mod memory_store;

pub use crate::cache::{
    AuthData, AuthorizationCache, CacheBackend, CacheKey, DEFAULT_CACHE_TTL, NoCache,
};
pub use crate::config::AuthConfig;
pub use crate::context::AuthorizationContext;
pub use crate::engine::{CommitHook, Engine, EngineBuilder};
pub use crate::error::{
    CacheError, Error, NotFound, ParseError, Result, SessionError, StoreError, TokenInvalid,
    ValidationError,
};
pub use crate::keys::{SigningKeys, VerifyingKey};
pub use crate::permission::{Action, Effect, Permission, Resource, ResourceId};
pub use crate::policy::{
    ActionRule, AllowedActions, Decision, Precondition, ResourceState, ResourceStatus, RuleSet,
};
pub use crate::store::{RoleStore, Store, UserStore};
pub use crate::subject::{
    AuthEvent, ExternalIdentity, PermissionHolder, PermissionRequest, Role, SubjectRef, User,
    effective_permissions,
};
pub use crate::token::{
    DEFAULT_AUDIENCE, DEFAULT_ISSUER, REFRESH_TOKEN_LEN, TokenClaims, TokenIssuer, TokenPair,
    TokenVerifier, claims, generate_refresh_token, is_well_formed_refresh_token,
};
pub use crate::types::{IdentityId, RoleName, UserId};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::MemoryStore;

#[cfg(feature = "memory-cache")]
pub use crate::memory_cache::MemoryCache;
