use crate::cache::DEFAULT_CACHE_TTL;
use crate::error::{Error, Result};
use crate::keys::SigningKeys;
use crate::token::{DEFAULT_AUDIENCE, DEFAULT_ISSUER, TokenIssuer};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_ISSUER: &str = "RS_GRANT_ISSUER";
pub const ENV_AUDIENCE: &str = "RS_GRANT_AUDIENCE";
pub const ENV_CACHE_TTL_SECS: &str = "RS_GRANT_CACHE_TTL_SECS";
pub const ENV_SIGNING_KEY: &str = "RS_GRANT_SIGNING_KEY";

// Token and cache settings sourced from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub cache_ttl: Duration,
    /// Seed file for the signing key. `None` generates an ephemeral key.
    pub signing_key_path: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            signing_key_path: None,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`, falling back to defaults for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let cache_ttl = match lookup(ENV_CACHE_TTL_SECS) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|err| Error::Config(format!("parse {ENV_CACHE_TTL_SECS}: {err}")))?,
            None => defaults.cache_ttl,
        };
        Ok(Self {
            issuer: lookup(ENV_ISSUER).unwrap_or(defaults.issuer),
            audience: lookup(ENV_AUDIENCE).unwrap_or(defaults.audience),
            cache_ttl,
            signing_key_path: lookup(ENV_SIGNING_KEY).map(PathBuf::from),
        })
    }

    /// Loads or generates the signing key and returns a configured issuer.
    pub fn token_issuer(&self) -> Result<TokenIssuer> {
        let keys = match &self.signing_key_path {
            Some(path) => SigningKeys::load_or_generate(path)?,
            None => {
                tracing::warn!("no signing key configured; tokens will not survive a restart");
                SigningKeys::generate()?
            }
        };
        Ok(TokenIssuer::new(keys)
            .with_issuer(self.issuer.clone())
            .with_audience(self.audience.clone()))
    }
}
