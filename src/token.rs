//! Internal access tokens.
//!
//! Tokens are EdDSA-signed JWTs embedding the subject's identity, role names
//! and effective permission keys, so verifiers can rebuild an
//! [`AuthorizationContext`] without touching storage. Claim names are a wire
//! contract shared with every verifying service; see [`claims`].

use crate::context::AuthorizationContext;
use crate::error::{Error, Result, TokenInvalid};
use crate::keys::{SigningKeys, VerifyingKey};
use crate::permission::Permission;
use crate::subject::User;
use crate::types::{RoleName, UserId};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Stable claim names.
pub mod claims {
    pub const SUBJECT: &str = "sub";
    pub const EMAIL: &str = "email";
    pub const FIRST_NAME: &str = "given_name";
    pub const LAST_NAME: &str = "family_name";
    pub const IDENTITY_PROVIDER_ID: &str = "idp";
    pub const ROLE: &str = "role";
    pub const PERMISSION: &str = "permission";
}

/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "rs-grant";
/// Default `aud` claim.
pub const DEFAULT_AUDIENCE: &str = "rs-grant-api";

/// Claims carried by internal tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub idp: String,
    #[serde(default)]
    pub role: Vec<String>,
    #[serde(default)]
    pub permission: Vec<String>,
    pub iat: u64,
    pub exp: u64,
}

impl TokenClaims {
    /// Rebuilds the caller's authorization context from the claims.
    pub fn to_context(&self) -> std::result::Result<AuthorizationContext, TokenInvalid> {
        let subject = UserId::new(&self.sub).map_err(|_| TokenInvalid::Malformed)?;
        let roles = self
            .role
            .iter()
            .map(|name| RoleName::new(name).map_err(|_| TokenInvalid::Malformed))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let permissions = self
            .permission
            .iter()
            .map(|claim| Permission::from_claim(claim).map_err(|_| TokenInvalid::Malformed))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(AuthorizationContext::new(subject, roles, permissions))
    }
}

/// Access token plus the refresh token that can renew it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: SystemTime,
}

/// Signs internal tokens. Holds the private key.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    keys: SigningKeys,
    issuer: String,
    audience: String,
}

impl TokenIssuer {
    pub fn new(keys: SigningKeys) -> Self {
        Self {
            keys,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn keys(&self) -> &SigningKeys {
        &self.keys
    }

    /// Verifier matching this issuer's key, issuer and audience.
    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(self.keys.verifying_key().clone())
            .with_issuer(self.issuer.clone())
            .with_audience(self.audience.clone())
    }

    /// Signs a token for `user` carrying `permissions`, valid until `expires_at`.
    pub fn issue_token(
        &self,
        user: &User,
        permissions: &HashSet<Permission>,
        expires_at: SystemTime,
    ) -> Result<String> {
        self.issue_token_at(user, permissions, expires_at, SystemTime::now())
    }

    pub(crate) fn issue_token_at(
        &self,
        user: &User,
        permissions: &HashSet<Permission>,
        expires_at: SystemTime,
        now: SystemTime,
    ) -> Result<String> {
        let role = user.role_names().map(ToString::to_string).collect();
        self.sign(user, role, permissions.iter(), expires_at, now)
    }

    /// Signs a token for `user` whose role and permission claims come from
    /// already-resolved authorization data rather than the loaded aggregate.
    pub fn issue_token_for(
        &self,
        user: &User,
        roles: &[RoleName],
        permissions: &[Permission],
        expires_at: SystemTime,
    ) -> Result<String> {
        let role = roles.iter().map(ToString::to_string).collect();
        self.sign(user, role, permissions.iter(), expires_at, SystemTime::now())
    }

    fn sign<'a>(
        &self,
        user: &User,
        role: Vec<String>,
        permissions: impl Iterator<Item = &'a Permission>,
        expires_at: SystemTime,
        now: SystemTime,
    ) -> Result<String> {
        let mut permission: Vec<String> = permissions.map(Permission::to_claim_string).collect();
        permission.sort_unstable();
        permission.dedup();
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: user.id().to_string(),
            email: user.email().to_string(),
            given_name: user.first_name().to_string(),
            family_name: user.last_name().to_string(),
            idp: user.identity_id().to_string(),
            role,
            permission,
            iat: epoch_seconds(now),
            exp: epoch_seconds(expires_at),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.keys.kid().to_string());
        jsonwebtoken::encode(&header, &claims, self.keys.encoding_key())
            .map_err(|err| Error::Key(format!("sign token: {err}")))
    }
}

/// Verifies internal tokens with the public key only.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    key: VerifyingKey,
    issuer: String,
    audience: String,
}

impl TokenVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self {
            key,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    /// Verifies `token` against the current time.
    pub fn validate_token(
        &self,
        token: &str,
    ) -> std::result::Result<AuthorizationContext, TokenInvalid> {
        self.validate_token_at(token, SystemTime::now())
    }

    /// Verifies `token` as of `now`. There is no clock-skew allowance: the
    /// token is accepted while `now < exp`.
    pub fn validate_token_at(
        &self,
        token: &str,
        now: SystemTime,
    ) -> std::result::Result<AuthorizationContext, TokenInvalid> {
        self.decode_claims_at(token, now)?.to_context()
    }

    /// Verifies `token` and returns the raw claims.
    pub fn decode_claims_at(
        &self,
        token: &str,
        now: SystemTime,
    ) -> std::result::Result<TokenClaims, TokenInvalid> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        // Expiry is checked below against the caller's clock.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);

        let data = jsonwebtoken::decode::<TokenClaims>(token, self.key.decoding_key(), &validation)
            .map_err(|err| {
                let reason = classify(err.kind());
                tracing::debug!(error = %err, ?reason, "token rejected");
                reason
            })?;
        if epoch_seconds(now) >= data.claims.exp {
            return Err(TokenInvalid::Expired);
        }
        Ok(data.claims)
    }
}

/// Random bytes behind an opaque refresh token.
pub const REFRESH_TOKEN_LEN: usize = 32;

/// Generates an opaque base64url refresh token.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_LEN];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Whether `token` has the shape produced by [`generate_refresh_token`].
pub fn is_well_formed_refresh_token(token: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(token)
        .is_ok_and(|bytes| bytes.len() == REFRESH_TOKEN_LEN)
}

fn classify(kind: &ErrorKind) -> TokenInvalid {
    match kind {
        ErrorKind::InvalidSignature => TokenInvalid::BadSignature,
        ErrorKind::ExpiredSignature => TokenInvalid::Expired,
        ErrorKind::InvalidIssuer => TokenInvalid::WrongIssuer,
        ErrorKind::InvalidAudience => TokenInvalid::WrongAudience,
        _ => TokenInvalid::Malformed,
    }
}

fn epoch_seconds(time: SystemTime) -> u64 {
    // Times before the epoch clamp to zero.
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
