//! Ed25519 signing key material for internal tokens.
//!
//! The private seed stays with the issuer. [`VerifyingKey`] carries only the
//! public half and can be exported to services that verify tokens. Rotating
//! the seed invalidates every token signed with the previous one.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand_core::OsRng;
use std::fmt;
use std::fs;
use std::path::Path;

const ED25519_KEY_LEN: usize = 32;
const KID_LEN: usize = 8;

/// Private signing key plus its derived public key and key id.
#[derive(Clone)]
pub struct SigningKeys {
    seed: [u8; ED25519_KEY_LEN],
    verifying: VerifyingKey,
    encoding: EncodingKey,
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("kid", &self.verifying.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKeys {
    /// Generates a fresh key pair from the OS random source.
    pub fn generate() -> Result<Self> {
        let signing_key = Ed25519SigningKey::generate(&mut OsRng);
        Self::from_seed(signing_key.to_bytes())
    }

    /// Builds keys from a raw 32-byte Ed25519 seed.
    pub fn from_seed(seed: [u8; ED25519_KEY_LEN]) -> Result<Self> {
        let signing_key = Ed25519SigningKey::from_bytes(&seed);
        let der = signing_key
            .to_pkcs8_der()
            .map_err(|err| Error::Key(format!("encode Ed25519 key: {err}")))?;
        let encoding = EncodingKey::from_ed_der(der.as_bytes());
        let verifying = VerifyingKey::from_bytes(signing_key.verifying_key().to_bytes())?;
        Ok(Self {
            seed,
            verifying,
            encoding,
        })
    }

    /// Loads the seed stored at `path`, or generates and stores a new one.
    ///
    /// The file holds the base64 seed so the key, and the public key other
    /// services may have cached, survive restarts.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = fs::read_to_string(path)
                .map_err(|err| Error::Key(format!("read {}: {err}", path.display())))?;
            let seed = decode_seed(contents.trim())?;
            return Self::from_seed(seed);
        }

        let keys = Self::generate()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|err| Error::Key(format!("create {}: {err}", parent.display())))?;
        }
        fs::write(path, STANDARD.encode(keys.seed))
            .map_err(|err| Error::Key(format!("write {}: {err}", path.display())))?;
        tracing::info!(path = %path.display(), kid = %keys.kid(), "generated token signing key");
        Ok(keys)
    }

    pub fn kid(&self) -> &str {
        &self.verifying.kid
    }

    /// Public half, safe to distribute.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }
}

fn decode_seed(encoded: &str) -> Result<[u8; ED25519_KEY_LEN]> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| Error::Key(format!("decode signing key: {err}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Key(format!("signing key must be {ED25519_KEY_LEN} bytes")))
}

/// Ed25519 public key used to verify tokens.
#[derive(Clone)]
pub struct VerifyingKey {
    public_key: [u8; ED25519_KEY_LEN],
    kid: String,
    decoding: DecodingKey,
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("kid", &self.kid)
            .field("x", &self.to_base64())
            .finish()
    }
}

impl VerifyingKey {
    pub fn from_bytes(public_key: [u8; ED25519_KEY_LEN]) -> Result<Self> {
        // Reject bytes that are not a valid curve point before handing them to jsonwebtoken.
        ed25519_dalek::VerifyingKey::from_bytes(&public_key)
            .map_err(|err| Error::Key(format!("invalid Ed25519 public key: {err}")))?;
        let x = URL_SAFE_NO_PAD.encode(public_key);
        let decoding = DecodingKey::from_ed_components(&x)
            .map_err(|err| Error::Key(format!("build decoding key: {err}")))?;
        Ok(Self {
            public_key,
            kid: URL_SAFE_NO_PAD.encode(&public_key[..KID_LEN]),
            decoding,
        })
    }

    /// Parses the base64url (JWK `x`) form produced by [`VerifyingKey::to_base64`].
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|err| Error::Key(format!("decode public key: {err}")))?;
        let public_key: [u8; ED25519_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::Key(format!("public key must be {ED25519_KEY_LEN} bytes")))?;
        Self::from_bytes(public_key)
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public_key)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}
