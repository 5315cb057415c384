use crate::types::{RoleName, UserId};
use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Store error wrapper.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// A single permission failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// One or more permissions in a batch failed to parse.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The subject already holds a permission with this key.
    #[error("permission {key} already exists on {subject}")]
    DuplicatePermission { subject: String, key: String },
    /// The user is already assigned this role.
    #[error("user {user} already has role {role}")]
    DuplicateRole { user: UserId, role: RoleName },
    /// A referenced entity does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFound),
    /// A cached entry could not be evicted ahead of a mutation.
    #[error("cache invalidation failed: {0}")]
    Cache(#[from] CacheError),
    /// Token verification failed.
    #[error(transparent)]
    Token(#[from] TokenInvalid),
    /// Token exchange or refresh was refused.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Signing key material is missing or unusable.
    #[error("key error: {0}")]
    Key(String),
    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

/// Failure to parse one permission segment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid effect: {0:?}")]
    InvalidEffect(String),
    #[error("invalid action: {0:?}")]
    InvalidAction(String),
    #[error("invalid resource: {0:?}")]
    InvalidResource(String),
    #[error("invalid resource id: {0:?}")]
    InvalidResourceId(String),
    /// A key or claim string does not have the fixed-width code layout.
    #[error("malformed permission key: {0:?}")]
    MalformedKey(String),
}

/// Aggregate of every parse failure found in a batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} permission(s) failed validation", .errors.len())]
pub struct ValidationError {
    errors: Vec<ParseError>,
}

impl ValidationError {
    pub(crate) fn new(errors: Vec<ParseError>) -> Self {
        Self { errors }
    }

    /// Returns every individual failure, in batch order.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }
}

impl IntoIterator for ValidationError {
    type Item = ParseError;
    type IntoIter = std::vec::IntoIter<ParseError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Referenced entity is absent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotFound {
    #[error("subject {0} not found")]
    Subject(UserId),
    #[error("role {0} not found")]
    Role(RoleName),
    #[error("permission {0} not found")]
    Permission(String),
}

/// Reasons a token is rejected by the verifier.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TokenInvalid {
    #[error("token expired")]
    Expired,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token audience mismatch")]
    WrongAudience,
    #[error("token issuer mismatch")]
    WrongIssuer,
    #[error("token is malformed")]
    Malformed,
}

/// Reasons a token exchange or refresh is refused.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("refresh token is malformed")]
    MalformedRefreshToken,
    #[error("refresh token is unknown")]
    UnknownRefreshToken,
    #[error("account is locked")]
    AccountLocked,
    #[error("account is not confirmed")]
    AccountNotConfirmed,
}

/// Cache backend failure. Reads degrade to a miss; only eviction ahead of a
/// mutation surfaces it as [`Error::Cache`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend error: {0}")]
    Backend(#[source] StoreError),
}
