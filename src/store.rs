use crate::error::StoreError;
use crate::subject::{Role, User};
use crate::types::{IdentityId, RoleName, UserId};
use async_trait::async_trait;

/// Store interface for user aggregates.
///
/// Loaded users must come with their roles, and each role's permissions,
/// already populated.
#[async_trait]
pub trait UserStore {
    /// Returns the user with `id`.
    async fn find_user_by_id(&self, id: &UserId) -> std::result::Result<Option<User>, StoreError>;

    /// Returns the user linked to an identity-provider account.
    async fn find_user_by_identity(
        &self,
        identity: &IdentityId,
    ) -> std::result::Result<Option<User>, StoreError>;

    /// Returns the user currently holding `refresh_token`.
    async fn find_user_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<Option<User>, StoreError>;

    /// Returns ids of users assigned `role`.
    async fn users_with_role(&self, role: &RoleName)
    -> std::result::Result<Vec<UserId>, StoreError>;

    /// Persists the user, its direct permissions and role assignments in one write.
    async fn save_user(&self, user: &User) -> std::result::Result<(), StoreError>;
}

/// Store interface for role aggregates.
#[async_trait]
pub trait RoleStore {
    /// Returns the role named `name` with its permissions.
    async fn find_role_by_name(
        &self,
        name: &RoleName,
    ) -> std::result::Result<Option<Role>, StoreError>;

    /// Persists the role and its permissions in one write.
    async fn save_role(&self, role: &Role) -> std::result::Result<(), StoreError>;
}

/// Composite store trait.
pub trait Store: UserStore + RoleStore + Send + Sync {}

impl<T> Store for T where T: UserStore + RoleStore + Send + Sync {}
