use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::permission::Permission;
use crate::store::{RoleStore, UserStore};
use crate::subject::{PermissionHolder, Role, User};
use crate::types::{IdentityId, RoleName, UserId};

/// In-memory store implementation for tests and demos.
///
/// Users are stored with role names only and re-hydrated with the current
/// role permissions on load, mirroring a relational join.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    users: RwLock<HashMap<UserId, StoredUser>>,
    roles: RwLock<HashMap<RoleName, HashSet<Permission>>>,
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    roles: BTreeSet<RoleName>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a role.
    pub fn put_role(&self, role: &Role) {
        let mut guard = self.inner.roles.write().expect("poisoned lock");
        guard.insert(role.name().clone(), role.permissions().clone());
    }

    /// Inserts or replaces a user.
    pub fn put_user(&self, user: &User) {
        let mut snapshot = user.clone();
        snapshot.take_events();
        let roles = user.role_names().cloned().collect();
        let mut guard = self.inner.users.write().expect("poisoned lock");
        guard.insert(
            user.id().clone(),
            StoredUser {
                user: snapshot,
                roles,
            },
        );
    }

    fn hydrate(&self, stored: &StoredUser) -> User {
        let roles = self.inner.roles.read().expect("poisoned lock");
        let mut user = stored.user.clone();
        user.load_roles(stored.roles.iter().map(|name| {
            let permissions = roles.get(name).cloned().unwrap_or_default();
            Role::with_permissions(name.clone(), permissions)
        }));
        user
    }

    fn find_user_where(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        let users = self.inner.users.read().expect("poisoned lock");
        users
            .values()
            .find(|stored| predicate(&stored.user))
            .map(|stored| self.hydrate(stored))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_id(&self, id: &UserId) -> std::result::Result<Option<User>, StoreError> {
        let users = self.inner.users.read().expect("poisoned lock");
        Ok(users.get(id).map(|stored| self.hydrate(stored)))
    }

    async fn find_user_by_identity(
        &self,
        identity: &IdentityId,
    ) -> std::result::Result<Option<User>, StoreError> {
        Ok(self.find_user_where(|user| user.identity_id() == identity))
    }

    async fn find_user_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<Option<User>, StoreError> {
        Ok(self.find_user_where(|user| user.refresh_token() == Some(refresh_token)))
    }

    async fn users_with_role(
        &self,
        role: &RoleName,
    ) -> std::result::Result<Vec<UserId>, StoreError> {
        let users = self.inner.users.read().expect("poisoned lock");
        Ok(users
            .values()
            .filter(|stored| stored.roles.contains(role))
            .map(|stored| stored.user.id().clone())
            .collect())
    }

    async fn save_user(&self, user: &User) -> std::result::Result<(), StoreError> {
        self.put_user(user);
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn find_role_by_name(
        &self,
        name: &RoleName,
    ) -> std::result::Result<Option<Role>, StoreError> {
        let roles = self.inner.roles.read().expect("poisoned lock");
        Ok(roles
            .get(name)
            .map(|permissions| Role::with_permissions(name.clone(), permissions.iter().cloned())))
    }

    async fn save_role(&self, role: &Role) -> std::result::Result<(), StoreError> {
        self.put_role(role);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Action, Resource, ResourceId};
    use crate::subject::ExternalIdentity;
    use futures::executor::block_on;

    fn user() -> User {
        User::new(
            UserId::try_from("u1").unwrap(),
            ExternalIdentity {
                identity_id: IdentityId::try_from("idp|u1").unwrap(),
                email: "u1@example.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
            },
        )
    }

    #[test]
    fn loaded_user_sees_current_role_permissions() {
        let store = MemoryStore::new();
        let name = RoleName::try_from("Instructor").unwrap();
        let mut role = Role::new(name.clone());
        store.put_role(&role);

        let mut user = user();
        user.assign_role(role.clone()).unwrap();
        store.put_user(&user);

        role.add_permission(Permission::allow(
            Action::Update,
            Resource::Course,
            ResourceId::WILDCARD,
        ))
        .unwrap();
        block_on(store.save_role(&role)).unwrap();

        let mut loaded = block_on(store.find_user_by_id(user.id())).unwrap().unwrap();
        assert_eq!(loaded.effective_permissions().len(), 1);
        assert!(loaded.take_events().is_empty());
    }

    #[test]
    fn users_with_role_lists_members() {
        let store = MemoryStore::new();
        let name = RoleName::try_from("Instructor").unwrap();
        let mut user = user();
        user.assign_role(Role::new(name.clone())).unwrap();
        store.put_user(&user);

        let members = block_on(store.users_with_role(&name)).unwrap();
        assert_eq!(members, vec![user.id().clone()]);
    }

    #[test]
    fn find_by_identity_and_refresh_token() {
        let store = MemoryStore::new();
        let mut user = user();
        user.set_refresh_token(Some("rt-1".to_string()));
        store.put_user(&user);

        let by_identity = block_on(store.find_user_by_identity(user.identity_id())).unwrap();
        assert_eq!(by_identity.map(|u| u.id().clone()), Some(user.id().clone()));
        let by_token = block_on(store.find_user_by_refresh_token("rt-1")).unwrap();
        assert!(by_token.is_some());
        assert!(block_on(store.find_user_by_refresh_token("rt-2")).unwrap().is_none());
    }
}
