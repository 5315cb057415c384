use crate::permission::Permission;
use crate::subject::User;
use crate::types::{RoleName, UserId};
use std::collections::{BTreeSet, HashSet};

/// Request-scoped view of who is calling and what they hold.
///
/// Built once per request, normally from a verified token, and never persisted.
/// `subject_id` is `None` for anonymous callers, who can never be owners.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizationContext {
    subject_id: Option<UserId>,
    roles: BTreeSet<RoleName>,
    permissions: HashSet<Permission>,
}

impl AuthorizationContext {
    pub fn new(
        subject_id: UserId,
        roles: impl IntoIterator<Item = RoleName>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            subject_id: Some(subject_id),
            roles: roles.into_iter().collect(),
            permissions: permissions.into_iter().collect(),
        }
    }

    /// Context for an unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context computed directly from a loaded user.
    pub fn for_user(user: &User) -> Self {
        Self::new(
            user.id().clone(),
            user.role_names().cloned(),
            user.effective_permissions(),
        )
    }

    pub fn subject_id(&self) -> Option<&UserId> {
        self.subject_id.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject_id.is_some()
    }

    pub fn roles(&self) -> &BTreeSet<RoleName> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn permissions(&self) -> &HashSet<Permission> {
        &self.permissions
    }

    /// Whether any held permission covers `required`.
    pub fn has_permission(&self, required: &Permission) -> bool {
        self.permissions.iter().any(|granted| granted.covers(required))
    }

    /// Whether the caller is authenticated and is `owner`.
    pub fn is_owner(&self, owner: Option<&UserId>) -> bool {
        match (self.subject_id.as_ref(), owner) {
            (Some(subject), Some(owner)) => subject == owner,
            _ => false,
        }
    }
}
