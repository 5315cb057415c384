//! User and role aggregates and effective-permission aggregation.
//!
//! Aggregates are mutated in memory and record an [`AuthEvent`] for each
//! successful change. The engine drains those events after saving so cache
//! entries can be invalidated within the same unit of work.

use crate::error::{Error, NotFound, ParseError, Result, ValidationError};
use crate::permission::Permission;
use crate::types::{IdentityId, RoleName, UserId};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Which aggregate a permission set belongs to.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum SubjectRef {
    User(UserId),
    Role(RoleName),
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user {id}"),
            Self::Role(name) => write!(f, "role {name}"),
        }
    }
}

/// Change recorded by an aggregate mutation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthEvent {
    PermissionAdded { subject: SubjectRef, key: String },
    PermissionRemoved { subject: SubjectRef, key: String },
    RoleAssigned { user: UserId, role: RoleName },
    RoleRemoved { user: UserId, role: RoleName },
}

/// Textual permission as received from an API caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PermissionRequest {
    pub effect: String,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
}

impl PermissionRequest {
    pub fn new(
        effect: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            effect: effect.into(),
            action: action.into(),
            resource: resource.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn parse(&self) -> std::result::Result<Permission, ParseError> {
        Permission::parse(&self.effect, &self.action, &self.resource, &self.resource_id)
    }
}

impl From<&Permission> for PermissionRequest {
    fn from(permission: &Permission) -> Self {
        Self::new(
            permission.effect().as_str(),
            permission.action().as_str(),
            permission.resource().as_str(),
            permission.resource_id().as_str(),
        )
    }
}

// Parses every request and collects all failures instead of stopping at the first.
fn parse_all(requests: &[PermissionRequest]) -> Result<Vec<Permission>> {
    let mut parsed = Vec::with_capacity(requests.len());
    let mut errors = Vec::new();
    for request in requests {
        match request.parse() {
            Ok(permission) => parsed.push(permission),
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(ValidationError::new(errors).into())
    }
}

/// Shared permission-set behavior of users and roles.
pub trait PermissionHolder {
    fn subject_ref(&self) -> SubjectRef;

    fn permissions(&self) -> &HashSet<Permission>;

    #[doc(hidden)]
    fn permissions_mut(&mut self) -> &mut HashSet<Permission>;

    #[doc(hidden)]
    fn record(&mut self, event: AuthEvent);

    /// Adds one permission, rejecting a key already present.
    fn add_permission(&mut self, permission: Permission) -> Result<()> {
        if self.permissions().contains(permission.key()) {
            return Err(Error::DuplicatePermission {
                subject: self.subject_ref().to_string(),
                key: permission.key().to_string(),
            });
        }
        let key = permission.key().to_string();
        self.permissions_mut().insert(permission);
        let subject = self.subject_ref();
        self.record(AuthEvent::PermissionAdded { subject, key });
        Ok(())
    }

    /// Adds a batch. Nothing is inserted unless every entry parses and is new.
    fn add_permissions(&mut self, requests: &[PermissionRequest]) -> Result<()> {
        let parsed = parse_all(requests)?;
        let mut seen = HashSet::with_capacity(parsed.len());
        for permission in &parsed {
            if self.permissions().contains(permission.key()) || !seen.insert(permission.key()) {
                return Err(Error::DuplicatePermission {
                    subject: self.subject_ref().to_string(),
                    key: permission.key().to_string(),
                });
            }
        }
        for permission in parsed {
            self.add_permission(permission)?;
        }
        Ok(())
    }

    /// Removes the permission with `key`.
    fn remove_permission(&mut self, key: &str) -> Result<()> {
        if !self.permissions_mut().remove(key) {
            return Err(NotFound::Permission(key.to_string()).into());
        }
        let subject = self.subject_ref();
        self.record(AuthEvent::PermissionRemoved {
            subject,
            key: key.to_string(),
        });
        Ok(())
    }

    /// Removes a batch. Parse failures are reported together before any
    /// removal; a missing permission rejects the batch without mutation.
    fn remove_permissions(&mut self, requests: &[PermissionRequest]) -> Result<()> {
        let parsed = parse_all(requests)?;
        if let Some(missing) = parsed
            .iter()
            .find(|permission| !self.permissions().contains(permission.key()))
        {
            return Err(NotFound::Permission(missing.key().to_string()).into());
        }
        let keys: HashSet<String> = parsed.into_iter().map(String::from).collect();
        for key in keys {
            self.remove_permission(&key)?;
        }
        Ok(())
    }
}

/// Role aggregate owning its permission set.
#[derive(Clone, Debug)]
pub struct Role {
    name: RoleName,
    permissions: HashSet<Permission>,
    events: Vec<AuthEvent>,
}

impl Role {
    pub fn new(name: RoleName) -> Self {
        Self {
            name,
            permissions: HashSet::new(),
            events: Vec::new(),
        }
    }

    /// Rebuilds a role loaded from storage; records no events.
    pub fn with_permissions(
        name: RoleName,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            name,
            permissions: permissions.into_iter().collect(),
            events: Vec::new(),
        }
    }

    pub fn name(&self) -> &RoleName {
        &self.name
    }

    /// Drains events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<AuthEvent> {
        std::mem::take(&mut self.events)
    }
}

impl PermissionHolder for Role {
    fn subject_ref(&self) -> SubjectRef {
        SubjectRef::Role(self.name().clone())
    }

    fn permissions(&self) -> &HashSet<Permission> {
        &self.permissions
    }

    fn permissions_mut(&mut self) -> &mut HashSet<Permission> {
        &mut self.permissions
    }

    fn record(&mut self, event: AuthEvent) {
        self.events.push(event);
    }
}

/// Profile data supplied by the identity provider on sign-in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExternalIdentity {
    pub identity_id: IdentityId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// User aggregate: direct permissions plus assigned roles.
#[derive(Clone, Debug)]
pub struct User {
    id: UserId,
    identity_id: IdentityId,
    email: String,
    first_name: String,
    last_name: String,
    locked: bool,
    email_confirmed: bool,
    refresh_token: Option<String>,
    roles: BTreeMap<RoleName, Role>,
    permissions: HashSet<Permission>,
    events: Vec<AuthEvent>,
}

impl User {
    pub fn new(id: UserId, identity: ExternalIdentity) -> Self {
        Self {
            id,
            identity_id: identity.identity_id,
            email: identity.email,
            first_name: identity.first_name,
            last_name: identity.last_name,
            locked: false,
            email_confirmed: false,
            refresh_token: None,
            roles: BTreeMap::new(),
            permissions: HashSet::new(),
            events: Vec::new(),
        }
    }

    /// Creates a user on first sign-in. The identity provider has verified the email.
    pub fn provision(identity: ExternalIdentity) -> Self {
        let mut user = Self::new(UserId::generate(), identity);
        user.email_confirmed = true;
        user
    }

    pub fn id(&self) -> &UserId {
        &self.id
    }

    pub fn identity_id(&self) -> &IdentityId {
        &self.identity_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_email_confirmed(&self) -> bool {
        self.email_confirmed
    }

    pub fn set_email_confirmed(&mut self, confirmed: bool) {
        self.email_confirmed = confirmed;
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn set_refresh_token(&mut self, token: Option<String>) {
        self.refresh_token = token;
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn role_names(&self) -> impl Iterator<Item = &RoleName> {
        self.roles.keys()
    }

    pub fn has_role(&self, role: &RoleName) -> bool {
        self.roles.contains_key(role)
    }

    /// Replaces the role snapshots with freshly loaded ones; records no events.
    pub fn load_roles(&mut self, roles: impl IntoIterator<Item = Role>) {
        self.roles = roles
            .into_iter()
            .map(|role| (role.name().clone(), role))
            .collect();
    }

    pub fn assign_role(&mut self, role: Role) -> Result<()> {
        let name = role.name().clone();
        if self.roles.contains_key(&name) {
            return Err(Error::DuplicateRole {
                user: self.id.clone(),
                role: name,
            });
        }
        self.roles.insert(name.clone(), role);
        self.events.push(AuthEvent::RoleAssigned {
            user: self.id.clone(),
            role: name,
        });
        Ok(())
    }

    pub fn remove_role(&mut self, role: &RoleName) -> Result<()> {
        if self.roles.remove(role).is_none() {
            return Err(NotFound::Role(role.clone()).into());
        }
        self.events.push(AuthEvent::RoleRemoved {
            user: self.id.clone(),
            role: role.clone(),
        });
        Ok(())
    }

    /// Direct permissions plus those of every assigned role, deduplicated by key.
    pub fn effective_permissions(&self) -> HashSet<Permission> {
        effective_permissions(&self.permissions, self.roles.values())
    }

    /// Drains events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<AuthEvent> {
        std::mem::take(&mut self.events)
    }
}

impl PermissionHolder for User {
    fn subject_ref(&self) -> SubjectRef {
        SubjectRef::User(self.id.clone())
    }

    fn permissions(&self) -> &HashSet<Permission> {
        &self.permissions
    }

    fn permissions_mut(&mut self) -> &mut HashSet<Permission> {
        &mut self.permissions
    }

    fn record(&mut self, event: AuthEvent) {
        self.events.push(event);
    }
}

/// Union of `direct` and every role's permissions.
pub fn effective_permissions<'a>(
    direct: &HashSet<Permission>,
    roles: impl IntoIterator<Item = &'a Role>,
) -> HashSet<Permission> {
    let mut effective = direct.clone();
    for role in roles {
        effective.extend(role.permissions().iter().cloned());
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Action, Resource, ResourceId};

    fn identity() -> ExternalIdentity {
        ExternalIdentity {
            identity_id: IdentityId::try_from("idp|u1").unwrap(),
            email: "u1@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        }
    }

    fn user() -> User {
        User::new(UserId::try_from("u1").unwrap(), identity())
    }

    fn update_any_course() -> Permission {
        Permission::allow(Action::Update, Resource::Course, ResourceId::WILDCARD)
    }

    fn request(action: &str, resource: &str, id: &str) -> PermissionRequest {
        PermissionRequest::new("Allow", action, resource, id)
    }

    #[test]
    fn effective_set_deduplicates_direct_and_role_grants() {
        let mut user = user();
        user.add_permission(update_any_course()).unwrap();
        let mut role = Role::new(RoleName::try_from("Instructor").unwrap());
        role.add_permission(update_any_course()).unwrap();
        role.add_permission(Permission::allow(
            Action::Read,
            Resource::Lesson,
            ResourceId::WILDCARD,
        ))
        .unwrap();
        user.assign_role(role).unwrap();

        let effective = user.effective_permissions();
        assert_eq!(effective.len(), 2);
        assert!(effective.contains(update_any_course().key()));
    }

    #[test]
    fn duplicate_grants_from_two_roles_collapse() {
        let mut user = user();
        for name in ["Instructor", "Reviewer"] {
            let role =
                Role::with_permissions(RoleName::try_from(name).unwrap(), [update_any_course()]);
            user.assign_role(role).unwrap();
        }
        assert_eq!(user.effective_permissions().len(), 1);
    }

    #[test]
    fn duplicate_add_is_rejected_and_count_unchanged() {
        let mut user = user();
        user.add_permission(update_any_course()).unwrap();
        let err = user.add_permission(update_any_course()).unwrap_err();
        assert!(matches!(err, Error::DuplicatePermission { .. }));
        assert_eq!(user.permissions().len(), 1);
    }

    #[test]
    fn add_records_event() {
        let mut role = Role::new(RoleName::try_from("Instructor").unwrap());
        role.add_permission(update_any_course()).unwrap();
        let events = role.take_events();
        assert_eq!(
            events,
            vec![AuthEvent::PermissionAdded {
                subject: SubjectRef::Role(RoleName::try_from("Instructor").unwrap()),
                key: "002000*".to_string(),
            }]
        );
        assert!(role.take_events().is_empty());
    }

    #[test]
    fn add_batch_is_all_or_nothing() {
        let mut user = user();
        user.add_permission(update_any_course()).unwrap();
        user.take_events();

        let batch = [
            request("Read", "Course", "1"),
            request("Update", "Course", "*"),
        ];
        let err = user.add_permissions(&batch).unwrap_err();
        assert!(matches!(err, Error::DuplicatePermission { .. }));
        assert_eq!(user.permissions().len(), 1);
        assert!(user.take_events().is_empty());

        let batch = [request("Read", "Course", "1"), request("Read", "Course", "1")];
        assert!(matches!(
            user.add_permissions(&batch),
            Err(Error::DuplicatePermission { .. })
        ));
        assert_eq!(user.permissions().len(), 1);

        let batch = [request("Read", "Course", "1"), request("Fly", "Course", "1")];
        assert!(matches!(user.add_permissions(&batch), Err(Error::Validation(_))));
        assert_eq!(user.permissions().len(), 1);
    }

    #[test]
    fn add_batch_inserts_every_entry() {
        let mut user = user();
        let batch = [request("Read", "Course", "1"), request("Delete", "Lesson", "*")];
        user.add_permissions(&batch).unwrap();
        assert_eq!(user.permissions().len(), 2);
        assert_eq!(user.take_events().len(), 2);
    }

    #[test]
    fn remove_missing_permission_is_not_found() {
        let mut user = user();
        let err = user.remove_permission("002000*").unwrap_err();
        assert!(matches!(err, Error::NotFound(NotFound::Permission(_))));
    }

    #[test]
    fn remove_batch_with_one_malformed_entry_changes_nothing() {
        let mut user = user();
        let batch = [
            request("Read", "Course", "1"),
            request("Update", "Course", "2"),
            request("Delete", "Course", "3"),
            request("Read", "Lesson", "4"),
            request("Read", "Enrollment", "5"),
        ];
        user.add_permissions(&batch).unwrap();
        let before = user.permissions().clone();

        let mut removal = batch.to_vec();
        removal[2] = request("Destroy", "Course", "3");
        let err = user.remove_permissions(&removal).unwrap_err();

        let Error::Validation(validation) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(
            validation.errors(),
            &[ParseError::InvalidAction("Destroy".to_string())]
        );
        assert_eq!(user.permissions(), &before);
    }

    #[test]
    fn remove_batch_reports_every_parse_failure() {
        let mut user = user();
        let removal = [
            PermissionRequest::new("Maybe", "Read", "Course", "1"),
            request("Read", "Invoice", "1"),
        ];
        let Err(Error::Validation(validation)) = user.remove_permissions(&removal) else {
            panic!("expected validation error");
        };
        assert_eq!(validation.errors().len(), 2);
    }

    #[test]
    fn remove_batch_removes_all_entries() {
        let mut user = user();
        let batch = [request("Read", "Course", "1"), request("Update", "Course", "2")];
        user.add_permissions(&batch).unwrap();
        user.take_events();
        user.remove_permissions(&batch).unwrap();
        assert!(user.permissions().is_empty());
        assert_eq!(user.take_events().len(), 2);
    }

    #[test]
    fn remove_batch_with_missing_entry_changes_nothing() {
        let mut user = user();
        user.add_permissions(&[request("Read", "Course", "1")]).unwrap();
        let removal = [request("Read", "Course", "1"), request("Read", "Course", "2")];
        let err = user.remove_permissions(&removal).unwrap_err();
        assert!(matches!(err, Error::NotFound(NotFound::Permission(_))));
        assert_eq!(user.permissions().len(), 1);
    }

    #[test]
    fn role_assignment_and_removal() {
        let mut user = user();
        let instructor = RoleName::try_from("Instructor").unwrap();
        user.assign_role(Role::new(instructor.clone())).unwrap();
        assert!(matches!(
            user.assign_role(Role::new(instructor.clone())),
            Err(Error::DuplicateRole { .. })
        ));
        user.remove_role(&instructor).unwrap();
        assert!(matches!(
            user.remove_role(&instructor),
            Err(Error::NotFound(NotFound::Role(_)))
        ));
        assert_eq!(user.take_events().len(), 2);
    }

    #[test]
    fn request_from_permission_parses_back() {
        let p = update_any_course();
        assert_eq!(PermissionRequest::from(&p).parse().unwrap(), p);
    }
}
