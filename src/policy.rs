//! Per-resource action rules.
//!
//! Every rule follows the same decision procedure:
//! 1. a failed lifecycle precondition contributes nothing;
//! 2. the caller is allowed if they own the resource or hold a covering
//!    `Allow` permission for `(action, resource type, resource id)`;
//! 3. public-read rules additionally allow any caller while the resource is
//!    published. Both paths are always evaluated.
//!
//! Rules are keyed by `(Resource, Action)`; registering a new rule never
//! touches existing ones.

use crate::context::AuthorizationContext;
use crate::permission::{Action, Permission, Resource, ResourceId};
use crate::types::UserId;
use std::collections::{BTreeSet, HashMap};

/// Authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Action is granted.
    Allow,
    /// Action is denied.
    Deny,
}

/// Lifecycle state of a resource instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    Draft,
    /// Publicly visible.
    Published,
    Archived,
    Deleted,
}

/// The slice of a resource the rules need: its id, owner and status.
///
/// `id` is compared byte for byte against granted resource ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceState {
    pub id: String,
    pub owner_id: Option<UserId>,
    pub status: ResourceStatus,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, owner_id: Option<UserId>, status: ResourceStatus) -> Self {
        Self {
            id: id.into(),
            owner_id,
            status,
        }
    }

    pub fn is_public(&self) -> bool {
        self.status == ResourceStatus::Published
    }
}

/// Lifecycle requirement checked before ownership or permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    NotDeleted,
    /// Neither archived nor deleted.
    Editable,
}

impl Precondition {
    fn holds(self, status: ResourceStatus) -> bool {
        match self {
            Self::None => true,
            Self::NotDeleted => status != ResourceStatus::Deleted,
            Self::Editable => {
                !matches!(status, ResourceStatus::Archived | ResourceStatus::Deleted)
            }
        }
    }
}

/// Set of actions a caller may perform on one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedActions(BTreeSet<Action>);

impl AllowedActions {
    pub fn contains(&self, action: Action) -> bool {
        self.0.contains(&action)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        self.0.iter().copied()
    }

    fn insert(&mut self, action: Action) {
        self.0.insert(action);
    }

    fn extend(&mut self, other: AllowedActions) {
        self.0.extend(other.0);
    }
}

/// Decision rule for one action on one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRule {
    resource: Resource,
    action: Action,
    precondition: Precondition,
    public_when_published: bool,
}

impl ActionRule {
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self {
            resource,
            action,
            precondition: Precondition::None,
            public_when_published: false,
        }
    }

    pub const fn requires(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    /// Also grant the action to anyone while the resource is published.
    pub const fn public_when_published(mut self) -> Self {
        self.public_when_published = true;
        self
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn evaluate(&self, state: &ResourceState, ctx: &AuthorizationContext) -> AllowedActions {
        let mut allowed = AllowedActions::default();
        if !self.precondition.holds(state.status) {
            return allowed;
        }

        let is_owner = ctx.is_owner(state.owner_id.as_ref());
        let resource_id = ResourceId::verbatim(&state.id);
        let has_permission =
            ctx.has_permission(&Permission::allow(self.action, self.resource, resource_id));
        let is_public = self.public_when_published && state.is_public();

        if is_owner || has_permission || is_public {
            allowed.insert(self.action);
        }
        allowed
    }
}

/// Registry of rules keyed by `(Resource, Action)`.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<(Resource, Action), ActionRule>,
}

impl RuleSet {
    /// Empty rule set; denies everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read, update and delete rules for every concrete resource type.
    ///
    /// Courses and lessons are publicly readable once published; users and
    /// enrollments never are.
    pub fn standard() -> Self {
        let mut rules = Self::new();
        for resource in [
            Resource::Course,
            Resource::Lesson,
            Resource::User,
            Resource::Enrollment,
        ] {
            let read = ActionRule::new(resource, Action::Read).requires(Precondition::NotDeleted);
            let read = if matches!(resource, Resource::Course | Resource::Lesson) {
                read.public_when_published()
            } else {
                read
            };
            rules = rules
                .with_rule(read)
                .with_rule(
                    ActionRule::new(resource, Action::Update).requires(Precondition::Editable),
                )
                .with_rule(
                    ActionRule::new(resource, Action::Delete).requires(Precondition::NotDeleted),
                );
        }
        rules
    }

    /// Adds `rule`, replacing any rule for the same `(resource, action)`.
    pub fn with_rule(mut self, rule: ActionRule) -> Self {
        self.rules.insert((rule.resource, rule.action), rule);
        self
    }

    pub fn rule(&self, resource: Resource, action: Action) -> Option<&ActionRule> {
        self.rules.get(&(resource, action))
    }

    /// Every action the caller may perform on the resource.
    pub fn evaluate(
        &self,
        resource: Resource,
        state: &ResourceState,
        ctx: &AuthorizationContext,
    ) -> AllowedActions {
        let mut allowed = AllowedActions::default();
        for rule in self.rules.values().filter(|rule| rule.resource == resource) {
            allowed.extend(rule.evaluate(state, ctx));
        }
        allowed
    }

    /// Decision for one action. Missing rules deny.
    pub fn decide(
        &self,
        action: Action,
        resource: Resource,
        state: &ResourceState,
        ctx: &AuthorizationContext,
    ) -> Decision {
        match self.rule(resource, action) {
            Some(rule) if rule.evaluate(state, ctx).contains(action) => Decision::Allow,
            _ => Decision::Deny,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleName;

    fn user_id(value: &str) -> UserId {
        UserId::try_from(value).unwrap()
    }

    fn course(owner: &str, status: ResourceStatus) -> ResourceState {
        ResourceState::new("42", Some(user_id(owner)), status)
    }

    fn ctx_with(permissions: Vec<Permission>) -> AuthorizationContext {
        AuthorizationContext::new(user_id("u1"), Vec::<RoleName>::new(), permissions)
    }

    #[test]
    fn resource_id_is_matched_verbatim() {
        let rules = RuleSet::standard();
        let grant = |id: &str| {
            ctx_with(vec![Permission::allow(
                Action::Update,
                Resource::Course,
                ResourceId::new(id).unwrap(),
            )])
        };
        let padded = ResourceState::new(" 42 ", None, ResourceStatus::Draft);
        assert_eq!(
            rules.decide(Action::Update, Resource::Course, &padded, &grant("42")),
            Decision::Deny
        );

        let blank = ResourceState::new("", None, ResourceStatus::Draft);
        assert_eq!(
            rules.decide(Action::Update, Resource::Course, &blank, &grant("*")),
            Decision::Allow
        );
        assert_eq!(
            rules.decide(Action::Update, Resource::Course, &blank, &grant("42")),
            Decision::Deny
        );
    }

    #[test]
    fn owner_without_permissions_may_update_and_delete() {
        let rules = RuleSet::standard();
        let ctx = ctx_with(vec![]);
        let state = course("u1", ResourceStatus::Draft);
        let allowed = rules.evaluate(Resource::Course, &state, &ctx);
        assert!(allowed.contains(Action::Update));
        assert!(allowed.contains(Action::Delete));
        assert!(allowed.contains(Action::Read));
    }

    #[test]
    fn non_owner_without_permissions_gets_nothing_on_draft() {
        let rules = RuleSet::standard();
        let ctx = ctx_with(vec![]);
        let state = course("someone-else", ResourceStatus::Draft);
        assert!(rules.evaluate(Resource::Course, &state, &ctx).is_empty());
        assert_eq!(
            rules.decide(Action::Update, Resource::Course, &state, &ctx),
            Decision::Deny
        );
    }

    #[test]
    fn published_course_is_readable_by_anonymous() {
        let rules = RuleSet::standard();
        let ctx = AuthorizationContext::anonymous();
        let state = course("u9", ResourceStatus::Published);
        assert_eq!(
            rules.decide(Action::Read, Resource::Course, &state, &ctx),
            Decision::Allow
        );
        let allowed = rules.evaluate(Resource::Course, &state, &ctx);
        assert_eq!(allowed.len(), 1);
    }

    #[test]
    fn anonymous_never_matches_ownerless_resource() {
        let rules = RuleSet::standard();
        let ctx = AuthorizationContext::anonymous();
        let state = ResourceState::new("42", None, ResourceStatus::Draft);
        assert!(rules.evaluate(Resource::Course, &state, &ctx).is_empty());
    }

    #[test]
    fn permission_grants_read_on_non_public_resource() {
        let rules = RuleSet::standard();
        let ctx = ctx_with(vec![Permission::allow(
            Action::Read,
            Resource::Enrollment,
            ResourceId::new("42").unwrap(),
        )]);
        let state = ResourceState::new("42", Some(user_id("u2")), ResourceStatus::Draft);
        assert_eq!(
            rules.decide(Action::Read, Resource::Enrollment, &state, &ctx),
            Decision::Allow
        );
        assert_eq!(
            rules.decide(Action::Read, Resource::Course, &state, &ctx),
            Decision::Deny
        );
    }

    #[test]
    fn published_user_profile_is_not_public() {
        let rules = RuleSet::standard();
        let ctx = AuthorizationContext::anonymous();
        let state = ResourceState::new("u2", Some(user_id("u2")), ResourceStatus::Published);
        assert_eq!(
            rules.decide(Action::Read, Resource::User, &state, &ctx),
            Decision::Deny
        );
    }

    #[test]
    fn archived_resource_cannot_be_updated_even_by_owner() {
        let rules = RuleSet::standard();
        let ctx = ctx_with(vec![]);
        let state = course("u1", ResourceStatus::Archived);
        let allowed = rules.evaluate(Resource::Course, &state, &ctx);
        assert!(!allowed.contains(Action::Update));
        assert!(allowed.contains(Action::Delete));
        assert!(allowed.contains(Action::Read));
    }

    #[test]
    fn deleted_resource_yields_nothing() {
        let rules = RuleSet::standard();
        let ctx = ctx_with(vec![Permission::allow(
            Action::Wildcard,
            Resource::Wildcard,
            ResourceId::WILDCARD,
        )]);
        let state = course("u1", ResourceStatus::Deleted);
        assert!(rules.evaluate(Resource::Course, &state, &ctx).is_empty());
    }

    #[test]
    fn wildcard_grant_covers_update_but_not_delete() {
        let rules = RuleSet::standard();
        let ctx = ctx_with(vec![Permission::allow(
            Action::Update,
            Resource::Course,
            ResourceId::WILDCARD,
        )]);
        let state = course("u2", ResourceStatus::Draft);
        assert_eq!(
            rules.decide(Action::Update, Resource::Course, &state, &ctx),
            Decision::Allow
        );
        assert_eq!(
            rules.decide(Action::Delete, Resource::Course, &state, &ctx),
            Decision::Deny
        );
    }

    #[test]
    fn custom_rule_extends_without_touching_others() {
        let create =
            ActionRule::new(Resource::Lesson, Action::Create).requires(Precondition::Editable);
        let rules = RuleSet::standard().with_rule(create);
        let ctx = ctx_with(vec![]);
        let state = ResourceState::new("l1", Some(user_id("u1")), ResourceStatus::Draft);
        let allowed = rules.evaluate(Resource::Lesson, &state, &ctx);
        assert!(allowed.contains(Action::Create));
        assert!(allowed.contains(Action::Update));
        assert_eq!(
            rules.decide(Action::Create, Resource::Course, &state, &ctx),
            Decision::Deny
        );
    }

    #[test]
    fn missing_rule_denies() {
        let rules = RuleSet::new();
        let ctx = ctx_with(vec![]);
        let state = course("u1", ResourceStatus::Draft);
        assert_eq!(
            rules.decide(Action::Update, Resource::Course, &state, &ctx),
            Decision::Deny
        );
    }
}
