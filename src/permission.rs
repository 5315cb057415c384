use crate::error::ParseError;
use std::borrow::{Borrow, Cow};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const WILDCARD: &str = "*";

macro_rules! define_code_enum {
    (
        $(#[$doc:meta])*
        $name:ident, $err:ident, $width:literal,
        { $($variant:ident = $code:literal, $text:literal $(| $alias:literal)*;)+ }
    ) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Number of zero-padded digits this segment occupies in a key.
            pub const WIDTH: usize = $width;

            /// Integer code used in the permission key.
            pub const fn code(self) -> u16 {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            /// Looks up a variant by its integer code.
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Canonical name.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(value: &str) -> Result<Self, ParseError> {
                let trimmed = value.trim();
                $(
                    if trimmed.eq_ignore_ascii_case($text) $(|| trimmed == $alias)* {
                        return Ok(Self::$variant);
                    }
                )+
                Err(ParseError::$err(value.to_string()))
            }
        }
    };
}

define_code_enum!(
    /// Outcome a permission expresses.
    Effect, InvalidEffect, 1, {
        Allow = 0, "Allow";
        Deny = 1, "Deny";
    }
);

define_code_enum!(
    /// Operation being authorized.
    Action, InvalidAction, 2, {
        Read = 0, "Read";
        Create = 1, "Create";
        Update = 2, "Update";
        Delete = 3, "Delete";
        Wildcard = 4, "Wildcard" | "*";
    }
);

define_code_enum!(
    /// Category of entity being acted upon.
    Resource, InvalidResource, 3, {
        Course = 0, "Course";
        Lesson = 1, "Lesson";
        User = 2, "User";
        Enrollment = 3, "Enrollment";
        Wildcard = 4, "Wildcard" | "*";
    }
);

/// Identifies one resource instance, or any instance when wildcard.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ResourceId(Cow<'static, str>);

impl ResourceId {
    /// Matches every instance of a resource type.
    pub const WILDCARD: ResourceId = ResourceId(Cow::Borrowed(WILDCARD));

    /// Parses a resource id; `*` yields [`ResourceId::WILDCARD`].
    pub fn new(value: impl AsRef<str>) -> Result<Self, ParseError> {
        let raw = value.as_ref();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::InvalidResourceId(raw.to_string()));
        }
        if trimmed == WILDCARD {
            return Ok(Self::WILDCARD);
        }
        Ok(Self(Cow::Owned(trimmed.to_string())))
    }

    /// Takes a stored resource id as-is, without trimming or rejecting it.
    pub(crate) fn verbatim(value: &str) -> Self {
        if value == WILDCARD {
            return Self::WILDCARD;
        }
        Self(Cow::Owned(value.to_string()))
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One authorization grant.
///
/// Identity is the derived key: two permissions are equal iff their keys are
/// equal. The key is `effect ∥ action ∥ resource ∥ resource id` with each enum
/// code zero-padded to its fixed width, so `Allow/Update/Course/*` becomes
/// `002000*`. The same string is used as claim value and storage key.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Permission {
    effect: Effect,
    action: Action,
    resource: Resource,
    resource_id: ResourceId,
    key: String,
}

impl Permission {
    pub fn new(
        effect: Effect,
        action: Action,
        resource: Resource,
        resource_id: ResourceId,
    ) -> Self {
        let key = format!(
            "{:0ew$}{:0aw$}{:0rw$}{}",
            effect.code(),
            action.code(),
            resource.code(),
            resource_id,
            ew = Effect::WIDTH,
            aw = Action::WIDTH,
            rw = Resource::WIDTH,
        );
        Self {
            effect,
            action,
            resource,
            resource_id,
            key,
        }
    }

    /// Shorthand for an `Allow` grant.
    pub fn allow(action: Action, resource: Resource, resource_id: ResourceId) -> Self {
        Self::new(Effect::Allow, action, resource, resource_id)
    }

    /// Parses the four textual segments.
    ///
    /// Each segment is validated on its own and the error names the first
    /// segment that failed, in effect, action, resource, id order.
    pub fn parse(
        effect: &str,
        action: &str,
        resource: &str,
        resource_id: &str,
    ) -> Result<Self, ParseError> {
        let effect = effect.parse::<Effect>()?;
        let action = action.parse::<Action>()?;
        let resource = resource.parse::<Resource>()?;
        let resource_id = ResourceId::new(resource_id)?;
        Ok(Self::new(effect, action, resource, resource_id))
    }

    /// Decodes a key or claim string produced by [`Permission::to_claim_string`].
    pub fn from_claim(value: &str) -> Result<Self, ParseError> {
        let header = Effect::WIDTH + Action::WIDTH + Resource::WIDTH;
        let malformed = || ParseError::MalformedKey(value.to_string());
        if value.len() <= header
            || !value.is_char_boundary(header)
            || !value.as_bytes()[..header].iter().all(u8::is_ascii_digit)
        {
            return Err(malformed());
        }

        let (effect_code, rest) = value.split_at(Effect::WIDTH);
        let (action_code, rest) = rest.split_at(Action::WIDTH);
        let (resource_code, resource_id) = rest.split_at(Resource::WIDTH);

        let effect = decode_code(effect_code, Effect::from_code)
            .ok_or_else(|| ParseError::InvalidEffect(effect_code.to_string()))?;
        let action = decode_code(action_code, Action::from_code)
            .ok_or_else(|| ParseError::InvalidAction(action_code.to_string()))?;
        let resource = decode_code(resource_code, Resource::from_code)
            .ok_or_else(|| ParseError::InvalidResource(resource_code.to_string()))?;
        // Ids are stored trimmed, so a padded id is not a canonical key.
        if resource_id.trim() != resource_id {
            return Err(malformed());
        }
        let resource_id = ResourceId::new(resource_id)?;
        Ok(Self::new(effect, action, resource, resource_id))
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    /// Deduplication identity.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Canonical serialization embedded in token claims; equal to [`Permission::key`].
    pub fn to_claim_string(&self) -> String {
        self.key.clone()
    }

    /// Returns whether this grant authorizes `other`.
    ///
    /// Effects never cross-cover. Wildcards only widen on the granting side,
    /// so covering is not symmetric.
    pub fn covers(&self, other: &Permission) -> bool {
        if self.effect != other.effect {
            return false;
        }
        let action = self.action == Action::Wildcard || self.action == other.action;
        let resource = self.resource == Resource::Wildcard || self.resource == other.resource;
        let resource_id = self.resource_id.is_wildcard() || self.resource_id == other.resource_id;
        action && resource && resource_id
    }
}

fn decode_code<T>(digits: &str, lookup: fn(u16) -> Option<T>) -> Option<T> {
    digits.parse::<u16>().ok().and_then(lookup)
}

impl PartialEq for Permission {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Permission {}

impl Hash for Permission {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Borrow<str> for Permission {
    fn borrow(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.effect, self.action, self.resource, self.resource_id
        )
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.key
    }
}

impl TryFrom<String> for Permission {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, ParseError> {
        Self::from_claim(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> ResourceId {
        ResourceId::new(value).unwrap()
    }

    #[test]
    fn key_should_be_fixed_width_codes_and_literal_id() {
        let p = Permission::allow(Action::Update, Resource::Course, ResourceId::WILDCARD);
        assert_eq!(p.key(), "002000*");

        let p = Permission::new(Effect::Deny, Action::Delete, Resource::Enrollment, id("42"));
        assert_eq!(p.key(), "10300342");
        assert_eq!(p.to_claim_string(), p.key());
    }

    #[test]
    fn covers_is_reflexive() {
        let samples = [
            Permission::allow(Action::Read, Resource::Lesson, id("7")),
            Permission::allow(Action::Wildcard, Resource::Wildcard, ResourceId::WILDCARD),
            Permission::new(Effect::Deny, Action::Update, Resource::User, id("u-1")),
        ];
        for p in &samples {
            assert!(p.covers(p), "{p} should cover itself");
        }
    }

    #[test]
    fn wildcard_action_covers_concrete_action_but_not_reverse() {
        let broad = Permission::allow(Action::Wildcard, Resource::Course, id("1"));
        let narrow = Permission::allow(Action::Update, Resource::Course, id("1"));
        assert!(broad.covers(&narrow));
        assert!(!narrow.covers(&broad));
    }

    #[test]
    fn wildcard_resource_id_covers_any_concrete_id() {
        let broad = Permission::allow(Action::Update, Resource::Course, ResourceId::WILDCARD);
        let narrow = Permission::allow(Action::Update, Resource::Course, id("77"));
        assert!(broad.covers(&narrow));
        assert!(!narrow.covers(&broad));
    }

    #[test]
    fn wildcard_resource_covers_any_resource_type() {
        let broad = Permission::allow(Action::Read, Resource::Wildcard, ResourceId::WILDCARD);
        assert!(broad.covers(&Permission::allow(Action::Read, Resource::Lesson, id("3"))));
        assert!(!broad.covers(&Permission::allow(Action::Delete, Resource::Lesson, id("3"))));
    }

    #[test]
    fn effect_mismatch_never_covers() {
        let allow = Permission::allow(Action::Wildcard, Resource::Wildcard, ResourceId::WILDCARD);
        let deny = Permission::new(Effect::Deny, Action::Read, Resource::Course, id("1"));
        assert!(!allow.covers(&deny));
        let deny_all = Permission::new(
            Effect::Deny,
            Action::Wildcard,
            Resource::Wildcard,
            ResourceId::WILDCARD,
        );
        assert!(deny_all.covers(&deny));
        assert!(!deny_all.covers(&Permission::allow(Action::Read, Resource::Course, id("1"))));
    }

    #[test]
    fn different_concrete_ids_do_not_cover() {
        let a = Permission::allow(Action::Read, Resource::Course, id("1"));
        let b = Permission::allow(Action::Read, Resource::Course, id("2"));
        assert!(!a.covers(&b));
    }

    #[test]
    fn parse_reports_the_failing_segment() {
        assert_eq!(
            Permission::parse("Maybe", "Read", "Course", "1").unwrap_err(),
            ParseError::InvalidEffect("Maybe".to_string())
        );
        assert_eq!(
            Permission::parse("Allow", "Publish", "Course", "1").unwrap_err(),
            ParseError::InvalidAction("Publish".to_string())
        );
        assert_eq!(
            Permission::parse("Allow", "Read", "Invoice", "1").unwrap_err(),
            ParseError::InvalidResource("Invoice".to_string())
        );
        assert_eq!(
            Permission::parse("Allow", "Read", "Course", "  ").unwrap_err(),
            ParseError::InvalidResourceId("  ".to_string())
        );
    }

    #[test]
    fn parse_is_case_insensitive_and_accepts_star() {
        let p = Permission::parse("allow", "*", "COURSE", "*").unwrap();
        assert_eq!(p.action(), Action::Wildcard);
        assert_eq!(p.resource(), Resource::Course);
        assert!(p.resource_id().is_wildcard());
    }

    #[test]
    fn parse_of_display_segments_round_trips_key() {
        let samples = [
            Permission::allow(Action::Update, Resource::Course, ResourceId::WILDCARD),
            Permission::new(Effect::Deny, Action::Wildcard, Resource::Enrollment, id("e-9")),
            Permission::allow(Action::Read, Resource::Wildcard, id("abc")),
        ];
        for p in samples {
            let parsed = Permission::parse(
                &p.effect().to_string(),
                &p.action().to_string(),
                &p.resource().to_string(),
                p.resource_id().as_str(),
            )
            .unwrap();
            assert_eq!(parsed.key(), p.key());
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn from_claim_decodes_key() {
        let p = Permission::new(Effect::Deny, Action::Delete, Resource::Lesson, id("l-1"));
        let decoded = Permission::from_claim(p.key()).unwrap();
        assert_eq!(decoded.effect(), Effect::Deny);
        assert_eq!(decoded.action(), Action::Delete);
        assert_eq!(decoded.resource(), Resource::Lesson);
        assert_eq!(decoded.resource_id().as_str(), "l-1");
    }

    #[test]
    fn from_claim_rejects_bad_layouts() {
        assert!(matches!(Permission::from_claim("00200"), Err(ParseError::MalformedKey(_))));
        assert!(matches!(Permission::from_claim("002000"), Err(ParseError::MalformedKey(_))));
        assert!(matches!(Permission::from_claim("0x2000*"), Err(ParseError::MalformedKey(_))));
        assert!(matches!(Permission::from_claim("002000 7"), Err(ParseError::MalformedKey(_))));
        assert_eq!(
            Permission::from_claim("502000*").unwrap_err(),
            ParseError::InvalidEffect("5".to_string())
        );
        assert_eq!(
            Permission::from_claim("099000*").unwrap_err(),
            ParseError::InvalidAction("99".to_string())
        );
        assert_eq!(
            Permission::from_claim("002900*").unwrap_err(),
            ParseError::InvalidResource("900".to_string())
        );
    }

    #[test]
    fn wildcard_resource_id_compares_by_value() {
        assert_eq!(id("*"), ResourceId::WILDCARD);
        assert!(id(" * ").is_wildcard());
        assert!(!id("42").is_wildcard());
    }

    #[test]
    fn serde_uses_key_string() {
        let p = Permission::allow(Action::Update, Resource::Course, ResourceId::WILDCARD);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"002000*\"");
        let back: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<Permission>("\"nope\"").is_err());
    }
}
