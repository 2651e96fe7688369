//! Caller identity and tenant binding.
//!
//! An [`Actor`] is resolved once per bearer token and is read-only for the
//! lifetime of a request. The [`OrgContext`] is derived from the actor and an
//! optional `X-Organization-Id` selector and names the single tenant the
//! request is allowed to touch.

use serde::{Deserialize, Serialize};

/// Reserved organization id of the platform tenant.
///
/// Only allow-listed system operations may touch records in this tenant.
pub const PLATFORM_ORGANIZATION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Kind of organization membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MembershipKind {
    /// Regular member of the organization.
    #[default]
    Member,
    /// Guest with restricted access.
    Guest,
    /// Platform service account.
    System,
}

/// A single organization membership of an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Organization id.
    pub organization_id: String,
    /// Roles held in the organization.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Permissions granted in the organization.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Inactive memberships never bind an org context.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Membership kind.
    #[serde(default)]
    pub kind: MembershipKind,
}

fn default_active() -> bool {
    true
}

impl Membership {
    /// Creates an active member membership with the given roles.
    #[must_use]
    pub fn new<I, S>(organization_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            organization_id: organization_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            permissions: Vec::new(),
            active: true,
            kind: MembershipKind::Member,
        }
    }

    /// Adds granted permissions.
    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Sets the membership kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MembershipKind) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the membership as inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A resolved caller.
///
/// # Example
///
/// ```
/// use hera_core::{Actor, Membership};
///
/// let actor = Actor::new("user-1", "alice@example.com")
///     .with_membership(Membership::new("org-A", ["admin"]))
///     .with_membership(Membership::new("org-B", ["viewer"]).inactive());
///
/// assert!(actor.active_membership("org-A").is_some());
/// assert!(actor.active_membership("org-B").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable actor id from the identity provider.
    pub id: String,
    /// Primary email address.
    #[serde(default)]
    pub email: String,
    /// Memberships in resolution order.
    #[serde(default)]
    pub memberships: Vec<Membership>,
}

impl Actor {
    /// Creates an actor without memberships.
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            memberships: Vec::new(),
        }
    }

    /// Appends a membership.
    #[must_use]
    pub fn with_membership(mut self, membership: Membership) -> Self {
        self.memberships.push(membership);
        self
    }

    /// Returns the active membership for `organization_id`.
    #[must_use]
    pub fn active_membership(&self, organization_id: &str) -> Option<&Membership> {
        self.memberships
            .iter()
            .find(|m| m.active && m.organization_id == organization_id)
    }

    /// Returns the first active membership.
    #[must_use]
    pub fn default_membership(&self) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.active)
    }

    /// Returns `true` if the actor holds a system membership anywhere.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.memberships
            .iter()
            .any(|m| m.active && m.kind == MembershipKind::System)
    }
}

/// The organization bound to a request and the effective grants within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgContext {
    /// Selected organization id.
    pub organization_id: String,
    /// Effective roles.
    pub roles: Vec<String>,
    /// Effective permissions.
    pub permissions: Vec<String>,
    /// Kind of the membership that produced this binding.
    pub kind: MembershipKind,
}

impl OrgContext {
    /// Binds a membership.
    #[must_use]
    pub fn from_membership(membership: &Membership) -> Self {
        Self {
            organization_id: membership.organization_id.clone(),
            roles: membership.roles.clone(),
            permissions: membership.permissions.clone(),
            kind: membership.kind,
        }
    }

    /// Returns `true` if the org is the reserved platform tenant.
    #[must_use]
    pub fn is_platform(&self) -> bool {
        self.organization_id == PLATFORM_ORGANIZATION_ID
    }

    /// Returns `true` if the binding holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Returns `true` if `permission` is granted.
    ///
    /// The `owner` and `admin` roles and the `*` grant imply every permission.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.has_role("owner")
            || self.has_role("admin")
            || self.permissions.iter().any(|p| p == "*" || p == permission)
    }
}
