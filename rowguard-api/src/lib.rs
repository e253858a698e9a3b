//! rowguard-api: Shared types for the rowguard authorization engine
//!
//! This crate defines the data exchanged between the policy engine and its
//! collaborators: principals, permission kinds, grant rows and the predicate
//! tree used to narrow queries. Everything here is plain data with serde
//! support; the decision logic lives in the `rowguard` crate.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

mod predicate;

pub use predicate::{Predicate, Row, Value};

/// Format version of persisted grant documents
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Table and column names of the reference grant tables
pub mod tables {
    /// Principal-to-group membership rows
    pub const MEMBERSHIPS: &str = "memberships";
    /// Module action grants
    pub const MODULE_GRANTS: &str = "module_grants";

    pub const PRINCIPAL_ID: &str = "principal_id";
    pub const GROUP_ID: &str = "group_id";
    pub const MODULE_ID: &str = "module_id";
    pub const ACTION: &str = "action";

    /// Subject key column of every group-grant link table
    pub const SUBJECT: &str = "subject";
    pub const WRITE: &str = "write";
    pub const MANAGE: &str = "manage";
}

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of an acting user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub i64);

/// Identifier of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PrincipalId> for Value {
    fn from(id: PrincipalId) -> Self {
        Value::Int(id.0)
    }
}

impl From<GroupId> for Value {
    fn from(id: GroupId) -> Self {
        Value::Int(id.0)
    }
}

impl GroupId {
    /// Read a group id back out of a row value
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_int().map(GroupId)
    }
}

// ============================================================================
// Principal
// ============================================================================

/// The acting identity an authorization decision is made for
///
/// Group membership is not stored here; it is looked up through the grant
/// store so that direct checks and query predicates read the same rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: PrincipalId,
    own_group: GroupId,
    #[serde(default)]
    administrator: bool,
}

impl Principal {
    /// Create a regular (non-administrator) principal
    pub fn new(id: PrincipalId, own_group: GroupId) -> Self {
        Self {
            id,
            own_group,
            administrator: false,
        }
    }

    /// Mark the principal as an administrator
    pub fn administrator(mut self) -> Self {
        self.administrator = true;
        self
    }

    pub fn id(&self) -> PrincipalId {
        self.id
    }

    /// The group used for ownership semantics
    pub fn own_group(&self) -> GroupId {
        self.own_group
    }

    pub fn is_administrator(&self) -> bool {
        self.administrator
    }
}

// ============================================================================
// Permission kinds
// ============================================================================

/// A named action being authorized
///
/// Kinds are open: modules register their own without touching this type.
/// Module kinds are conventionally namespaced as `module:action`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    pub const READ: Kind = Kind(Cow::Borrowed("read"));
    pub const WRITE: Kind = Kind(Cow::Borrowed("write"));
    pub const UPDATE: Kind = Kind(Cow::Borrowed("update"));
    pub const CREATE: Kind = Kind(Cow::Borrowed("create"));
    pub const MANAGE: Kind = Kind(Cow::Borrowed("manage"));
    pub const CHANGE_PERMISSIONS: Kind = Kind(Cow::Borrowed("changePermissions"));
    pub const WRITE_CONTENTS: Kind = Kind(Cow::Borrowed("writeContents"));
    pub const MANAGE_DRIVES: Kind = Kind(Cow::Borrowed("manageDrives"));
    /// Matches every kind; only meaningful inside an [`EscapeList`]
    pub const WILDCARD: Kind = Kind(Cow::Borrowed("*"));

    pub fn new(name: impl Into<String>) -> Self {
        Kind(Cow::Owned(name.into()))
    }

    /// Create a module-scoped kind, e.g. `drive:archive`
    pub fn namespaced(namespace: &str, action: &str) -> Self {
        Kind(Cow::Owned(format!("{}:{}", namespace, action)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace part of a namespaced kind
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once(':').map(|(ns, _)| ns)
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == "*"
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Kind {
    fn from(name: &str) -> Self {
        Kind::new(name)
    }
}

impl From<String> for Kind {
    fn from(name: String) -> Self {
        Kind::new(name)
    }
}

impl From<Kind> for Value {
    fn from(kind: Kind) -> Self {
        Value::Text(kind.0.into_owned())
    }
}

/// A kind a policy recognizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSpec {
    pub kind: Kind,
    /// System kinds are always computed and can never be granted or revoked
    #[serde(default)]
    pub system: bool,
}

impl KindSpec {
    pub fn grantable(kind: Kind) -> Self {
        Self {
            kind,
            system: false,
        }
    }

    pub fn system(kind: Kind) -> Self {
        Self { kind, system: true }
    }
}

/// Kinds a subject instance grants to everyone, bypassing its policy
///
/// This is an explicit, auditable field on the subject. An empty list grants
/// nothing; [`Kind::WILDCARD`] grants every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscapeList(BTreeSet<Kind>);

impl EscapeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// An escape list that allows every kind
    pub fn all() -> Self {
        Self::new().with(Kind::WILDCARD)
    }

    pub fn with(mut self, kind: Kind) -> Self {
        self.0.insert(kind);
        self
    }

    pub fn allows(&self, kind: &Kind) -> bool {
        self.0.contains(kind) || self.0.contains(&Kind::WILDCARD)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kind> {
        self.0.iter()
    }
}

// ============================================================================
// Grant rows
// ============================================================================

/// Principal-to-group membership row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Membership {
    pub principal: PrincipalId,
    pub group: GroupId,
}

impl Membership {
    pub fn new(principal: PrincipalId, group: GroupId) -> Self {
        Self { principal, group }
    }

    pub fn to_row(&self) -> Row {
        Row::from([
            (tables::PRINCIPAL_ID.to_string(), self.principal.into()),
            (tables::GROUP_ID.to_string(), self.group.into()),
        ])
    }
}

/// Group-grant link row: "this group may access this subject"
///
/// Exactly one row pairs a group with a subject. `write` also grants
/// mutation, `manage` grants management-level rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupGrant {
    pub subject: Value,
    pub group: GroupId,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub manage: bool,
}

impl GroupGrant {
    /// A read-only grant
    pub fn new(subject: impl Into<Value>, group: GroupId) -> Self {
        Self {
            subject: subject.into(),
            group,
            write: false,
            manage: false,
        }
    }

    pub fn with_write(mut self) -> Self {
        self.write = true;
        self
    }

    pub fn with_manage(mut self) -> Self {
        self.manage = true;
        self
    }

    pub fn to_row(&self) -> Row {
        Row::from([
            (tables::SUBJECT.to_string(), self.subject.clone()),
            (tables::GROUP_ID.to_string(), self.group.into()),
            (tables::WRITE.to_string(), Value::Bool(self.write)),
            (tables::MANAGE.to_string(), Value::Bool(self.manage)),
        ])
    }
}

/// Module action grant row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleGrant {
    pub module: String,
    pub group: GroupId,
    pub action: Kind,
}

impl ModuleGrant {
    pub fn new(module: impl Into<String>, group: GroupId, action: Kind) -> Self {
        Self {
            module: module.into(),
            group,
            action,
        }
    }

    pub fn to_row(&self) -> Row {
        Row::from([
            (tables::MODULE_ID.to_string(), Value::Text(self.module.clone())),
            (tables::GROUP_ID.to_string(), self.group.into()),
            (tables::ACTION.to_string(), self.action.clone().into()),
        ])
    }
}
