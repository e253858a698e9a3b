//! Protection of group-grant link rows
//!
//! Link rows are entities of their own: listing them requires `read` on the
//! subject they belong to and editing them requires `write`. The row linking
//! the subject's owning group is protected; only members acting through
//! ownership (`changePermissions`) may change it, so an owner cannot be locked
//! out by a collaborator.

use rowguard_api::{tables, GroupGrant, GroupId, Kind, KindSpec, Predicate, Principal, Row, Value};

use super::group_grant::GroupGrantPolicy;
use super::runtime::{Guard, Policy};
use crate::audit;
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::filter::{Filter, TableSet};
use crate::membership::{self, GrantFlag};
use crate::subject::{Record, Subject};

/// One link row together with the owning group of the subject it links
#[derive(Debug, Clone, PartialEq)]
pub struct AclEntry {
    grant: GroupGrant,
    owner_group: Option<GroupId>,
}

impl AclEntry {
    /// Pair `grant` with the owning group read from the linked `subject`
    ///
    /// The subject must be saved, its key must match `grant.subject`, and the
    /// owner column of `base` must be selected.
    pub fn of<S: Subject + ?Sized>(
        base: &GroupGrantPolicy,
        subject: &S,
        grant: GroupGrant,
    ) -> Result<Self, AuthError> {
        let key = subject.key();
        if key.is_null() {
            return Err(AuthError::Configuration(format!(
                "links of {} need a saved subject",
                base.entity()
            )));
        }
        if key != grant.subject {
            return Err(AuthError::Configuration(format!(
                "grant for {} passed with subject {} of {}",
                grant.subject,
                key,
                base.entity()
            )));
        }
        let owner_group = base.owning_group(subject)?;
        Ok(Self { grant, owner_group })
    }

    pub fn grant(&self) -> &GroupGrant {
        &self.grant
    }

    pub fn owner_group(&self) -> Option<GroupId> {
        self.owner_group
    }

    /// Whether this row links the subject's owning group
    pub fn is_protected(&self) -> bool {
        self.owner_group == Some(self.grant.group)
    }
}

impl Subject for AclEntry {
    fn key(&self) -> Value {
        Value::Text(format!("{}/{}", self.grant.subject, self.grant.group))
    }

    fn field(&self, column: &str) -> Option<Value> {
        self.grant.to_row().remove(column)
    }
}

/// Policy over link rows, deferring to the linked subject's policy
#[derive(Debug, Clone)]
pub struct AclPolicy {
    base: GroupGrantPolicy,
}

impl AclPolicy {
    pub fn new(base: GroupGrantPolicy) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &GroupGrantPolicy {
        &self.base
    }

    /// The linked subject as seen by the base policy
    fn parent(&self, entry: &AclEntry) -> Record {
        let mut row = Row::new();
        row.insert("id".to_string(), entry.grant.subject.clone());
        row.insert(
            self.base.owner_column_name().to_string(),
            entry.owner_group.map(Value::from).unwrap_or(Value::Null),
        );
        Record::new("id", row)
    }
}

impl Policy<AclEntry> for AclPolicy {
    fn name(&self) -> &str {
        "acl"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        vec![
            KindSpec::system(Kind::READ),
            KindSpec::system(Kind::CREATE),
            KindSpec::system(Kind::WRITE),
            KindSpec::system(Kind::UPDATE),
            KindSpec::system(Kind::CHANGE_PERMISSIONS),
        ]
    }

    fn decide_internal(
        &self,
        cx: &AuthContext,
        entry: &AclEntry,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        let parent = self.parent(entry);

        if *kind == Kind::READ || *kind == Kind::CHANGE_PERMISSIONS {
            return self.base.decide_kind(cx, &parent, kind, principal);
        }
        if *kind != Kind::CREATE && *kind != Kind::WRITE && *kind != Kind::UPDATE {
            return Ok(false);
        }

        if entry.is_protected() {
            let owner = self
                .base
                .decide_kind(cx, &parent, &Kind::CHANGE_PERMISSIONS, principal)?;
            if !owner {
                tracing::debug!(
                    link = %self.base.link(),
                    subject = %entry.grant.subject,
                    group = %entry.grant.group,
                    principal = %principal.id(),
                    "owning group link is protected"
                );
                cx.record(audit::acl_protected(
                    self.base.link(),
                    entry.grant.subject.clone(),
                    entry.grant.group,
                    principal.id(),
                    kind,
                ));
            }
            return Ok(owner);
        }

        self.base.decide_kind(cx, &parent, &Kind::WRITE, principal)
    }

    /// Lists link rows of subjects the principal may read
    ///
    /// Mutations are decided per row; listings requested for any other kind
    /// match nothing.
    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        if *filter.requested() == Kind::READ {
            filter.and(membership::group_grant_exists(
                self.base.link(),
                tables::SUBJECT,
                principal,
                GrantFlag::Any,
            ));
        } else {
            filter.and(Predicate::False);
        }
        filter.restrict_kinds([Kind::READ]);
        Ok(())
    }
}

/// Grant, update and revoke link rows on behalf of a principal
///
/// Every mutation is checked against [`AclPolicy`] first; a denial becomes
/// [`AuthError::Forbidden`].
#[derive(Debug)]
pub struct AclManager {
    guard: Guard<AclEntry, AclPolicy>,
}

impl AclManager {
    pub fn new(base: GroupGrantPolicy) -> Self {
        let link = base.link().to_string();
        Self {
            guard: Guard::new(link, AclPolicy::new(base)),
        }
    }

    pub fn link(&self) -> &str {
        self.guard.entity()
    }

    /// Link `grant.group` to `subject`
    pub fn grant<S: Subject + ?Sized>(
        &self,
        cx: &AuthContext,
        subject: &S,
        grant: GroupGrant,
        principal: Option<&Principal>,
    ) -> Result<(), AuthError> {
        let entry = AclEntry::of(self.guard.policy().base(), subject, grant)?;
        self.guard.require(cx, &entry, &Kind::CREATE, principal)?;
        cx.store().put_group_grant(self.link(), entry.grant)?;
        Ok(())
    }

    /// Replace the flags of an existing link row of `subject`
    pub fn update<S: Subject + ?Sized>(
        &self,
        cx: &AuthContext,
        subject: &S,
        grant: GroupGrant,
        principal: Option<&Principal>,
    ) -> Result<(), AuthError> {
        let entry = AclEntry::of(self.guard.policy().base(), subject, grant)?;
        self.guard.require(cx, &entry, &Kind::UPDATE, principal)?;
        cx.store().put_group_grant(self.link(), entry.grant)?;
        Ok(())
    }

    /// Remove the row linking `group` to `subject`; returns whether it existed
    pub fn revoke<S: Subject + ?Sized>(
        &self,
        cx: &AuthContext,
        subject: &S,
        group: GroupId,
        principal: Option<&Principal>,
    ) -> Result<bool, AuthError> {
        let grant = GroupGrant::new(subject.key(), group);
        let entry = AclEntry::of(self.guard.policy().base(), subject, grant)?;
        self.guard.require(cx, &entry, &Kind::WRITE, principal)?;
        Ok(cx
            .store()
            .remove_group_grant(self.link(), &entry.grant.subject, group)?)
    }

    /// Link rows of `subject` visible to `principal`
    pub fn list(
        &self,
        cx: &AuthContext,
        subject: &Value,
        principal: Option<&Principal>,
    ) -> Result<Vec<GroupGrant>, AuthError> {
        let mut filter = Filter::new(self.link());
        filter.and(Predicate::eq(tables::SUBJECT, subject.clone()));
        let filter = self.guard.narrow(cx, filter, principal)?;

        let lookup = TableSet::with_store(cx.store());
        let mut visible = Vec::new();
        for grant in cx.store().group_grants(self.link(), subject)? {
            if filter.matches(&grant.to_row(), &lookup)? {
                visible.push(grant);
            }
        }
        Ok(visible)
    }
}
