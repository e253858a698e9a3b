//! Access through group-grant link rows
//!
//! A link table pairs subjects with groups. A principal may act on a subject
//! when one of its groups is linked to it; the row's `write` and `manage` flags
//! gate mutation and management. The subject's owning group decides
//! `changePermissions`.

use rowguard_api::{GroupId, Kind, KindSpec, Predicate, Principal};

use super::runtime::Policy;
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::filter::Filter;
use crate::membership::{self, GrantFlag};
use crate::subject::Subject;

/// Policy backed by a group-grant link table
#[derive(Debug, Clone)]
pub struct GroupGrantPolicy {
    entity: String,
    link: String,
    key_column: String,
    owner_column: String,
}

impl GroupGrantPolicy {
    /// Links of `entity` live in `link`; subjects are keyed on `id` and owned
    /// through `owner_group`
    pub fn new(entity: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            link: link.into(),
            key_column: "id".to_string(),
            owner_column: "owner_group".to_string(),
        }
    }

    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    pub fn owner_column(mut self, column: impl Into<String>) -> Self {
        self.owner_column = column.into();
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn owner_column_name(&self) -> &str {
        &self.owner_column
    }

    /// The link-row flag `kind` requires, if `kind` is decided by link rows
    pub fn flag_for(kind: &Kind) -> Option<GrantFlag> {
        if *kind == Kind::READ {
            Some(GrantFlag::Any)
        } else if *kind == Kind::WRITE || *kind == Kind::UPDATE {
            Some(GrantFlag::Write)
        } else if *kind == Kind::MANAGE {
            Some(GrantFlag::Manage)
        } else {
            None
        }
    }

    /// Owning group of `subject`; `None` when the column is null
    pub fn owning_group<S: Subject + ?Sized>(
        &self,
        subject: &S,
    ) -> Result<Option<GroupId>, AuthError> {
        let value = subject
            .field(&self.owner_column)
            .ok_or_else(|| AuthError::column_not_selected(&self.entity, &self.owner_column))?;
        Ok(GroupId::from_value(&value))
    }

    /// Decide `kind` without the runtime's bypasses
    ///
    /// Wrapping policies call this after remapping a kind.
    pub fn decide_kind<S: Subject + ?Sized>(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        if *kind == Kind::CREATE {
            return Ok(true);
        }
        if *kind == Kind::CHANGE_PERMISSIONS {
            return Ok(self.owning_group(subject)? == Some(principal.own_group()));
        }
        match Self::flag_for(kind) {
            Some(flag) => Ok(membership::has_group_grant(
                cx.store(),
                &self.link,
                &subject.key(),
                principal,
                flag,
            )?),
            None => Ok(false),
        }
    }

    /// Add the predicate selecting rows `principal` may access for `kind`
    ///
    /// Does not touch the filter's requested kind or its kind restriction.
    pub fn narrow_kind(&self, filter: &mut Filter, kind: &Kind, principal: &Principal) {
        if *kind == Kind::CREATE {
            return;
        }
        if *kind == Kind::CHANGE_PERMISSIONS {
            filter.and(Predicate::eq(
                self.owner_column.as_str(),
                principal.own_group(),
            ));
            return;
        }
        match Self::flag_for(kind) {
            Some(flag) => {
                filter.and(membership::group_grant_exists(
                    &self.link,
                    &self.key_column,
                    principal,
                    flag,
                ));
            }
            None => {
                filter.and(Predicate::False);
            }
        }
    }

    pub(crate) fn base_kinds() -> Vec<KindSpec> {
        vec![
            KindSpec::system(Kind::CREATE),
            KindSpec::grantable(Kind::READ),
            KindSpec::grantable(Kind::WRITE),
            KindSpec::grantable(Kind::UPDATE),
            KindSpec::grantable(Kind::MANAGE),
            KindSpec::system(Kind::CHANGE_PERMISSIONS),
        ]
    }
}

impl<S: Subject + ?Sized> Policy<S> for GroupGrantPolicy {
    fn name(&self) -> &str {
        "group_grant"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        Self::base_kinds()
    }

    fn decide_internal(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        self.decide_kind(cx, subject, kind, principal)
    }

    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        let requested = filter.requested().clone();
        self.narrow_kind(filter, &requested, principal);
        // listings never authorize a write path
        filter.restrict_kinds([Kind::READ]);
        Ok(())
    }
}
