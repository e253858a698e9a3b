//! Ownership-based policies

use rowguard_api::{GroupId, Kind, KindSpec, Predicate, Principal, Value};

use super::runtime::Policy;
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::filter::Filter;
use crate::membership;
use crate::subject::Subject;

/// Access for members of the subject's owning group
///
/// `create` is open to everyone; ownership is established on first save.
#[derive(Debug, Clone)]
pub struct Owner {
    entity: String,
    owner_column: String,
}

impl Owner {
    /// Owning group read from the `owner_group` column
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            owner_column: "owner_group".to_string(),
        }
    }

    pub fn owner_column(mut self, column: impl Into<String>) -> Self {
        self.owner_column = column.into();
        self
    }
}

impl<S: Subject + ?Sized> Policy<S> for Owner {
    fn name(&self) -> &str {
        "owner"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        vec![
            KindSpec::system(Kind::CREATE),
            KindSpec::system(Kind::READ),
            KindSpec::system(Kind::WRITE),
            KindSpec::system(Kind::MANAGE),
        ]
    }

    fn decide_internal(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        if *kind == Kind::CREATE {
            return Ok(true);
        }
        let owner = subject
            .field(&self.owner_column)
            .ok_or_else(|| AuthError::column_not_selected(&self.entity, &self.owner_column))?;
        match GroupId::from_value(&owner) {
            Some(group) => Ok(membership::is_member(cx.store(), principal.id(), group)?),
            None => Ok(false),
        }
    }

    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        filter.and(membership::correlated(principal.id(), &self.owner_column));
        Ok(())
    }
}

/// Access only for the principal recorded as the subject's creator
#[derive(Debug, Clone)]
pub struct CreatorOnly {
    entity: String,
    creator_column: String,
}

impl CreatorOnly {
    /// Creator read from the `created_by` column
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            creator_column: "created_by".to_string(),
        }
    }

    pub fn creator_column(mut self, column: impl Into<String>) -> Self {
        self.creator_column = column.into();
        self
    }
}

impl<S: Subject + ?Sized> Policy<S> for CreatorOnly {
    fn name(&self) -> &str {
        "creator_only"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        vec![
            KindSpec::system(Kind::CREATE),
            KindSpec::system(Kind::READ),
            KindSpec::system(Kind::WRITE),
        ]
    }

    fn decide_internal(
        &self,
        _cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        if *kind == Kind::CREATE {
            return Ok(true);
        }
        let creator = subject
            .field(&self.creator_column)
            .ok_or_else(|| AuthError::column_not_selected(&self.entity, &self.creator_column))?;
        Ok(creator == Value::from(principal.id()))
    }

    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        filter.and(Predicate::eq(self.creator_column.as_str(), principal.id()));
        Ok(())
    }
}
