//! Access derived from a related entity
//!
//! A child row is readable when its parent is readable and changeable when
//! its parent is updatable. The parent is reached through a typed accessor,
//! so a delegate can only be built for a relation the child actually has.

use rowguard_api::{Kind, KindSpec, Predicate, Principal};
use std::fmt;
use std::sync::Arc;

use super::runtime::Policy;
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::filter::Filter;
use crate::subject::{Authorizable, Subject};

/// How a child entity refers to its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Relation name, used in error messages
    pub name: String,
    /// Parent table
    pub table: String,
    /// Parent key column
    pub key_column: String,
    /// Child column holding the parent key
    pub foreign_key: String,
}

impl Relation {
    /// A relation keyed on the parent's `id`
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key_column: "id".to_string(),
            foreign_key: foreign_key.into(),
        }
    }

    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }
}

/// Kind asked of the parent for `kind` on the child
pub fn delegated_kind(kind: &Kind) -> Kind {
    if *kind == Kind::READ {
        Kind::READ
    } else {
        Kind::UPDATE
    }
}

/// Policy deferring to the policy of a related entity
pub struct Delegate<S: ?Sized, R> {
    entity: String,
    relation: Relation,
    load: fn(&S) -> Option<&R>,
    related: Arc<dyn Policy<R>>,
}

impl<S: ?Sized, R> Delegate<S, R> {
    /// `load` returns the loaded parent, or `None` when the relation was not
    /// loaded; `related` is the parent's policy, used for narrowing
    pub fn new(
        entity: impl Into<String>,
        relation: Relation,
        load: fn(&S) -> Option<&R>,
        related: Arc<dyn Policy<R>>,
    ) -> Self {
        Self {
            entity: entity.into(),
            relation,
            load,
            related,
        }
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    /// Wrap the parent's narrowing of `sub` into a correlated `EXISTS`
    fn correlate(&self, filter: &mut Filter, sub: &Filter) {
        let mut inner =
            Predicate::eq_outer(self.relation.key_column.as_str(), self.relation.foreign_key.as_str());
        if let Some(restriction) = sub.predicate() {
            inner = inner.and(Predicate::group(restriction));
        }
        filter.and(Predicate::exists(self.relation.table.as_str(), inner));

        // a read-only parent listing makes the child listing read-only
        if sub.allowed_kinds().is_some() {
            filter.restrict_kinds([Kind::READ]);
        }
    }

    fn sub_filter(&self, filter: &Filter) -> Filter {
        Filter::new(self.relation.table.as_str()).requesting(delegated_kind(filter.requested()))
    }
}

impl<S, R> Policy<S> for Delegate<S, R>
where
    S: Subject + ?Sized,
    R: Authorizable + 'static,
{
    fn name(&self) -> &str {
        "delegate"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        vec![
            KindSpec::system(Kind::CREATE),
            KindSpec::system(Kind::READ),
            KindSpec::system(Kind::WRITE),
            KindSpec::system(Kind::UPDATE),
        ]
    }

    fn decide_internal(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        let parent = (self.load)(subject)
            .ok_or_else(|| AuthError::relation_not_loaded(&self.entity, &self.relation.name))?;
        parent.authorize(cx, &delegated_kind(kind), Some(principal))
    }

    fn narrow_internal(
        &self,
        cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        let mut sub = self.sub_filter(filter);
        self.related.narrow_internal(cx, &mut sub, principal)?;
        self.correlate(filter, &sub);
        Ok(())
    }

    fn narrow_for_admin(
        &self,
        cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        let mut sub = self.sub_filter(filter);
        self.related.narrow_for_admin(cx, &mut sub, principal)?;
        if !sub.is_empty() {
            self.correlate(filter, &sub);
        }
        Ok(())
    }
}

impl<S: ?Sized, R> fmt::Debug for Delegate<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate")
            .field("entity", &self.entity)
            .field("relation", &self.relation)
            .finish_non_exhaustive()
    }
}
