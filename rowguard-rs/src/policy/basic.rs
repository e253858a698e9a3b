//! Fixed-outcome policies

use rowguard_api::{Kind, KindSpec, Predicate, Principal};

use super::runtime::Policy;
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::filter::Filter;

fn crud_kinds() -> Vec<KindSpec> {
    [Kind::READ, Kind::CREATE, Kind::WRITE, Kind::MANAGE]
        .into_iter()
        .map(KindSpec::system)
        .collect()
}

/// Every kind is allowed to every principal
#[derive(Debug, Clone, Copy, Default)]
pub struct Everyone;

impl<S: ?Sized> Policy<S> for Everyone {
    fn name(&self) -> &str {
        "everyone"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        crud_kinds()
    }

    fn decide_internal(
        &self,
        _cx: &AuthContext,
        _subject: &S,
        _kind: &Kind,
        _principal: &Principal,
    ) -> Result<bool, AuthError> {
        Ok(true)
    }

    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        _filter: &mut Filter,
        _principal: &Principal,
    ) -> Result<(), AuthError> {
        Ok(())
    }
}

/// `read` only
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnly;

impl<S: ?Sized> Policy<S> for ReadOnly {
    fn name(&self) -> &str {
        "read_only"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        vec![KindSpec::system(Kind::READ)]
    }

    fn decide_internal(
        &self,
        _cx: &AuthContext,
        _subject: &S,
        kind: &Kind,
        _principal: &Principal,
    ) -> Result<bool, AuthError> {
        Ok(*kind == Kind::READ)
    }

    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        _principal: &Principal,
    ) -> Result<(), AuthError> {
        if *filter.requested() != Kind::READ {
            filter.and(Predicate::False);
        }
        filter.restrict_kinds([Kind::READ]);
        Ok(())
    }
}

/// Nothing for non-administrators; administrators pass in the runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminsOnly;

impl<S: ?Sized> Policy<S> for AdminsOnly {
    fn name(&self) -> &str {
        "admins_only"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        crud_kinds()
    }

    fn decide_internal(
        &self,
        _cx: &AuthContext,
        _subject: &S,
        _kind: &Kind,
        _principal: &Principal,
    ) -> Result<bool, AuthError> {
        Ok(false)
    }

    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        _principal: &Principal,
    ) -> Result<(), AuthError> {
        filter.and(Predicate::False);
        Ok(())
    }
}
