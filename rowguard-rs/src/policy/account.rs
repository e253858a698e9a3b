//! Accounts: group grants with a shifted kind vocabulary
//!
//! On an account, `writeContents` (posting into it) needs what `write` needs
//! on a plain group-granted entity, while `write` (changing the account
//! itself) needs `manage`.

use rowguard_api::{GroupId, Kind, KindSpec, Predicate, Principal};

use super::group_grant::GroupGrantPolicy;
use super::runtime::Policy;
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::filter::Filter;
use crate::subject::Subject;

/// Kind the underlying group grant is asked for `kind` on an account
pub fn account_kind(kind: &Kind) -> Kind {
    if *kind == Kind::WRITE_CONTENTS {
        Kind::WRITE
    } else if *kind == Kind::WRITE {
        Kind::MANAGE
    } else {
        kind.clone()
    }
}

#[derive(Debug, Clone)]
pub struct AccountPolicy {
    base: GroupGrantPolicy,
    admin_group: GroupId,
}

impl AccountPolicy {
    /// `admin_group` owns the accounts administrators list
    pub fn new(base: GroupGrantPolicy, admin_group: GroupId) -> Self {
        Self { base, admin_group }
    }

    pub fn base(&self) -> &GroupGrantPolicy {
        &self.base
    }

    pub fn admin_group(&self) -> GroupId {
        self.admin_group
    }
}

impl<S: Subject + ?Sized> Policy<S> for AccountPolicy {
    fn name(&self) -> &str {
        "account"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        let mut kinds = GroupGrantPolicy::base_kinds();
        kinds.push(KindSpec::grantable(Kind::WRITE_CONTENTS));
        kinds
    }

    fn decide_internal(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        self.base
            .decide_kind(cx, subject, &account_kind(kind), principal)
    }

    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        let requested = account_kind(filter.requested());
        self.base.narrow_kind(filter, &requested, principal);
        filter.restrict_kinds([Kind::READ]);
        Ok(())
    }

    /// Administrators list the accounts owned by the administrators' group
    fn narrow_for_admin(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        _principal: &Principal,
    ) -> Result<(), AuthError> {
        filter.and(Predicate::eq(
            self.base.owner_column_name(),
            self.admin_group,
        ));
        Ok(())
    }
}
