//! Membership and grant checks in their two forms
//!
//! Each check exists once as a direct lookup (used by `Decide`) and once as a
//! correlated predicate (used by `Narrow`). They sit side by side so they can
//! be kept in agreement; a divergence would make listings disagree with
//! per-record decisions.

use rowguard_api::{tables, GroupGrant, GroupId, Kind, Predicate, Principal, PrincipalId, Value};

use crate::store::{GrantStore, StoreError};

/// Which flag a group-grant row must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantFlag {
    /// Any row suffices
    Any,
    Write,
    Manage,
}

impl GrantFlag {
    fn column(self) -> Option<&'static str> {
        match self {
            GrantFlag::Any => None,
            GrantFlag::Write => Some(tables::WRITE),
            GrantFlag::Manage => Some(tables::MANAGE),
        }
    }

    fn admits(self, grant: &GroupGrant) -> bool {
        match self {
            GrantFlag::Any => true,
            GrantFlag::Write => grant.write,
            GrantFlag::Manage => grant.manage,
        }
    }
}

/// Direct form: `principal` is a member of `group`
pub fn is_member(
    store: &dyn GrantStore,
    principal: PrincipalId,
    group: GroupId,
) -> Result<bool, StoreError> {
    store.is_member(principal, group)
}

/// Correlated form: a membership row joins `principal` to the enclosing
/// row's `outer_group_column`
pub fn correlated(principal: PrincipalId, outer_group_column: &str) -> Predicate {
    Predicate::exists(
        tables::MEMBERSHIPS,
        Predicate::eq(tables::PRINCIPAL_ID, principal)
            .and(Predicate::eq_outer(tables::GROUP_ID, outer_group_column)),
    )
}

/// Direct form: a row of `link` for `subject` carrying `flag` belongs to one
/// of the principal's groups
pub fn has_group_grant(
    store: &dyn GrantStore,
    link: &str,
    subject: &Value,
    principal: &Principal,
    flag: GrantFlag,
) -> Result<bool, StoreError> {
    for grant in store.group_grants(link, subject)? {
        if flag.admits(&grant) && store.is_member(principal.id(), grant.group)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Correlated form of [`has_group_grant`], keyed on the enclosing row's
/// `outer_key_column`
pub fn group_grant_exists(
    link: &str,
    outer_key_column: &str,
    principal: &Principal,
    flag: GrantFlag,
) -> Predicate {
    let mut inner = Predicate::eq_outer(tables::SUBJECT, outer_key_column);
    if let Some(column) = flag.column() {
        inner = inner.and(Predicate::eq(column, true));
    }
    Predicate::exists(
        link,
        inner.and(correlated(principal.id(), tables::GROUP_ID)),
    )
}

/// Direct form: a module grant for `(module, action)` belongs to one of the
/// principal's groups
pub fn has_module_grant(
    store: &dyn GrantStore,
    module: &str,
    action: &Kind,
    principal: &Principal,
) -> Result<bool, StoreError> {
    for grant in store.module_grants(module)? {
        if &grant.action == action && store.is_member(principal.id(), grant.group)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Correlated form of [`has_module_grant`]; it does not depend on the
/// enclosing row
pub fn module_grant_exists(module: &str, action: &Kind, principal: &Principal) -> Predicate {
    Predicate::exists(
        tables::MODULE_GRANTS,
        Predicate::eq(tables::MODULE_ID, module)
            .and(Predicate::eq(tables::ACTION, action.clone()))
            .and(correlated(principal.id(), tables::GROUP_ID)),
    )
}
