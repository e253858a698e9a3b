//! Policy contract and the runtime that mediates every call to it
//!
//! Variants implement [`Policy`] and supply only entity-specific logic. The
//! [`Guard`] applies the rules every variant shares: disabled enforcement,
//! administrator bypass, the subject's escape list, decision caching, the
//! reentrancy guard and the snapshot/reattach protocol of narrowing.

use rowguard_api::{Kind, KindSpec, Principal, PrincipalId, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::audit::{self, AuditEventType};
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::filter::Filter;
use crate::subject::Subject;

/// Strategy trait for record-level authorization
///
/// `S` is the subject type the policy is evaluated against.
///
/// # Example
///
/// ```rust
/// use rowguard::{AuthContext, AuthError, Filter, Policy, Subject};
/// use rowguard_api::{Kind, KindSpec, Predicate, Principal};
///
/// /// Published rows are public; drafts are hidden.
/// struct PublishedOnly;
///
/// impl<S: Subject + ?Sized> Policy<S> for PublishedOnly {
///     fn kinds(&self) -> Vec<KindSpec> {
///         vec![KindSpec::system(Kind::READ)]
///     }
///
///     fn decide_internal(
///         &self,
///         _cx: &AuthContext,
///         subject: &S,
///         kind: &Kind,
///         _principal: &Principal,
///     ) -> Result<bool, AuthError> {
///         Ok(*kind == Kind::READ && subject.field("published") == Some(true.into()))
///     }
///
///     fn narrow_internal(
///         &self,
///         _cx: &AuthContext,
///         filter: &mut Filter,
///         _principal: &Principal,
///     ) -> Result<(), AuthError> {
///         filter.and(Predicate::eq("published", true));
///         Ok(())
///     }
/// }
/// ```
pub trait Policy<S: ?Sized>: Send + Sync {
    /// Short name used in logs and audit records
    fn name(&self) -> &str {
        "policy"
    }

    /// Kinds this policy recognizes
    fn kinds(&self) -> Vec<KindSpec>;

    /// Entity-specific decision for a non-administrator principal
    fn decide_internal(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError>;

    /// Restrict `filter` to rows a non-administrator may access for
    /// `filter.requested()`
    fn narrow_internal(
        &self,
        cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError>;

    /// Narrowing for administrators; administrators see everything by default
    fn narrow_for_admin(
        &self,
        cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        let _ = (cx, filter, principal);
        Ok(())
    }
}

/// How a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPath {
    Disabled,
    Unauthenticated,
    Cached,
    Administrator,
    EscapeList,
    Policy,
}

/// Policy runtime bound to one subject at a time
///
/// A guard is per-request state: it caches decisions for the bound subject
/// and is deliberately not `Sync`.
pub struct Guard<S: ?Sized, P> {
    entity: String,
    policy: P,
    bound: RefCell<Option<Value>>,
    cache: RefCell<HashMap<(PrincipalId, Kind), bool>>,
    _subject: PhantomData<fn(&S)>,
}

impl<S, P> Guard<S, P>
where
    S: Subject + ?Sized,
    P: Policy<S>,
{
    pub fn new(entity: impl Into<String>, policy: P) -> Self {
        Self {
            entity: entity.into(),
            policy,
            bound: RefCell::new(None),
            cache: RefCell::new(HashMap::new()),
            _subject: PhantomData,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn kinds(&self) -> Vec<KindSpec> {
        self.policy.kinds()
    }

    /// Bind to `subject`, discarding every cached decision
    pub fn attach_to(&self, subject: &S) {
        *self.bound.borrow_mut() = Some(subject.key());
        self.cache.borrow_mut().clear();
    }

    /// Number of cached decisions for the bound subject
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }

    /// May `principal` (or the ambient principal) perform `kind` on `subject`?
    ///
    /// A subject other than the bound one rebinds the guard first. A subject
    /// whose key is null is never considered bound.
    pub fn decide(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: Option<&Principal>,
    ) -> Result<bool, AuthError> {
        self.decide_traced(cx, subject, kind, principal)
            .map(|(allowed, _)| allowed)
    }

    /// Like [`decide`](Self::decide), also reporting how the decision was reached
    pub fn decide_traced(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: Option<&Principal>,
    ) -> Result<(bool, DecisionPath), AuthError> {
        let key = subject.key();

        if !cx.is_enabled() {
            tracing::trace!(entity = %self.entity, %kind, "enforcement disabled");
            cx.record(audit::decision(
                AuditEventType::DisabledBypass,
                &self.entity,
                self.policy.name(),
                Some(key),
                principal.or(cx.principal()).map(Principal::id),
                kind,
            ));
            return Ok((true, DecisionPath::Disabled));
        }

        let Some(principal) = principal.or(cx.principal()) else {
            tracing::debug!(entity = %self.entity, %kind, "no principal; denying");
            return Ok((false, DecisionPath::Unauthenticated));
        };

        // unsaved subjects have no identity to share a cache entry with
        if key.is_null() || self.bound.borrow().as_ref() != Some(&key) {
            self.attach_to(subject);
        }

        let cache_key = (principal.id(), kind.clone());
        if let Some(&allowed) = self.cache.borrow().get(&cache_key) {
            return Ok((allowed, DecisionPath::Cached));
        }

        let _reentry = cx.enter();

        let (allowed, path) = if principal.is_administrator() {
            (true, DecisionPath::Administrator)
        } else if subject.escape_list().is_some_and(|list| list.allows(kind)) {
            (true, DecisionPath::EscapeList)
        } else {
            let allowed = self.policy.decide_internal(cx, subject, kind, principal)?;
            (allowed, DecisionPath::Policy)
        };

        self.cache.borrow_mut().insert(cache_key, allowed);

        let event_type = match (path, allowed) {
            (DecisionPath::Administrator, _) => AuditEventType::AdminBypass,
            (DecisionPath::EscapeList, _) => AuditEventType::EscapeListBypass,
            (_, true) => AuditEventType::Granted,
            (_, false) => AuditEventType::Denied,
        };
        tracing::debug!(
            entity = %self.entity,
            subject = %key,
            principal = %principal.id(),
            %kind,
            allowed,
            path = ?path,
            "authorization decision"
        );
        cx.record(audit::decision(
            event_type,
            &self.entity,
            self.policy.name(),
            Some(key),
            Some(principal.id()),
            kind,
        ));

        Ok((allowed, path))
    }

    /// Decide, turning a denial into [`AuthError::Forbidden`]
    pub fn require(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: Option<&Principal>,
    ) -> Result<(), AuthError> {
        if self.decide(cx, subject, kind, principal)? {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                kind: kind.clone(),
                entity: self.entity.clone(),
            })
        }
    }

    /// Restrict `filter` to rows the principal may access
    ///
    /// Returns the filter unchanged when enforcement is disabled or when
    /// called from inside another policy evaluation.
    pub fn narrow(
        &self,
        cx: &AuthContext,
        mut filter: Filter,
        principal: Option<&Principal>,
    ) -> Result<Filter, AuthError> {
        if !cx.is_enabled() || cx.is_reentrant() {
            tracing::trace!(
                entity = %self.entity,
                enabled = cx.is_enabled(),
                reentrant = cx.is_reentrant(),
                "narrowing skipped"
            );
            return Ok(filter);
        }

        if filter.entity() != self.entity {
            return Err(AuthError::Configuration(format!(
                "filter over {} passed to the policy of {}",
                filter.entity(),
                self.entity
            )));
        }

        let _suspended = cx.suspend();
        let _reentry = cx.enter();

        let principal = principal
            .or(cx.principal())
            .ok_or(AuthError::NotAuthenticated)?;

        let original = filter.snapshot_and_reset();

        if principal.is_administrator() {
            self.policy.narrow_for_admin(cx, &mut filter, principal)?;
        } else {
            self.policy.narrow_internal(cx, &mut filter, principal)?;
        }

        let added = filter
            .predicate()
            .map(|p| p.to_string())
            .unwrap_or_default();

        if let Some(original) = original {
            filter.and(original);
        }

        tracing::debug!(
            entity = %self.entity,
            principal = %principal.id(),
            kind = %filter.requested(),
            predicate = %added,
            "query narrowed"
        );
        cx.record(audit::narrowed(
            principal.is_administrator(),
            &self.entity,
            self.policy.name(),
            principal.id(),
            filter.requested(),
            added,
        ));

        Ok(filter)
    }
}

impl<S: ?Sized, P> fmt::Debug for Guard<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("entity", &self.entity)
            .field("bound", &self.bound.borrow())
            .field("cached", &self.cache.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::filter::TableSet;
    use crate::store::MemoryGrantStore;
    use crate::subject::Record;
    use rowguard_api::{EscapeList, GroupId, Predicate};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Grants `read` to everyone and counts how often it is consulted
    #[derive(Default)]
    struct Spy {
        decisions: AtomicUsize,
    }

    impl Policy<Record> for Spy {
        fn kinds(&self) -> Vec<KindSpec> {
            vec![KindSpec::system(Kind::READ)]
        }

        fn decide_internal(
            &self,
            _cx: &AuthContext,
            _subject: &Record,
            kind: &Kind,
            _principal: &Principal,
        ) -> Result<bool, AuthError> {
            self.decisions.fetch_add(1, Ordering::SeqCst);
            Ok(*kind == Kind::READ)
        }

        fn narrow_internal(
            &self,
            _cx: &AuthContext,
            filter: &mut Filter,
            _principal: &Principal,
        ) -> Result<(), AuthError> {
            filter.and(Predicate::eq("visible", true));
            Ok(())
        }
    }

    fn context() -> AuthContext {
        AuthContext::new(Arc::new(MemoryGrantStore::new()))
    }

    fn user() -> Principal {
        Principal::new(PrincipalId(1), GroupId(10))
    }

    fn record(id: i64) -> Record {
        Record::from_pairs([("id", id)])
    }

    #[test]
    fn test_disabled_allows_without_principal() {
        let cx = AuthContext::bootstrap(Arc::new(MemoryGrantStore::new()));
        let guard = Guard::new("notes", Spy::default());

        let (allowed, path) = guard
            .decide_traced(&cx, &record(1), &Kind::MANAGE, None)
            .unwrap();
        assert!(allowed);
        assert_eq!(path, DecisionPath::Disabled);
        assert_eq!(guard.policy().decisions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_principal_denies() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());

        assert!(!guard.decide(&cx, &record(1), &Kind::READ, None).unwrap());
    }

    #[test]
    fn test_ambient_principal_is_used() {
        let cx = context().with_principal(user());
        let guard = Guard::new("notes", Spy::default());

        assert!(guard.decide(&cx, &record(1), &Kind::READ, None).unwrap());
    }

    #[test]
    fn test_cache_hit_skips_policy() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());
        let subject = record(1);
        let principal = user();

        let first = guard
            .decide(&cx, &subject, &Kind::READ, Some(&principal))
            .unwrap();
        let (second, path) = guard
            .decide_traced(&cx, &subject, &Kind::READ, Some(&principal))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(path, DecisionPath::Cached);
        assert_eq!(guard.policy().decisions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rebinding_invalidates_cache() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());
        let principal = user();

        guard
            .decide(&cx, &record(1), &Kind::READ, Some(&principal))
            .unwrap();
        guard
            .decide(&cx, &record(2), &Kind::READ, Some(&principal))
            .unwrap();
        assert_eq!(guard.policy().decisions.load(Ordering::SeqCst), 2);

        guard.attach_to(&record(2));
        assert_eq!(guard.cached(), 0);
        guard
            .decide(&cx, &record(2), &Kind::READ, Some(&principal))
            .unwrap();
        assert_eq!(guard.policy().decisions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_keyless_subjects_do_not_share_cache() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());
        let principal = user();
        let draft = Record::from_pairs([("title", rowguard_api::Value::from("draft"))]);

        guard.decide(&cx, &draft, &Kind::READ, Some(&principal)).unwrap();
        let (_, path) = guard
            .decide_traced(&cx, &draft, &Kind::READ, Some(&principal))
            .unwrap();

        assert_eq!(path, DecisionPath::Policy);
        assert_eq!(guard.policy().decisions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_admin_bypass_is_audited_separately() {
        let sink = Arc::new(MemoryAuditSink::new());
        let cx = context().with_audit(sink.clone());
        let guard = Guard::new("notes", Spy::default());
        let admin = user().administrator();

        let (allowed, path) = guard
            .decide_traced(&cx, &record(1), &Kind::MANAGE, Some(&admin))
            .unwrap();

        assert!(allowed);
        assert_eq!(path, DecisionPath::Administrator);
        assert_eq!(sink.find_by_type(AuditEventType::AdminBypass).len(), 1);
        assert!(sink.find_by_type(AuditEventType::Granted).is_empty());
    }

    #[test]
    fn test_escape_list_grants_kind() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());
        let subject = record(1).with_escape_list(EscapeList::new().with(Kind::WRITE));

        let (allowed, path) = guard
            .decide_traced(&cx, &subject, &Kind::WRITE, Some(&user()))
            .unwrap();
        assert!(allowed);
        assert_eq!(path, DecisionPath::EscapeList);

        assert!(!guard
            .decide(&cx, &subject, &Kind::MANAGE, Some(&user()))
            .unwrap());
    }

    #[test]
    fn test_wildcard_escape_list() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());
        let subject = record(1).with_escape_list(EscapeList::all());

        assert!(guard
            .decide(&cx, &subject, &Kind::MANAGE, Some(&user()))
            .unwrap());
        assert_eq!(guard.policy().decisions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_require_maps_denial_to_forbidden() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());

        match guard.require(&cx, &record(1), &Kind::WRITE, Some(&user())) {
            Err(AuthError::Forbidden { kind, entity }) => {
                assert_eq!(kind, Kind::WRITE);
                assert_eq!(entity, "notes");
            }
            other => panic!("Expected Forbidden, got {:?}", other),
        }
    }

    #[test]
    fn test_narrow_requires_principal() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());

        let result = guard.narrow(&cx, Filter::new("notes"), None);
        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
        assert!(cx.is_enabled());
        assert!(!cx.is_reentrant());
    }

    #[test]
    fn test_narrow_wraps_caller_or_chain() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());

        let mut filter = Filter::new("notes");
        filter.and(Predicate::eq("id", 1)).or(Predicate::eq("id", 2));

        let narrowed = guard.narrow(&cx, filter, Some(&user())).unwrap();
        assert_eq!(
            narrowed.to_string(),
            "SELECT * FROM notes WHERE visible = TRUE AND (id = 1 OR id = 2)"
        );

        let hidden = Record::from_pairs([
            ("id", rowguard_api::Value::Int(2)),
            ("visible", rowguard_api::Value::Bool(false)),
        ]);
        assert!(!narrowed
            .matches(hidden.row(), &TableSet::new())
            .unwrap());
    }

    #[test]
    fn test_narrow_is_noop_when_disabled() {
        let cx = AuthContext::bootstrap(Arc::new(MemoryGrantStore::new()));
        let guard = Guard::new("notes", Spy::default());

        let narrowed = guard.narrow(&cx, Filter::new("notes"), None).unwrap();
        assert!(narrowed.is_empty());
    }

    #[test]
    fn test_narrow_admin_default_sees_everything() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());

        let narrowed = guard
            .narrow(&cx, Filter::new("notes"), Some(&user().administrator()))
            .unwrap();
        assert!(narrowed.is_empty());
    }

    #[test]
    fn test_narrow_rejects_foreign_filter() {
        let cx = context();
        let guard = Guard::new("notes", Spy::default());

        let result = guard.narrow(&cx, Filter::new("accounts"), Some(&user()));
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }
}
