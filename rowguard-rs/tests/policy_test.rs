//! Integration tests for decisions and query narrowing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rowguard::{
    AccountPolicy, AclManager, AuditEventType, AuthContext, AuthError, AuthPresets, Filter,
    GrantStore, GroupGrantPolicy, Guard, MemoryAuditSink, MemoryGrantStore, ModuleGrantPolicy,
    ModulePolicy, ModuleRegistry, Owner, Policy, Record, TableSet,
};
use rowguard_api::{
    GroupGrant, GroupId, Kind, KindSpec, Membership, ModuleGrant, Predicate, Principal, PrincipalId,
    Row, Value,
};

const LINK: &str = "project_groups";

fn principal(id: i64) -> Principal {
    Principal::new(PrincipalId(id), GroupId(id * 10))
}

fn project(id: i64, owner: i64) -> Record {
    Record::from_pairs([("id", id), ("owner_group", owner)])
}

/// Principals 1..=4 are members of their own group; 1 and 2 also share group 100.
fn shared_store() -> Arc<MemoryGrantStore> {
    let store = Arc::new(MemoryGrantStore::new());
    for id in 1..=4 {
        store
            .add_member(Membership::new(PrincipalId(id), GroupId(id * 10)))
            .unwrap();
    }
    store
        .add_member(Membership::new(PrincipalId(1), GroupId(100)))
        .unwrap();
    store
        .add_member(Membership::new(PrincipalId(2), GroupId(100)))
        .unwrap();
    store.declare_link(LINK);
    store
}

fn listed(filter: &Filter, record: &Record, store: &MemoryGrantStore) -> bool {
    let tables = TableSet::with_store(store);
    filter.matches(record.row(), &tables).unwrap()
}

#[test]
fn test_admin_bypass_for_every_kind() {
    let store = shared_store();
    let cx = AuthContext::new(store.clone());
    let guard = Guard::new("projects", GroupGrantPolicy::new("projects", LINK));
    let admin = principal(9).administrator();

    for kind in [
        Kind::READ,
        Kind::WRITE,
        Kind::MANAGE,
        Kind::CHANGE_PERMISSIONS,
        Kind::new("anything"),
    ] {
        assert!(guard.decide(&cx, &project(1, 10), &kind, Some(&admin)).unwrap());
    }

    let filter = guard
        .narrow(&cx, Filter::new("projects"), Some(&admin))
        .unwrap();
    assert!(filter.is_empty());
}

#[test]
fn test_group_grant_decide_matches_narrow() {
    let store = shared_store();
    // Deterministic spread of link rows across subjects, groups and flags
    for subject in 1..=6i64 {
        for (i, group) in [10i64, 20, 30, 100].into_iter().enumerate() {
            let pattern = (subject + i as i64) % 4;
            if pattern == 0 {
                continue;
            }
            let mut grant = GroupGrant::new(subject, GroupId(group));
            if pattern >= 2 {
                grant = grant.with_write();
            }
            if pattern == 3 {
                grant = grant.with_manage();
            }
            store.put_group_grant(LINK, grant).unwrap();
        }
    }

    let cx = AuthContext::new(store.clone());
    let guard = Guard::new("projects", GroupGrantPolicy::new("projects", LINK));
    let projects: Vec<Record> = (1..=7).map(|id| project(id, (id % 4 + 1) * 10)).collect();

    for id in 1..=5 {
        let p = principal(id);
        for kind in [
            Kind::READ,
            Kind::WRITE,
            Kind::UPDATE,
            Kind::MANAGE,
            Kind::CHANGE_PERMISSIONS,
        ] {
            let filter = guard
                .narrow(&cx, Filter::new("projects").requesting(kind.clone()), Some(&p))
                .unwrap();
            for record in &projects {
                assert_eq!(
                    listed(&filter, record, &store),
                    guard.decide(&cx, record, &kind, Some(&p)).unwrap(),
                    "principal {} kind {} subject {}",
                    id,
                    kind,
                    record.row()["id"]
                );
            }
        }
    }
}

#[test]
fn test_owner_decide_matches_narrow() {
    let store = shared_store();
    let cx = AuthContext::new(store.clone());
    let guard = Guard::new("documents", Owner::new("documents"));
    let mut documents: Vec<Record> = [10, 20, 100, 40, 50]
        .into_iter()
        .enumerate()
        .map(|(i, owner)| project(i as i64 + 1, owner))
        .collect();
    documents.push(Record::from_pairs([
        ("id", Value::Int(9)),
        ("owner_group", Value::Null),
    ]));

    for id in 1..=4 {
        let p = principal(id);
        let filter = guard
            .narrow(&cx, Filter::new("documents"), Some(&p))
            .unwrap();
        for doc in &documents {
            assert_eq!(
                listed(&filter, doc, &store),
                guard.decide(&cx, doc, &Kind::READ, Some(&p)).unwrap()
            );
        }
    }
}

/// Issues a query against its own entity while being evaluated
struct SelfQuerying {
    narrow_calls: Arc<AtomicUsize>,
}

impl Policy<Record> for SelfQuerying {
    fn kinds(&self) -> Vec<KindSpec> {
        vec![KindSpec::system(Kind::READ)]
    }

    fn decide_internal(
        &self,
        cx: &AuthContext,
        _subject: &Record,
        _kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        let nested = Guard::new(
            "notes",
            SelfQuerying {
                narrow_calls: self.narrow_calls.clone(),
            },
        );
        let filter = nested.narrow(cx, Filter::new("notes"), Some(principal))?;
        Ok(filter.is_empty())
    }

    fn narrow_internal(
        &self,
        cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        self.narrow_calls.fetch_add(1, Ordering::SeqCst);
        let nested = Guard::new(
            "notes",
            SelfQuerying {
                narrow_calls: self.narrow_calls.clone(),
            },
        );
        let inner = nested.narrow(cx, Filter::new("notes"), Some(principal))?;
        assert!(inner.is_empty());
        filter.and(Predicate::eq("visible", true));
        Ok(())
    }
}

#[test]
fn test_nested_queries_are_not_narrowed() {
    let cx = AuthContext::new(shared_store());
    let calls = Arc::new(AtomicUsize::new(0));
    let guard = Guard::new(
        "notes",
        SelfQuerying {
            narrow_calls: calls.clone(),
        },
    );

    let filter = guard
        .narrow(&cx, Filter::new("notes"), Some(&principal(1)))
        .unwrap();
    assert_eq!(filter.to_string(), "SELECT * FROM notes WHERE visible = TRUE");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(guard
        .decide(&cx, &Record::from_pairs([("id", 1)]), &Kind::READ, Some(&principal(1)))
        .unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(cx.is_enabled());
    assert!(!cx.is_reentrant());
}

#[test]
fn test_cache_is_bound_to_subject() {
    let store = shared_store();
    store
        .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10)))
        .unwrap();
    let cx = AuthContext::new(store.clone());
    let guard = Guard::new("projects", GroupGrantPolicy::new("projects", LINK));
    let p1 = principal(1);

    assert!(guard.decide(&cx, &project(1, 10), &Kind::READ, Some(&p1)).unwrap());
    assert_eq!(guard.cached(), 1);

    // Revocation is not seen while bound to the same subject
    store.remove_group_grant(LINK, &Value::Int(1), GroupId(10)).unwrap();
    assert!(guard.decide(&cx, &project(1, 10), &Kind::READ, Some(&p1)).unwrap());

    // Binding anew discards the cached decision
    guard.attach_to(&project(1, 10));
    assert!(!guard.decide(&cx, &project(1, 10), &Kind::READ, Some(&p1)).unwrap());

    // Another subject never sees the first subject's decisions
    store
        .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10)))
        .unwrap();
    guard.attach_to(&project(1, 10));
    assert!(guard.decide(&cx, &project(1, 10), &Kind::READ, Some(&p1)).unwrap());
    assert!(!guard.decide(&cx, &project(2, 10), &Kind::READ, Some(&p1)).unwrap());
}

#[test]
fn test_account_remapping_is_monotonic() {
    let flag_sets = [(false, false), (true, false), (false, true), (true, true)];
    let kinds = [Kind::READ, Kind::WRITE_CONTENTS, Kind::WRITE, Kind::MANAGE];
    let p = principal(1);

    let allowed = |write: bool, manage: bool| -> Vec<bool> {
        let store = shared_store();
        let mut grant = GroupGrant::new(7i64, GroupId(10));
        grant.write = write;
        grant.manage = manage;
        store.put_group_grant("account_groups", grant).unwrap();
        let cx = AuthContext::new(store);
        let guard = Guard::new(
            "accounts",
            AccountPolicy::new(GroupGrantPolicy::new("accounts", "account_groups"), GroupId(1)),
        );
        kinds
            .iter()
            .map(|kind| guard.decide(&cx, &project(7, 99), kind, Some(&p)).unwrap())
            .collect()
    };

    for &(write, manage) in &flag_sets {
        let got = allowed(write, manage);
        // read always; writeContents needs `write`; write and manage need `manage`
        assert_eq!(got, vec![true, write, manage, manage]);

        for &(more_write, more_manage) in &flag_sets {
            if (write && !more_write) || (manage && !more_manage) {
                continue;
            }
            let wider = allowed(more_write, more_manage);
            for (narrow, wide) in got.iter().zip(&wider) {
                assert!(!narrow || *wide);
            }
        }
    }
}

#[test]
fn test_acl_owner_row_is_protected() {
    let store = shared_store();
    store
        .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10)).with_write())
        .unwrap();
    store
        .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(20)).with_write())
        .unwrap();
    let sink = Arc::new(MemoryAuditSink::new());
    let cx = AuthContext::new(store.clone()).with_audit(sink.clone());
    let acl = AclManager::new(GroupGrantPolicy::new("projects", LINK));

    let subject = project(1, 10);

    let result = acl.revoke(&cx, &subject, GroupId(10), Some(&principal(2)));
    assert!(matches!(result, Err(AuthError::Forbidden { .. })));
    assert_eq!(sink.find_by_type(AuditEventType::AclProtected).len(), 1);
    assert_eq!(store.group_grants(LINK, &Value::Int(1)).unwrap().len(), 2);

    // Without the owner column the protection cannot be evaluated
    let unselected = Record::from_pairs([("id", 1i64)]);
    let result = acl.revoke(&cx, &unselected, GroupId(10), Some(&principal(2)));
    assert!(matches!(result, Err(AuthError::Configuration(_))));
    assert_eq!(store.group_grants(LINK, &Value::Int(1)).unwrap().len(), 2);

    // The collaborator's own row is an ordinary write
    assert!(acl
        .revoke(&cx, &subject, GroupId(20), Some(&principal(2)))
        .unwrap());
}

#[test]
fn test_keyless_records_are_decided_individually() {
    let store = shared_store();
    let cx = AuthContext::new(store.clone());
    let guard = Guard::new("notes", Owner::new("notes"));
    let p1 = principal(1);
    let mine = Record::from_pairs([("owner_group", 10i64)]);
    let theirs = Record::from_pairs([("owner_group", 20i64)]);

    assert!(guard.decide(&cx, &mine, &Kind::READ, Some(&p1)).unwrap());
    assert!(!guard.decide(&cx, &theirs, &Kind::READ, Some(&p1)).unwrap());
    assert!(guard.decide(&cx, &mine, &Kind::READ, Some(&p1)).unwrap());
}

#[test]
fn test_empty_link_table_lists_nothing() {
    let store = Arc::new(MemoryGrantStore::new());
    store
        .add_member(Membership::new(PrincipalId(1), GroupId(10)))
        .unwrap();
    let cx = AuthContext::new(store.clone());
    let guard = Guard::new("projects", GroupGrantPolicy::new("projects", LINK));
    let p1 = principal(1);
    let subject = project(1, 10);

    assert!(!guard.decide(&cx, &subject, &Kind::READ, Some(&p1)).unwrap());
    let filter = guard
        .narrow(&cx, Filter::new("projects"), Some(&p1))
        .unwrap();
    assert!(!listed(&filter, &subject, &store));
}

#[test]
fn test_owner_group_scenario() {
    let store = shared_store();
    store
        .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10)))
        .unwrap();
    let cx = AuthContext::new(store.clone());
    let guard = Guard::new("projects", GroupGrantPolicy::new("projects", LINK));
    let subject = project(1, 10);
    let (p1, p2) = (principal(1), principal(2));

    assert!(guard.decide(&cx, &subject, &Kind::READ, Some(&p1)).unwrap());
    assert!(!guard.decide(&cx, &subject, &Kind::WRITE, Some(&p1)).unwrap());
    assert!(!guard.decide(&cx, &subject, &Kind::READ, Some(&p2)).unwrap());
    assert!(!guard.decide(&cx, &subject, &Kind::WRITE, Some(&p2)).unwrap());

    let for_p1 = guard.narrow(&cx, Filter::new("projects"), Some(&p1)).unwrap();
    let for_p2 = guard.narrow(&cx, Filter::new("projects"), Some(&p2)).unwrap();
    assert!(listed(&for_p1, &subject, &store));
    assert!(!listed(&for_p2, &subject, &store));

    let writable = guard
        .narrow(&cx, Filter::new("projects").requesting(Kind::WRITE), Some(&p1))
        .unwrap();
    assert!(!listed(&writable, &subject, &store));
}

#[test]
fn test_bootstrap_fails_open() {
    let config = AuthPresets::bootstrap();
    let cx = config.context(None);
    let guard = Guard::new("projects", GroupGrantPolicy::new("projects", LINK));

    assert!(guard.decide(&cx, &project(1, 10), &Kind::MANAGE, None).unwrap());

    let mut filter = Filter::new("projects");
    filter.and(Predicate::eq("id", 1));
    let narrowed = guard.narrow(&cx, filter.clone(), None).unwrap();
    assert_eq!(narrowed, filter);

    // Enforcement switched on at the end of bootstrap
    cx.set_enabled(true);
    assert!(!guard.decide(&cx, &project(2, 10), &Kind::READ, None).unwrap());
    assert!(matches!(
        guard.narrow(&cx, Filter::new("projects"), None),
        Err(AuthError::NotAuthenticated)
    ));
}

#[test]
fn test_elevation_restores_enforcement() {
    let store = shared_store();
    let sink = Arc::new(MemoryAuditSink::new());
    let cx = AuthContext::new(store).with_audit(sink.clone());
    let guard = Guard::new("projects", GroupGrantPolicy::new("projects", LINK));

    let elevated = cx.elevate(|| guard.decide(&cx, &project(1, 10), &Kind::MANAGE, None).unwrap());
    assert!(elevated);
    assert!(cx.is_enabled());
    assert_eq!(sink.find_by_type(AuditEventType::Elevated).len(), 1);
    assert_eq!(sink.find_by_type(AuditEventType::DisabledBypass).len(), 1);

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        cx.elevate(|| panic!("migration failed"))
    }));
    assert!(outcome.is_err());
    assert!(cx.is_enabled());
}

#[test]
fn test_module_policy_falls_back_to_everyone() {
    let store = shared_store();
    store
        .put_module_grant(ModuleGrant::new("drive", GroupId(10), Kind::MANAGE_DRIVES))
        .unwrap();
    let cx = AuthContext::new(store.clone());
    let registry: Arc<ModuleRegistry<Record>> = Arc::new(ModuleRegistry::new());
    let guard = Guard::new("folders", ModulePolicy::new("drive", registry.clone()));
    let folder = Record::from_pairs([("id", 1)]);
    let p2 = principal(2);

    assert!(guard.decide(&cx, &folder, &Kind::MANAGE_DRIVES, Some(&p2)).unwrap());
    assert!(guard.narrow(&cx, Filter::new("folders"), Some(&p2)).unwrap().is_empty());

    registry.install(
        "drive",
        Arc::new(ModuleGrantPolicy::new(
            "drive",
            vec![KindSpec::grantable(Kind::MANAGE_DRIVES)],
        )),
    );
    guard.attach_to(&folder);
    assert!(!guard.decide(&cx, &folder, &Kind::MANAGE_DRIVES, Some(&p2)).unwrap());
    assert!(guard
        .decide(&cx, &folder, &Kind::MANAGE_DRIVES, Some(&principal(1)))
        .unwrap());

    let filter = guard
        .narrow(
            &cx,
            Filter::new("folders").requesting(Kind::MANAGE_DRIVES),
            Some(&p2),
        )
        .unwrap();
    let tables = TableSet::with_store(store.as_ref() as &dyn GrantStore);
    assert!(!filter.matches(&Row::new(), &tables).unwrap());

    registry.uninstall("drive");
    guard.attach_to(&folder);
    assert!(guard.decide(&cx, &folder, &Kind::MANAGE_DRIVES, Some(&p2)).unwrap());
}

#[test]
fn test_bypasses_are_audited_by_path() {
    let sink = Arc::new(MemoryAuditSink::new());
    let cx = AuthContext::new(shared_store()).with_audit(sink.clone());
    let guard = Guard::new("projects", GroupGrantPolicy::new("projects", LINK));
    let escaped = project(1, 10).with_escape_list(rowguard_api::EscapeList::new().with(Kind::READ));

    guard.decide(&cx, &escaped, &Kind::READ, Some(&principal(3))).unwrap();
    guard.decide(&cx, &escaped, &Kind::WRITE, Some(&principal(3))).unwrap();
    guard
        .decide(&cx, &project(2, 10), &Kind::WRITE, Some(&principal(3).administrator()))
        .unwrap();

    assert_eq!(sink.find_by_type(AuditEventType::EscapeListBypass).len(), 1);
    assert_eq!(sink.find_by_type(AuditEventType::Denied).len(), 1);
    assert_eq!(sink.find_by_type(AuditEventType::AdminBypass).len(), 1);
    assert!(sink.find_by_type(AuditEventType::Granted).is_empty());
}
