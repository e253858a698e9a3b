//! # rowguard: record-level authorization
//!
//! Decides, per record and per action, whether the acting principal may read,
//! create, update or administer it, and rewrites query filters so that rows
//! the principal may not see are excluded by the data layer itself.
//!
//! ## Core Principles
//!
//! - **One policy, two answers**: `decide` checks one loaded record, `narrow`
//!   restricts a listing; both read the same grant rows and agree
//! - **Shared rules in one place**: administrator bypass, escape lists,
//!   caching and reentrancy are applied by [`Guard`], never by a policy
//! - **Per-request state**: enforcement flags live in an [`AuthContext`]
//!   owned by one request
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rowguard::{AuthContext, Filter, Guard, GroupGrantPolicy, GrantStore, MemoryGrantStore, Record, TableSet};
//! use rowguard_api::{GroupGrant, GroupId, Kind, Membership, Principal, PrincipalId};
//!
//! let store = Arc::new(MemoryGrantStore::new());
//! store.add_member(Membership::new(PrincipalId(1), GroupId(10))).unwrap();
//! store.put_group_grant("project_groups", GroupGrant::new(1i64, GroupId(10))).unwrap();
//!
//! let alice = Principal::new(PrincipalId(1), GroupId(10));
//! let cx = AuthContext::new(store.clone()).with_principal(alice);
//! let projects = Guard::new("projects", GroupGrantPolicy::new("projects", "project_groups"));
//!
//! let project = Record::from_pairs([("id", 1i64), ("owner_group", 10)]);
//! assert!(projects.decide(&cx, &project, &Kind::READ, None).unwrap());
//! assert!(!projects.decide(&cx, &project, &Kind::WRITE, None).unwrap());
//!
//! let listing = projects.narrow(&cx, Filter::new("projects"), None).unwrap();
//! let tables = TableSet::with_store(store.as_ref());
//! assert!(listing.matches(project.row(), &tables).unwrap());
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod membership;
pub mod policy;
pub mod registry;
pub mod store;
pub mod subject;

#[cfg(feature = "subscriber")]
pub mod tracing_support;

pub use audit::{
    AuditError, AuditEvent, AuditEventType, AuditSink, CompositeAuditSink, FileAuditSink,
    MemoryAuditSink, NullAuditSink,
};
pub use config::{AuthConfig, AuthConfigBuilder, AuthPresets, ConfigError};
pub use context::AuthContext;
pub use error::AuthError;
pub use filter::{Filter, TableSet};
pub use policy::{
    AccountPolicy, AclEntry, AclManager, AclPolicy, AdminsOnly, CreatorOnly, DecisionPath,
    Delegate, Everyone, GroupGrantPolicy, Guard, ModuleGrantPolicy, ModulePolicy, Owner, Policy,
    ReadOnly, Relation,
};
pub use registry::{ModuleRegistry, RegistryError};
pub use store::{
    FileGrantStore, GrantData, GrantStore, MemoryGrantStore, ReadOnlyGrantStore, StoreError,
};
pub use subject::{Authorizable, Record, Subject};

pub use rowguard_api;
