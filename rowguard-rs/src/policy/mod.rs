//! Record-level policies
//!
//! Every entity type gets a [`Policy`]; a [`Guard`] wraps it for one request
//! and applies the rules all policies share before consulting it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Guard                                   │
//! │   disabled? ─ principal? ─ cache ─ admin ─ escape list ─ Policy      │
//! │                                                                      │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────┐ ┌──────────────┐ │
//! │  │   Trivial    │ │  Ownership   │ │ Group grants │ │  Delegation  │ │
//! │  │ - Everyone   │ │ - Owner      │ │ - GroupGrant │ │ - Delegate   │ │
//! │  │ - ReadOnly   │ │ - Creator    │ │ - Acl        │ │ - Module     │ │
//! │  │ - AdminsOnly │ │   Only       │ │ - Account    │ │ - ModuleGrant│ │
//! │  └──────────────┘ └──────────────┘ └──────────────┘ └──────────────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Variants
//!
//! | Policy | `read` | mutation | Narrow |
//! |--------|--------|----------|--------|
//! | Everyone | yes | yes | unchanged |
//! | ReadOnly | yes | no | unchanged, or nothing for other kinds |
//! | AdminsOnly | no | no | nothing |
//! | Owner | owning group | owning group | membership `EXISTS` |
//! | CreatorOnly | creator | creator | creator equality |
//! | GroupGrantPolicy | link row | `write` flag | link `EXISTS` |
//! | AccountPolicy | link row | `manage` flag | link `EXISTS` |
//! | Delegate | parent `read` | parent `update` | parent `EXISTS` |
//! | ModuleGrantPolicy | module grant | module grant | module grant `EXISTS` |
//!
//! Administrators pass every decision without consulting the policy.

mod account;
mod acl;
mod basic;
mod delegate;
mod group_grant;
mod module;
mod owner;
mod runtime;

pub use account::{account_kind, AccountPolicy};
pub use acl::{AclEntry, AclManager, AclPolicy};
pub use basic::{AdminsOnly, Everyone, ReadOnly};
pub use delegate::{delegated_kind, Delegate, Relation};
pub use group_grant::GroupGrantPolicy;
pub use module::{ModuleGrantPolicy, ModulePolicy};
pub use owner::{CreatorOnly, Owner};
pub use runtime::{DecisionPath, Guard, Policy};
