//! Per-request authorization context
//!
//! Carries the enforcement flag, the reentrancy marker, the ambient principal
//! and the collaborators every policy call needs. A context belongs to one
//! logical request: it is `!Sync`, so two concurrently executing requests can
//! never observe each other's flags.

use rowguard_api::Principal;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use crate::audit::{self, AuditEvent, AuditSink, NullAuditSink};
use crate::store::GrantStore;

pub struct AuthContext {
    enabled: Cell<bool>,
    reentrant: Cell<bool>,
    principal: Option<Principal>,
    store: Arc<dyn GrantStore>,
    audit: Arc<dyn AuditSink>,
}

impl AuthContext {
    /// A context with enforcement enabled and no ambient principal
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self {
            enabled: Cell::new(true),
            reentrant: Cell::new(false),
            principal: None,
            store,
            audit: Arc::new(NullAuditSink),
        }
    }

    /// A context with enforcement disabled, for installation and migrations
    pub fn bootstrap(store: Arc<dyn GrantStore>) -> Self {
        let cx = Self::new(store);
        cx.enabled.set(false);
        cx
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// The ambient acting principal
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn store(&self) -> &dyn GrantStore {
        self.store.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn is_reentrant(&self) -> bool {
        self.reentrant.get()
    }

    /// Explicitly switch enforcement on or off, e.g. at the end of bootstrap
    pub fn set_enabled(&self, enabled: bool) {
        tracing::debug!(enabled, "authorization enforcement toggled");
        self.enabled.set(enabled);
    }

    /// Run `f` with enforcement disabled, restoring the prior state afterwards
    ///
    /// The flag is restored even if `f` panics.
    pub fn elevate<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::debug!(
            principal = ?self.principal.as_ref().map(Principal::id),
            "entering elevated block"
        );
        self.record(audit::elevated(self.principal.as_ref().map(Principal::id)));
        let _restore = self.suspend();
        f()
    }

    /// Record an audit event; sink failures never affect a decision
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(error = %e, "failed to record audit event");
        }
    }

    /// Disable enforcement until the returned guard is dropped
    pub(crate) fn suspend(&self) -> FlagRestore<'_> {
        FlagRestore::set(&self.enabled, false)
    }

    /// Set the reentrancy marker until the returned guard is dropped
    pub(crate) fn enter(&self) -> FlagRestore<'_> {
        FlagRestore::set(&self.reentrant, true)
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("enabled", &self.enabled.get())
            .field("reentrant", &self.reentrant.get())
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// Restores a flag to its prior value on drop
pub(crate) struct FlagRestore<'a> {
    cell: &'a Cell<bool>,
    prior: bool,
}

impl<'a> FlagRestore<'a> {
    fn set(cell: &'a Cell<bool>, value: bool) -> Self {
        let prior = cell.replace(value);
        Self { cell, prior }
    }
}

impl Drop for FlagRestore<'_> {
    fn drop(&mut self) {
        self.cell.set(self.prior);
    }
}
