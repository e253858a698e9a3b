//! Module action grants and policies of pluggable modules

use rowguard_api::{Kind, KindSpec, Predicate, Principal};
use std::sync::Arc;

use super::basic::Everyone;
use super::runtime::Policy;
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::filter::Filter;
use crate::membership;
use crate::registry::ModuleRegistry;

/// Access to a module's actions through module grant rows
///
/// The kinds are the module's catalog; a kind outside it is never granted.
#[derive(Debug, Clone)]
pub struct ModuleGrantPolicy {
    module: String,
    catalog: Vec<KindSpec>,
}

impl ModuleGrantPolicy {
    pub fn new(module: impl Into<String>, catalog: Vec<KindSpec>) -> Self {
        Self {
            module: module.into(),
            catalog,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    fn in_catalog(&self, kind: &Kind) -> bool {
        self.catalog.iter().any(|spec| &spec.kind == kind)
    }
}

impl<S: ?Sized> Policy<S> for ModuleGrantPolicy {
    fn name(&self) -> &str {
        "module_grant"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        self.catalog.clone()
    }

    fn decide_internal(
        &self,
        cx: &AuthContext,
        _subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        if !self.in_catalog(kind) {
            return Ok(false);
        }
        Ok(membership::has_module_grant(
            cx.store(),
            &self.module,
            kind,
            principal,
        )?)
    }

    fn narrow_internal(
        &self,
        _cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        let requested = filter.requested().clone();
        if self.in_catalog(&requested) {
            filter.and(membership::module_grant_exists(
                &self.module,
                &requested,
                principal,
            ));
        } else {
            filter.and(Predicate::False);
        }
        filter.restrict_kinds([Kind::READ]);
        Ok(())
    }
}

/// Policy of whichever module currently provides an entity
///
/// Looked up in the registry on every call, so uninstalling a module takes
/// effect immediately. An absent module means open access.
pub struct ModulePolicy<S: ?Sized> {
    module: String,
    registry: Arc<ModuleRegistry<S>>,
}

impl<S: ?Sized> ModulePolicy<S> {
    pub fn new(module: impl Into<String>, registry: Arc<ModuleRegistry<S>>) -> Self {
        Self {
            module: module.into(),
            registry,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    fn resolve(&self) -> Arc<dyn Policy<S>>
    where
        S: 'static,
    {
        self.registry.policy(&self.module).unwrap_or_else(|| {
            tracing::trace!(module = %self.module, "module absent; allowing everyone");
            Arc::new(Everyone) as Arc<dyn Policy<S>>
        })
    }
}

impl<S: ?Sized + 'static> Policy<S> for ModulePolicy<S> {
    fn name(&self) -> &str {
        "module"
    }

    fn kinds(&self) -> Vec<KindSpec> {
        self.resolve().kinds()
    }

    fn decide_internal(
        &self,
        cx: &AuthContext,
        subject: &S,
        kind: &Kind,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        self.resolve().decide_internal(cx, subject, kind, principal)
    }

    fn narrow_internal(
        &self,
        cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        self.resolve().narrow_internal(cx, filter, principal)
    }

    fn narrow_for_admin(
        &self,
        cx: &AuthContext,
        filter: &mut Filter,
        principal: &Principal,
    ) -> Result<(), AuthError> {
        self.resolve().narrow_for_admin(cx, filter, principal)
    }
}

impl<S: ?Sized> std::fmt::Debug for ModulePolicy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModulePolicy")
            .field("module", &self.module)
            .field("installed", &self.registry.is_installed(&self.module))
            .finish()
    }
}
