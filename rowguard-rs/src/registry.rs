//! Registry of installed modules and their policies
//!
//! Modules contribute a catalog of action kinds and a policy for the entities
//! they own. They can be installed and uninstalled while the host runs;
//! entities of an absent module fall back to open access.

use rowguard_api::{GroupId, Kind, KindSpec, ModuleGrant};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::policy::Policy;
use crate::store::{GrantStore, StoreError};

/// Error type for registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Module not installed: {0}")]
    NotInstalled(String),

    #[error("Module {module} has no action `{action}`")]
    UnknownAction { module: String, action: Kind },

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct ModuleEntry<S: ?Sized> {
    catalog: Vec<KindSpec>,
    policy: Arc<dyn Policy<S>>,
}

/// A thread-safe registry of installed modules
pub struct ModuleRegistry<S: ?Sized> {
    inner: RwLock<HashMap<String, ModuleEntry<S>>>,
}

impl<S: ?Sized> ModuleRegistry<S> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Install `module`, replacing any previous installation
    ///
    /// The catalog is taken from the policy's kinds.
    pub fn install(&self, module: impl Into<String>, policy: Arc<dyn Policy<S>>) {
        let module = module.into();
        let catalog = policy.kinds();
        let mut inner = self.inner.write().unwrap();
        inner.insert(module.clone(), ModuleEntry { catalog, policy });
        tracing::info!(module = %module, "Module installed");
    }

    /// Uninstall `module`; returns whether it was installed
    ///
    /// Grant rows are kept so a reinstalled module resumes with its grants.
    pub fn uninstall(&self, module: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.remove(module).is_some() {
            tracing::info!(module = %module, "Module uninstalled");
            true
        } else {
            false
        }
    }

    /// Uninstall `module` and delete its grant rows
    pub fn purge(&self, module: &str, store: &dyn GrantStore) -> Result<bool, RegistryError> {
        let removed = self.uninstall(module);
        for grant in store.module_grants(module)? {
            store.remove_module_grant(&grant)?;
        }
        Ok(removed)
    }

    /// Grant catalog actions of an installed module to `group`
    pub fn install_grants(
        &self,
        store: &dyn GrantStore,
        module: &str,
        group: GroupId,
        actions: impl IntoIterator<Item = Kind>,
    ) -> Result<(), RegistryError> {
        let catalog = self
            .catalog(module)
            .ok_or_else(|| RegistryError::NotInstalled(module.to_string()))?;
        for action in actions {
            if !catalog.iter().any(|spec| spec.kind == action) {
                return Err(RegistryError::UnknownAction {
                    module: module.to_string(),
                    action,
                });
            }
            tracing::debug!(module = %module, group = %group, action = %action, "Module grant added");
            store.put_module_grant(ModuleGrant::new(module, group, action))?;
        }
        Ok(())
    }

    pub fn is_installed(&self, module: &str) -> bool {
        self.inner.read().unwrap().contains_key(module)
    }

    /// Policy of an installed module
    pub fn policy(&self, module: &str) -> Option<Arc<dyn Policy<S>>> {
        self.inner
            .read()
            .unwrap()
            .get(module)
            .map(|entry| Arc::clone(&entry.policy))
    }

    /// Kind catalog of an installed module
    pub fn catalog(&self, module: &str) -> Option<Vec<KindSpec>> {
        self.inner
            .read()
            .unwrap()
            .get(module)
            .map(|entry| entry.catalog.clone())
    }

    /// Names of all installed modules, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

impl<S: ?Sized> Default for ModuleRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> fmt::Debug for ModuleRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.list())
            .finish()
    }
}
