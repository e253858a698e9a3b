//! Engine configuration and ready-made setups
//!
//! An [`AuthConfig`] is built once per process and hands out one
//! [`AuthContext`] per request.

use rowguard_api::{GroupId, Principal};
use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::context::AuthContext;
use crate::policy::{AccountPolicy, GroupGrantPolicy};
use crate::store::{FileGrantStore, GrantStore, MemoryGrantStore, ReadOnlyGrantStore};

/// Complete engine configuration bundle
pub struct AuthConfig {
    /// Membership and grant storage
    pub store: Arc<dyn GrantStore>,
    /// Audit sink
    pub audit: Arc<dyn AuditSink>,
    /// Whether new contexts start with enforcement enabled
    pub enforce: bool,
    /// Group owning the records administrators list
    pub admin_group: GroupId,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enforce", &self.enforce)
            .field("admin_group", &self.admin_group)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    pub fn new(
        store: impl GrantStore + 'static,
        audit: impl AuditSink + 'static,
        enforce: bool,
        admin_group: GroupId,
    ) -> Self {
        Self {
            store: Arc::new(store),
            audit: Arc::new(audit),
            enforce,
            admin_group,
        }
    }

    /// Account policy whose administrator listings use this configuration's group
    pub fn account_policy(&self, base: GroupGrantPolicy) -> AccountPolicy {
        AccountPolicy::new(base, self.admin_group)
    }

    /// A fresh context for one request
    pub fn context(&self, principal: Option<Principal>) -> AuthContext {
        let cx = AuthContext::new(Arc::clone(&self.store)).with_audit(Arc::clone(&self.audit));
        if !self.enforce {
            cx.set_enabled(false);
        }
        match principal {
            Some(principal) => cx.with_principal(principal),
            None => cx,
        }
    }
}

/// Builder for engine configurations
pub struct AuthConfigBuilder {
    store: Option<Arc<dyn GrantStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    enforce: bool,
    admin_group: GroupId,
    app_name: Option<String>,
}

impl AuthConfigBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            audit: None,
            enforce: true,
            admin_group: GroupId(1),
            app_name: None,
        }
    }

    /// Set the application name (used for default paths)
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn store(mut self, store: impl GrantStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Share a store with other configurations
    pub fn shared_store(mut self, store: Arc<dyn GrantStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    pub fn enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    pub fn admin_group(mut self, group: GroupId) -> Self {
        self.admin_group = group;
        self
    }

    /// Build the configuration
    ///
    /// Without an explicit store, the file store in the application's config
    /// directory is opened.
    pub fn build(self) -> Result<AuthConfig, ConfigError> {
        let store: Arc<dyn GrantStore> = match self.store {
            Some(s) => s,
            None => {
                let app_name = self.app_name.as_deref().ok_or_else(|| {
                    ConfigError::InvalidConfig("a store or an app name is required".to_string())
                })?;
                let store = FileGrantStore::default_for_app(app_name)
                    .map_err(|e| ConfigError::StoreInit(e.to_string()))?;
                Arc::new(store)
            }
        };

        Ok(AuthConfig {
            store,
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            enforce: self.enforce,
            admin_group: self.admin_group,
        })
    }
}

impl Default for AuthConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to initialize store: {0}")]
    StoreInit(String),

    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Preset Configurations
// ============================================================================

/// Preset configurations for common deployments
pub struct AuthPresets;

impl AuthPresets {
    fn config_dir(app_name: &str) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(app_name)
    }

    /// Normal request processing
    ///
    /// - File-based grant store
    /// - File-based audit log
    /// - Enforcement on
    pub fn production(app_name: &str) -> Result<AuthConfig, ConfigError> {
        let config_dir = Self::config_dir(app_name);

        let store = FileGrantStore::new(config_dir.join("grants.json"))
            .map_err(|e| ConfigError::StoreInit(e.to_string()))?;

        let audit = FileAuditSink::new(config_dir.join("audit.jsonl"))
            .map_err(|e| ConfigError::AuditInit(e.to_string()))?;

        Ok(AuthConfig::new(store, audit, true, GroupId(1)))
    }

    /// Serving from a grant file that must not change
    ///
    /// - Read-only file store
    /// - File-based audit log
    /// - Enforcement on
    pub fn read_only(
        app_name: &str,
        grants_file: Option<PathBuf>,
    ) -> Result<AuthConfig, ConfigError> {
        let config_dir = Self::config_dir(app_name);
        let store_path = grants_file.unwrap_or_else(|| config_dir.join("grants.json"));

        let inner = FileGrantStore::new(&store_path)
            .map_err(|e| ConfigError::StoreInit(e.to_string()))?;

        let audit = FileAuditSink::new(config_dir.join("audit.jsonl"))
            .map_err(|e| ConfigError::AuditInit(e.to_string()))?;

        Ok(AuthConfig::new(
            ReadOnlyGrantStore::new(inner),
            audit,
            true,
            GroupId(1),
        ))
    }

    /// Testing mode (in-memory, no persistence)
    ///
    /// - In-memory store
    /// - Memory-based audit
    /// - Enforcement on
    pub fn testing() -> AuthConfig {
        AuthConfig::new(MemoryGrantStore::new(), MemoryAuditSink::new(), true, GroupId(1))
    }

    /// Installation and migrations
    ///
    /// - In-memory store
    /// - Null audit
    /// - Enforcement off: every decision passes and no query is narrowed
    pub fn bootstrap() -> AuthConfig {
        AuthConfig::new(MemoryGrantStore::new(), NullAuditSink, false, GroupId(1))
    }
}
