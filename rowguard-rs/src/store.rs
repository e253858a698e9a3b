//! Grant storage: group membership, group-grant links and module grants
//!
//! The store answers direct questions for `Decide` ("is this principal in
//! that group?") and serves the same rows as tables for predicate evaluation
//! during `Narrow`, so both paths always read the same data.

use rowguard_api::{
    tables, GroupGrant, GroupId, Membership, ModuleGrant, PrincipalId, Row, Value,
    STORE_FORMAT_VERSION,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Error type for grant store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access grant store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse grant store: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported grant store version {0}")]
    Version(u32),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Store is read-only")]
    ReadOnly,
}

/// Trait for grant storage
///
/// Mutations take `&self`; implementations synchronize internally.
pub trait GrantStore: Send + Sync {
    /// Whether `principal` is a member of `group`
    fn is_member(&self, principal: PrincipalId, group: GroupId) -> Result<bool, StoreError>;

    /// All groups `principal` belongs to
    fn groups_of(&self, principal: PrincipalId) -> Result<Vec<GroupId>, StoreError>;

    fn add_member(&self, membership: Membership) -> Result<(), StoreError>;

    fn remove_member(&self, membership: Membership) -> Result<(), StoreError>;

    /// Link rows of `link` that point at `subject`
    fn group_grants(&self, link: &str, subject: &Value) -> Result<Vec<GroupGrant>, StoreError>;

    /// Insert or replace the row pairing `grant.group` with `grant.subject`
    fn put_group_grant(&self, link: &str, grant: GroupGrant) -> Result<(), StoreError>;

    /// Remove a link row; returns whether a row existed
    fn remove_group_grant(
        &self,
        link: &str,
        subject: &Value,
        group: GroupId,
    ) -> Result<bool, StoreError>;

    fn module_grants(&self, module: &str) -> Result<Vec<ModuleGrant>, StoreError>;

    fn put_module_grant(&self, grant: ModuleGrant) -> Result<(), StoreError>;

    fn remove_module_grant(&self, grant: &ModuleGrant) -> Result<bool, StoreError>;

    /// Rows of a grant table for predicate evaluation
    ///
    /// Known tables are `memberships` and `module_grants`; any other name is a
    /// link table, empty until its first grant.
    fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError>;
}

// ============================================================================
// Shared data
// ============================================================================

/// Persisted grant document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantData {
    version: u32,
    #[serde(default)]
    memberships: BTreeSet<Membership>,
    /// Link rows per link table
    #[serde(default)]
    links: BTreeMap<String, Vec<GroupGrant>>,
    #[serde(default)]
    module_grants: BTreeSet<ModuleGrant>,
}

impl Default for GrantData {
    fn default() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            memberships: BTreeSet::new(),
            links: BTreeMap::new(),
            module_grants: BTreeSet::new(),
        }
    }
}

impl GrantData {
    /// Register an empty link table so it can be queried before any grant exists
    pub fn declare_link(&mut self, link: &str) {
        self.links.entry(link.to_string()).or_default();
    }

    fn is_member(&self, principal: PrincipalId, group: GroupId) -> bool {
        self.memberships.contains(&Membership::new(principal, group))
    }

    fn groups_of(&self, principal: PrincipalId) -> Vec<GroupId> {
        self.memberships
            .iter()
            .filter(|m| m.principal == principal)
            .map(|m| m.group)
            .collect()
    }

    fn group_grants(&self, link: &str, subject: &Value) -> Vec<GroupGrant> {
        self.links
            .get(link)
            .map(|rows| rows.iter().filter(|g| &g.subject == subject).cloned().collect())
            .unwrap_or_default()
    }

    fn put_group_grant(&mut self, link: &str, grant: GroupGrant) {
        let rows = self.links.entry(link.to_string()).or_default();
        match rows
            .iter_mut()
            .find(|g| g.subject == grant.subject && g.group == grant.group)
        {
            Some(existing) => *existing = grant,
            None => rows.push(grant),
        }
    }

    fn remove_group_grant(&mut self, link: &str, subject: &Value, group: GroupId) -> bool {
        let Some(rows) = self.links.get_mut(link) else {
            return false;
        };
        let before = rows.len();
        rows.retain(|g| !(&g.subject == subject && g.group == group));
        rows.len() != before
    }

    fn module_grants(&self, module: &str) -> Vec<ModuleGrant> {
        self.module_grants
            .iter()
            .filter(|g| g.module == module)
            .cloned()
            .collect()
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        match table {
            tables::MEMBERSHIPS => Ok(self.memberships.iter().map(Membership::to_row).collect()),
            tables::MODULE_GRANTS => Ok(self.module_grants.iter().map(ModuleGrant::to_row).collect()),
            // a link table without grants is simply empty
            link => Ok(self
                .links
                .get(link)
                .map(|rows| rows.iter().map(GroupGrant::to_row).collect())
                .unwrap_or_default()),
        }
    }
}

// ============================================================================
// In-Memory Grant Store
// ============================================================================

/// In-memory grant store for tests and single-process deployments
pub struct MemoryGrantStore {
    data: RwLock<GrantData>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(GrantData::default()),
        }
    }

    /// Create a store from an existing document
    pub fn from_data(data: GrantData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Register an empty link table
    pub fn declare_link(&self, link: &str) {
        self.data.write().unwrap().declare_link(link);
    }

    /// Copy of the current document
    pub fn snapshot(&self) -> GrantData {
        self.data.read().unwrap().clone()
    }
}

impl Default for MemoryGrantStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GrantStore for MemoryGrantStore {
    fn is_member(&self, principal: PrincipalId, group: GroupId) -> Result<bool, StoreError> {
        Ok(self.data.read().unwrap().is_member(principal, group))
    }

    fn groups_of(&self, principal: PrincipalId) -> Result<Vec<GroupId>, StoreError> {
        Ok(self.data.read().unwrap().groups_of(principal))
    }

    fn add_member(&self, membership: Membership) -> Result<(), StoreError> {
        self.data.write().unwrap().memberships.insert(membership);
        Ok(())
    }

    fn remove_member(&self, membership: Membership) -> Result<(), StoreError> {
        self.data.write().unwrap().memberships.remove(&membership);
        Ok(())
    }

    fn group_grants(&self, link: &str, subject: &Value) -> Result<Vec<GroupGrant>, StoreError> {
        Ok(self.data.read().unwrap().group_grants(link, subject))
    }

    fn put_group_grant(&self, link: &str, grant: GroupGrant) -> Result<(), StoreError> {
        self.data.write().unwrap().put_group_grant(link, grant);
        Ok(())
    }

    fn remove_group_grant(
        &self,
        link: &str,
        subject: &Value,
        group: GroupId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .data
            .write()
            .unwrap()
            .remove_group_grant(link, subject, group))
    }

    fn module_grants(&self, module: &str) -> Result<Vec<ModuleGrant>, StoreError> {
        Ok(self.data.read().unwrap().module_grants(module))
    }

    fn put_module_grant(&self, grant: ModuleGrant) -> Result<(), StoreError> {
        self.data.write().unwrap().module_grants.insert(grant);
        Ok(())
    }

    fn remove_module_grant(&self, grant: &ModuleGrant) -> Result<bool, StoreError> {
        Ok(self.data.write().unwrap().module_grants.remove(grant))
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        self.data.read().unwrap().rows(table)
    }
}

impl std::fmt::Debug for MemoryGrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read().unwrap();
        f.debug_struct("MemoryGrantStore")
            .field("memberships", &data.memberships.len())
            .field("links", &data.links.len())
            .field("module_grants", &data.module_grants.len())
            .finish()
    }
}

// ============================================================================
// File-based Grant Store
// ============================================================================

/// File-based grant store
///
/// Keeps the document in memory and rewrites the JSON file after every
/// mutation. Default location: `~/.config/<app>/grants.json`
pub struct FileGrantStore {
    path: PathBuf,
    data: RwLock<GrantData>,
}

impl FileGrantStore {
    /// Open (or lazily create) a store at the specified path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data: GrantData = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            GrantData::default()
        };

        if data.version != STORE_FORMAT_VERSION {
            return Err(StoreError::Version(data.version));
        }

        tracing::debug!(path = %path.display(), "opened grant store");

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Create a store in the default location for an application
    pub fn default_for_app(app_name: &str) -> Result<Self, StoreError> {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        Self::new(config_dir.join(app_name).join("grants.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register an empty link table and persist it
    pub fn declare_link(&self, link: &str) -> Result<(), StoreError> {
        self.mutate(|data| data.declare_link(link))
    }

    /// Apply `f` to a copy, persist it, then publish it
    ///
    /// A failed save leaves both the file and the in-memory document as they
    /// were.
    fn mutate<T>(&self, f: impl FnOnce(&mut GrantData) -> T) -> Result<T, StoreError> {
        let mut data = self.data.write().unwrap();
        let mut next = data.clone();
        let out = f(&mut next);
        self.save(&next)?;
        *data = next;
        Ok(out)
    }

    /// Write to a temporary file next to the target and rename it into place
    fn save(&self, data: &GrantData) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, data)?;
            writer.flush()?;
        }
        file.persist(&self.path).map_err(|e| e.error)?;

        tracing::trace!(path = %self.path.display(), "saved grant store");
        Ok(())
    }
}

impl GrantStore for FileGrantStore {
    fn is_member(&self, principal: PrincipalId, group: GroupId) -> Result<bool, StoreError> {
        Ok(self.data.read().unwrap().is_member(principal, group))
    }

    fn groups_of(&self, principal: PrincipalId) -> Result<Vec<GroupId>, StoreError> {
        Ok(self.data.read().unwrap().groups_of(principal))
    }

    fn add_member(&self, membership: Membership) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.memberships.insert(membership);
        })
    }

    fn remove_member(&self, membership: Membership) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.memberships.remove(&membership);
        })
    }

    fn group_grants(&self, link: &str, subject: &Value) -> Result<Vec<GroupGrant>, StoreError> {
        Ok(self.data.read().unwrap().group_grants(link, subject))
    }

    fn put_group_grant(&self, link: &str, grant: GroupGrant) -> Result<(), StoreError> {
        self.mutate(|data| data.put_group_grant(link, grant))
    }

    fn remove_group_grant(
        &self,
        link: &str,
        subject: &Value,
        group: GroupId,
    ) -> Result<bool, StoreError> {
        self.mutate(|data| data.remove_group_grant(link, subject, group))
    }

    fn module_grants(&self, module: &str) -> Result<Vec<ModuleGrant>, StoreError> {
        Ok(self.data.read().unwrap().module_grants(module))
    }

    fn put_module_grant(&self, grant: ModuleGrant) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.module_grants.insert(grant);
        })
    }

    fn remove_module_grant(&self, grant: &ModuleGrant) -> Result<bool, StoreError> {
        self.mutate(|data| data.module_grants.remove(grant))
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        self.data.read().unwrap().rows(table)
    }
}

impl std::fmt::Debug for FileGrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileGrantStore")
            .field("path", &self.path)
            .finish()
    }
}

// ============================================================================
// Read-Only Grant Store
// ============================================================================

/// Read-only wrapper for any grant store
///
/// For deployments where grants are provisioned out of band and must not
/// change at runtime.
pub struct ReadOnlyGrantStore<S: GrantStore> {
    inner: S,
}

impl<S: GrantStore> ReadOnlyGrantStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: GrantStore> GrantStore for ReadOnlyGrantStore<S> {
    fn is_member(&self, principal: PrincipalId, group: GroupId) -> Result<bool, StoreError> {
        self.inner.is_member(principal, group)
    }

    fn groups_of(&self, principal: PrincipalId) -> Result<Vec<GroupId>, StoreError> {
        self.inner.groups_of(principal)
    }

    fn add_member(&self, _membership: Membership) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn remove_member(&self, _membership: Membership) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn group_grants(&self, link: &str, subject: &Value) -> Result<Vec<GroupGrant>, StoreError> {
        self.inner.group_grants(link, subject)
    }

    fn put_group_grant(&self, _link: &str, _grant: GroupGrant) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn remove_group_grant(
        &self,
        _link: &str,
        _subject: &Value,
        _group: GroupId,
    ) -> Result<bool, StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn module_grants(&self, module: &str) -> Result<Vec<ModuleGrant>, StoreError> {
        self.inner.module_grants(module)
    }

    fn put_module_grant(&self, _grant: ModuleGrant) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn remove_module_grant(&self, _grant: &ModuleGrant) -> Result<bool, StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        self.inner.rows(table)
    }
}

impl<S: GrantStore + std::fmt::Debug> std::fmt::Debug for ReadOnlyGrantStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyGrantStore")
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_api::Kind;

    const LINK: &str = "account_groups";

    #[test]
    fn test_memory_membership() {
        let store = MemoryGrantStore::new();
        let m = Membership::new(PrincipalId(1), GroupId(10));

        store.add_member(m).unwrap();
        assert!(store.is_member(PrincipalId(1), GroupId(10)).unwrap());
        assert_eq!(store.groups_of(PrincipalId(1)).unwrap(), vec![GroupId(10)]);

        store.remove_member(m).unwrap();
        assert!(!store.is_member(PrincipalId(1), GroupId(10)).unwrap());
    }

    #[test]
    fn test_put_group_grant_replaces_pair() {
        let store = MemoryGrantStore::new();
        store
            .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10)))
            .unwrap();
        store
            .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10)).with_write())
            .unwrap();

        let grants = store.group_grants(LINK, &Value::Int(1)).unwrap();
        assert_eq!(grants.len(), 1);
        assert!(grants[0].write);
    }

    #[test]
    fn test_remove_group_grant() {
        let store = MemoryGrantStore::new();
        store
            .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10)))
            .unwrap();

        assert!(store
            .remove_group_grant(LINK, &Value::Int(1), GroupId(10))
            .unwrap());
        assert!(!store
            .remove_group_grant(LINK, &Value::Int(1), GroupId(10))
            .unwrap());
    }

    #[test]
    fn test_rows_by_table() {
        let store = MemoryGrantStore::new();
        store
            .add_member(Membership::new(PrincipalId(1), GroupId(10)))
            .unwrap();
        store
            .put_module_grant(ModuleGrant::new("drive", GroupId(10), Kind::READ))
            .unwrap();

        assert_eq!(store.rows(tables::MEMBERSHIPS).unwrap().len(), 1);
        assert_eq!(store.rows(tables::MODULE_GRANTS).unwrap().len(), 1);
        assert!(store.rows(LINK).unwrap().is_empty());

        store
            .put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10)))
            .unwrap();
        assert_eq!(store.rows(LINK).unwrap().len(), 1);
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.json");

        let store = FileGrantStore::new(&path).unwrap();
        store
            .add_member(Membership::new(PrincipalId(1), GroupId(10)))
            .unwrap();
        store
            .put_group_grant(LINK, GroupGrant::new(3i64, GroupId(10)).with_write())
            .unwrap();

        assert!(path.exists());

        let reopened = FileGrantStore::new(&path).unwrap();
        assert!(reopened.is_member(PrincipalId(1), GroupId(10)).unwrap());
        let grants = reopened.group_grants(LINK, &Value::Int(3)).unwrap();
        assert_eq!(grants.len(), 1);
        assert!(grants[0].write);
    }

    #[test]
    fn test_file_store_leaves_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileGrantStore::new(dir.path().join("grants.json")).unwrap();
        for id in 1..=3 {
            store
                .add_member(Membership::new(PrincipalId(id), GroupId(10)))
                .unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("grants.json")]);
    }

    #[test]
    fn test_failed_save_keeps_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = FileGrantStore::new(blocker.join("grants.json")).unwrap();
        let result = store.add_member(Membership::new(PrincipalId(1), GroupId(10)));

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!store.is_member(PrincipalId(1), GroupId(10)).unwrap());
    }

    #[test]
    fn test_file_store_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.json");
        std::fs::write(&path, r#"{"version": 99}"#).unwrap();

        assert!(matches!(
            FileGrantStore::new(&path),
            Err(StoreError::Version(99))
        ));
    }

    #[test]
    fn test_read_only_store() {
        let inner = MemoryGrantStore::new();
        inner
            .add_member(Membership::new(PrincipalId(1), GroupId(10)))
            .unwrap();

        let store = ReadOnlyGrantStore::new(inner);

        assert!(store.is_member(PrincipalId(1), GroupId(10)).unwrap());
        assert!(matches!(
            store.add_member(Membership::new(PrincipalId(2), GroupId(10))),
            Err(StoreError::ReadOnly)
        ));
        assert!(matches!(
            store.put_group_grant(LINK, GroupGrant::new(1i64, GroupId(10))),
            Err(StoreError::ReadOnly)
        ));
    }
}
