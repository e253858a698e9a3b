//! Audit trail for authorization decisions
//!
//! Every computed decision is recorded with the path that produced it, so
//! bypasses (disabled enforcement, administrator, escape list) can be told
//! apart from ordinary grants and denials.

use rowguard_api::{GroupId, Kind, PrincipalId, Value};
use serde::Serialize;
use std::fmt;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// RFC 3339 timestamp
pub type Timestamp = String;

fn now_rfc3339() -> Timestamp {
    chrono::Utc::now().to_rfc3339()
}

/// Audit event for one authorization step
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: Timestamp,
    pub event_type: AuditEventType,
    /// Entity (table) the event concerns
    pub entity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, entity: impl Into<String>, details: AuditDetails) -> Self {
        Self {
            timestamp: now_rfc3339(),
            event_type,
            entity: entity.into(),
            principal: None,
            kind: None,
            details,
        }
    }

    pub fn with_principal(mut self, principal: PrincipalId) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Enforcement was disabled; the check passed without evaluation
    DisabledBypass,
    /// The principal is an administrator
    AdminBypass,
    /// The subject's escape list allowed the kind
    EscapeListBypass,
    /// The policy granted the kind
    Granted,
    /// The policy denied the kind
    Denied,
    /// A query was narrowed for a regular principal
    Narrowed,
    /// A query was narrowed through the administrator path
    AdminNarrowed,
    /// An edit of the owning group's grant row was refused
    AclProtected,
    /// Enforcement was suspended by an elevation block
    Elevated,
}

/// Details about the audit event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Decision {
        #[serde(skip_serializing_if = "Option::is_none")]
        subject: Option<Value>,
        policy: String,
    },
    Narrow {
        policy: String,
        predicate: String,
    },
    AclProtection {
        subject: Value,
        group: GroupId,
    },
    Elevation,
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    Write(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit sink not available: {0}")]
    Unavailable(String),
}

/// Trait for audit event sinks
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Flush any buffered events
    fn flush(&self) -> Result<(), AuditError>;

    fn is_healthy(&self) -> bool {
        true
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).record(event)
    }

    fn flush(&self) -> Result<(), AuditError> {
        (**self).flush()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Append-only JSON Lines log
///
/// Each event reaches the file as one complete line before `record` returns,
/// so a crash never leaves a half-written decision behind.
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

impl FileAuditSink {
    /// Open `path` for appending, creating it and its directory if needed
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "opened audit log");

        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.writer.lock().unwrap().write_all(&line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.writer.lock().unwrap().flush()?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.path.exists()
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// Ring buffer of the most recent events, for tests and diagnostics
pub struct MemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditSink {
    /// Keeps the latest 1000 events
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1000))),
            capacity,
        }
    }

    /// Retained events, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.matching(|e| e.event_type == event_type)
    }

    pub fn find_by_entity(&self, entity: &str) -> Vec<AuditEvent> {
        self.matching(|e| e.entity == entity)
    }

    pub fn find_by_principal(&self, principal: PrincipalId) -> Vec<AuditEvent> {
        self.matching(|e| e.principal == Some(principal))
    }

    fn matching(&self, pred: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| pred(*e))
            .cloned()
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut events = self.events.lock().unwrap();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Discards all events
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Fans events out to several sinks
///
/// Every sink receives every event even when an earlier one fails; the first
/// failure is returned.
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    fn each(
        &self,
        mut f: impl FnMut(&dyn AuditSink) -> Result<(), AuditError>,
    ) -> Result<(), AuditError> {
        let mut first = None;
        for sink in &self.sinks {
            if let Err(e) = f(sink.as_ref()) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.each(|sink| sink.record(event.clone()))
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.each(|sink| sink.flush())
    }

    fn is_healthy(&self) -> bool {
        self.sinks.iter().all(|s| s.is_healthy())
    }
}

impl fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Event for a decision on one subject
pub fn decision(
    event_type: AuditEventType,
    entity: &str,
    policy: &str,
    subject: Option<Value>,
    principal: Option<PrincipalId>,
    kind: &Kind,
) -> AuditEvent {
    let event = AuditEvent::new(
        event_type,
        entity,
        AuditDetails::Decision {
            subject,
            policy: policy.to_string(),
        },
    )
    .with_kind(kind.clone());

    match principal {
        Some(id) => event.with_principal(id),
        None => event,
    }
}

/// Event for a narrowed listing
pub fn narrowed(
    administrator: bool,
    entity: &str,
    policy: &str,
    principal: PrincipalId,
    kind: &Kind,
    predicate: String,
) -> AuditEvent {
    let event_type = if administrator {
        AuditEventType::AdminNarrowed
    } else {
        AuditEventType::Narrowed
    };
    AuditEvent::new(
        event_type,
        entity,
        AuditDetails::Narrow {
            policy: policy.to_string(),
            predicate,
        },
    )
    .with_principal(principal)
    .with_kind(kind.clone())
}

/// Event for a refused edit of an owning group's grant row
pub fn acl_protected(
    link: &str,
    subject: Value,
    group: GroupId,
    principal: PrincipalId,
    kind: &Kind,
) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::AclProtected,
        link,
        AuditDetails::AclProtection { subject, group },
    )
    .with_principal(principal)
    .with_kind(kind.clone())
}

/// Event for an elevation block
pub fn elevated(principal: Option<PrincipalId>) -> AuditEvent {
    let event = AuditEvent::new(AuditEventType::Elevated, "*", AuditDetails::Elevation);
    match principal {
        Some(id) => event.with_principal(id),
        None => event,
    }
}
