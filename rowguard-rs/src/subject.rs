//! Entities that policies are evaluated against

use rowguard_api::{EscapeList, Kind, Principal, Row, Value};

use crate::context::AuthContext;
use crate::error::AuthError;

/// A subject entity instance a policy can be bound to
pub trait Subject {
    /// Primary key, used for cache binding and grant lookups
    fn key(&self) -> Value;

    /// A loaded column value; `None` when the column was not selected
    fn field(&self, column: &str) -> Option<Value>;

    /// Kinds this instance grants to everyone
    fn escape_list(&self) -> Option<&EscapeList> {
        None
    }
}

/// A subject that can answer for its own policy
///
/// This is the typed capability delegating policies use to reach the policy
/// of a related entity.
pub trait Authorizable: Subject {
    fn authorize(
        &self,
        cx: &AuthContext,
        kind: &Kind,
        principal: Option<&Principal>,
    ) -> Result<bool, AuthError>;
}

/// A loaded row with a designated key column
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    key_column: String,
    row: Row,
    escape: EscapeList,
}

impl Record {
    pub fn new(key_column: impl Into<String>, row: Row) -> Self {
        Self {
            key_column: key_column.into(),
            row,
            escape: EscapeList::new(),
        }
    }

    /// Build a record from column/value pairs, keyed on `id`
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let row = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new("id", row)
    }

    pub fn with_escape_list(mut self, escape: EscapeList) -> Self {
        self.escape = escape;
        self
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn into_row(self) -> Row {
        self.row
    }
}

impl Subject for Record {
    fn key(&self) -> Value {
        self.row.get(&self.key_column).cloned().unwrap_or(Value::Null)
    }

    fn field(&self, column: &str) -> Option<Value> {
        self.row.get(column).cloned()
    }

    fn escape_list(&self) -> Option<&EscapeList> {
        Some(&self.escape)
    }
}
