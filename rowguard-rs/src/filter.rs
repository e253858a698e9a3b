//! Composable query filter and a reference evaluator
//!
//! A [`Filter`] accumulates clauses the way a criteria builder does: each
//! clause is joined to the previous one with `AND` or `OR`, and the chain is
//! read with SQL precedence (`AND` binds tighter than `OR`). This is why
//! narrowing must snapshot the caller's clauses as one grouped unit before
//! adding its own predicate.

use rowguard_api::{Kind, Predicate, Row};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::AuthError;
use crate::store::{GrantStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conjunction {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    conjunction: Conjunction,
    predicate: Predicate,
}

/// Query filter over one entity table
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    entity: String,
    clauses: Vec<Clause>,
    requested: Kind,
    allowed: Option<BTreeSet<Kind>>,
}

impl Filter {
    /// An empty filter requesting `read` access
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            clauses: Vec::new(),
            requested: Kind::READ,
            allowed: None,
        }
    }

    /// Set the kind the listing is requested for
    pub fn requesting(mut self, kind: Kind) -> Self {
        self.requested = kind;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn requested(&self) -> &Kind {
        &self.requested
    }

    pub fn set_requested(&mut self, kind: Kind) {
        self.requested = kind;
    }

    /// Append a clause joined with `AND`
    pub fn and(&mut self, predicate: Predicate) -> &mut Self {
        self.push(Conjunction::And, predicate)
    }

    /// Append a clause joined with `OR`
    pub fn or(&mut self, predicate: Predicate) -> &mut Self {
        self.push(Conjunction::Or, predicate)
    }

    fn push(&mut self, conjunction: Conjunction, predicate: Predicate) -> &mut Self {
        self.clauses.push(Clause {
            conjunction,
            predicate,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The clause chain as a tree, with `AND` binding tighter than `OR`
    pub fn predicate(&self) -> Option<Predicate> {
        let mut terms: Vec<Predicate> = Vec::new();
        let mut current: Option<Predicate> = None;

        for clause in &self.clauses {
            let predicate = clause.predicate.clone();
            current = Some(match (current.take(), clause.conjunction) {
                (None, _) => predicate,
                (Some(term), Conjunction::And) => term.and(predicate),
                (Some(term), Conjunction::Or) => {
                    terms.push(term);
                    predicate
                }
            });
        }
        terms.extend(current);

        terms.into_iter().reduce(Predicate::or)
    }

    /// Take the current chain as one parenthesized unit and clear the filter
    ///
    /// The requested kind and allowed-kinds marker are kept.
    pub fn snapshot_and_reset(&mut self) -> Option<Predicate> {
        let snapshot = self.predicate().map(Predicate::group);
        self.clauses.clear();
        snapshot
    }

    /// Restrict the kinds this filter may be used to authorize
    ///
    /// Restrictions intersect; they never widen.
    pub fn restrict_kinds(&mut self, kinds: impl IntoIterator<Item = Kind>) -> &mut Self {
        let kinds: BTreeSet<Kind> = kinds.into_iter().collect();
        self.allowed = Some(match self.allowed.take() {
            Some(existing) => existing.intersection(&kinds).cloned().collect(),
            None => kinds,
        });
        self
    }

    /// Kinds this filter was restricted to, if any
    pub fn allowed_kinds(&self) -> Option<&BTreeSet<Kind>> {
        self.allowed.as_ref()
    }

    pub fn permits(&self, kind: &Kind) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(kind))
    }

    /// Fail unless this filter may be used to authorize `kind`
    pub fn ensure_permits(&self, kind: &Kind) -> Result<(), AuthError> {
        if self.permits(kind) {
            return Ok(());
        }
        let allowed = self
            .allowed
            .iter()
            .flatten()
            .map(Kind::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Err(AuthError::KindRestricted {
            kind: kind.clone(),
            entity: self.entity.clone(),
            allowed: format!("[{}]", allowed),
        })
    }

    /// Whether `row` of this filter's entity satisfies every clause
    pub fn matches(&self, row: &Row, tables: &TableSet<'_>) -> Result<bool, StoreError> {
        match self.predicate() {
            Some(predicate) => evaluate(&predicate, row, None, tables),
            None => Ok(true),
        }
    }

    /// Rows of `rows` that satisfy the filter, in order
    pub fn apply(
        &self,
        rows: impl IntoIterator<Item = Row>,
        tables: &TableSet<'_>,
    ) -> Result<Vec<Row>, StoreError> {
        let mut out = Vec::new();
        for row in rows {
            if self.matches(&row, tables)? {
                out.push(row);
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {}", self.entity)?;
        for (i, clause) in self.clauses.iter().enumerate() {
            let joiner = match (i, clause.conjunction) {
                (0, _) => " WHERE",
                (_, Conjunction::And) => " AND",
                (_, Conjunction::Or) => " OR",
            };
            write!(f, "{} {}", joiner, clause.predicate)?;
        }
        Ok(())
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Tables visible to predicate evaluation
///
/// Entity tables registered here take precedence; anything else is read from
/// the grant store.
pub struct TableSet<'a> {
    tables: HashMap<String, Vec<Row>>,
    store: Option<&'a dyn GrantStore>,
}

impl<'a> TableSet<'a> {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            store: None,
        }
    }

    /// Fall back to the grant store for tables not registered here
    pub fn with_store(store: &'a dyn GrantStore) -> Self {
        Self {
            tables: HashMap::new(),
            store: Some(store),
        }
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        if let Some(rows) = self.tables.get(table) {
            return Ok(rows.clone());
        }
        match self.store {
            Some(store) => store.rows(table),
            None => Err(StoreError::UnknownTable(table.to_string())),
        }
    }
}

impl Default for TableSet<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate `predicate` against `row`, with `outer` as the enclosing row
///
/// Comparisons follow SQL: `NULL` and missing columns never compare equal.
pub fn evaluate(
    predicate: &Predicate,
    row: &Row,
    outer: Option<&Row>,
    tables: &TableSet<'_>,
) -> Result<bool, StoreError> {
    let present = |column: &str| row.get(column).filter(|v| !v.is_null());

    Ok(match predicate {
        Predicate::True => true,
        Predicate::False => false,
        Predicate::Eq(column, value) => present(column).is_some_and(|v| v == value),
        Predicate::Ne(column, value) => present(column).is_some_and(|v| v != value),
        Predicate::In(column, values) => present(column).is_some_and(|v| values.contains(v)),
        Predicate::IsNull(column) => present(column).is_none(),
        Predicate::EqOuter(column, outer_column) => {
            let theirs = outer
                .and_then(|o| o.get(outer_column))
                .filter(|v| !v.is_null());
            matches!((present(column), theirs), (Some(a), Some(b)) if a == b)
        }
        Predicate::And(l, r) => {
            evaluate(l, row, outer, tables)? && evaluate(r, row, outer, tables)?
        }
        Predicate::Or(l, r) => {
            evaluate(l, row, outer, tables)? || evaluate(r, row, outer, tables)?
        }
        Predicate::Not(inner) => !evaluate(inner, row, outer, tables)?,
        Predicate::Group(inner) => evaluate(inner, row, outer, tables)?,
        Predicate::Exists { table, predicate } => {
            for candidate in tables.rows(table)? {
                if evaluate(predicate, &candidate, Some(row), tables)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}
