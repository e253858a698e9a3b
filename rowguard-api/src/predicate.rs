use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A column value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(true) => f.write_str("TRUE"),
            Value::Bool(false) => f.write_str("FALSE"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

/// A row keyed by column name
pub type Row = BTreeMap<String, Value>;

/// Predicate tree handed to the query layer
///
/// `EqOuter` and `Exists` express correlated subqueries: inside an `Exists`,
/// the enclosing row is the row being tested by the surrounding predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    True,
    False,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    /// Column of the current row equals a column of the enclosing row
    EqOuter(String, String),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// A parenthesized unit
    Group(Box<Predicate>),
    Exists {
        table: String,
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    pub fn eq_outer(column: impl Into<String>, outer_column: impl Into<String>) -> Self {
        Predicate::EqOuter(column.into(), outer_column.into())
    }

    pub fn exists(table: impl Into<String>, predicate: Predicate) -> Self {
        Predicate::Exists {
            table: table.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn and(self, rhs: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn group(self) -> Self {
        match self {
            Predicate::Group(_) => self,
            other => Predicate::Group(Box::new(other)),
        }
    }

    /// Nesting depth of this tree
    pub fn depth(&self) -> usize {
        match self {
            Predicate::True
            | Predicate::False
            | Predicate::Eq(_, _)
            | Predicate::Ne(_, _)
            | Predicate::In(_, _)
            | Predicate::IsNull(_)
            | Predicate::EqOuter(_, _) => 1,
            Predicate::Not(inner) | Predicate::Group(inner) => 1 + inner.depth(),
            Predicate::Exists { predicate, .. } => 1 + predicate.depth(),
            Predicate::And(l, r) | Predicate::Or(l, r) => 1 + l.depth().max(r.depth()),
        }
    }
}

/// SQL-flavoured rendering used for logs and audit records.
///
/// `And`/`Or` are rendered without parentheses, as a criteria builder would
/// concatenate them; only `Group` introduces parentheses.
impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("1 = 1"),
            Predicate::False => f.write_str("1 = 0"),
            Predicate::Eq(c, v) => write!(f, "{} = {}", c, v),
            Predicate::Ne(c, v) => write!(f, "{} <> {}", c, v),
            Predicate::In(c, vs) => {
                write!(f, "{} IN (", c)?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str(")")
            }
            Predicate::IsNull(c) => write!(f, "{} IS NULL", c),
            Predicate::EqOuter(c, o) => write!(f, "{} = outer.{}", c, o),
            Predicate::And(l, r) => write!(f, "{} AND {}", l, r),
            Predicate::Or(l, r) => write!(f, "{} OR {}", l, r),
            Predicate::Not(inner) => match inner.as_ref() {
                Predicate::And(_, _) | Predicate::Or(_, _) => write!(f, "NOT ({})", inner),
                _ => write!(f, "NOT {}", inner),
            },
            Predicate::Group(inner) => write!(f, "({})", inner),
            Predicate::Exists { table, predicate } => {
                write!(f, "EXISTS (SELECT 1 FROM {} WHERE {})", table, predicate)
            }
        }
    }
}
