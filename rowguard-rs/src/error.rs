//! Engine error types
//!
//! A `false` decision is not an error. Only conditions that must abort the
//! calling operation are represented here.

use rowguard_api::Kind;
use thiserror::Error;

use crate::store::StoreError;

/// Error type for policy evaluation and query narrowing
#[derive(Debug, Error)]
pub enum AuthError {
    /// Narrowing was requested without a resolvable principal
    #[error("No authenticated principal for query narrowing")]
    NotAuthenticated,

    /// Programmer error in the calling code, e.g. a relation that was not loaded
    #[error("Policy configuration error: {0}")]
    Configuration(String),

    /// A denial translated into a failure by a mutating caller
    #[error("Forbidden: `{kind}` on {entity}")]
    Forbidden { kind: Kind, entity: String },

    /// A narrowed filter was reused to authorize a kind it does not cover
    #[error("Filter on {entity} only authorizes {allowed}; `{kind}` was requested")]
    KindRestricted {
        kind: Kind,
        entity: String,
        allowed: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn relation_not_loaded(entity: &str, relation: &str) -> Self {
        AuthError::Configuration(format!(
            "relation `{}` of {} must be loaded before its policy is checked",
            relation, entity
        ))
    }

    pub fn column_not_selected(entity: &str, column: &str) -> Self {
        AuthError::Configuration(format!(
            "column `{}` of {} must be selected before its policy is checked",
            column, entity
        ))
    }
}
