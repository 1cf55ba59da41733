//! Query descriptors: method declarations, parsed plans and their cache.
//!
//! # Responsibility
//! - Turn derived method names and declarative query strings into
//!   [`plan::QueryPlan`] values.
//! - Memoize plans per method signature for the process lifetime.
//! - Render plans into parameterized SQL.
//!
//! # Invariants
//! - Every descriptor error surfaces while a registry is built, never later
//!   for declared methods.
//! - Plans are immutable once cached.

pub mod declarative;
pub mod derived;
pub mod method;
pub mod plan;
pub mod registry;
pub mod sql;

use std::error::Error;
use std::fmt::{Display, Formatter};

pub type QueryResult<T> = Result<T, QueryError>;

/// Descriptor resolution errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Method name does not follow `<verb>...By<criteria>`.
    UnknownMethodShape(String),
    /// Method name is not declared on the repository.
    UnknownMethod(String),
    UnknownEntity(String),
    UnknownProperty {
        entity: &'static str,
        property: String,
    },
    UnknownAlias(String),
    Syntax {
        query: String,
        message: String,
    },
    /// Placeholder not listed among the method's parameter names.
    UnknownPlaceholder {
        method: String,
        placeholder: String,
    },
    /// Declared parameter never referenced by the query.
    UnusedParameter {
        method: String,
        parameter: String,
    },
    ArityMismatch {
        method: String,
        expected: usize,
        declared: usize,
    },
    UnsupportedReturn {
        method: String,
        message: String,
    },
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMethodShape(name) => {
                write!(f, "method name `{name}` is not a derivable query")
            }
            Self::UnknownMethod(name) => write!(f, "no query method `{name}` is declared"),
            Self::UnknownEntity(name) => write!(f, "unknown entity `{name}`"),
            Self::UnknownProperty { entity, property } => {
                write!(f, "no property `{property}` found for entity `{entity}`")
            }
            Self::UnknownAlias(alias) => write!(f, "unknown identification variable `{alias}`"),
            Self::Syntax { query, message } => {
                write!(f, "invalid query `{query}`: {message}")
            }
            Self::UnknownPlaceholder {
                method,
                placeholder,
            } => write!(
                f,
                "query of `{method}` references `:{placeholder}` which is not a declared parameter"
            ),
            Self::UnusedParameter { method, parameter } => write!(
                f,
                "parameter `{parameter}` of `{method}` is not referenced by its query"
            ),
            Self::ArityMismatch {
                method,
                expected,
                declared,
            } => write!(
                f,
                "method `{method}` needs {expected} arguments but declares {declared}"
            ),
            Self::UnsupportedReturn { method, message } => {
                write!(f, "method `{method}`: {message}")
            }
        }
    }
}

impl Error for QueryError {}
