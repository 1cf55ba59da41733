//! Error taxonomy shared by sessions, executors and repository facades.

use crate::db::DbError;
use crate::model::member::MemberValidationError;
use crate::model::team::TeamValidationError;
use crate::query::QueryError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub type RepoResult<T> = Result<T, RepoError>;

/// Domain or storage-level invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Member(MemberValidationError),
    Team(TeamValidationError),
    /// Storage rejected the write, e.g. a dangling team reference.
    Constraint(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Member(err) => write!(f, "{err}"),
            Self::Team(err) => write!(f, "{err}"),
            Self::Constraint(message) => write!(f, "constraint violated: {message}"),
        }
    }
}

impl Error for ValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Member(err) => Some(err),
            Self::Team(err) => Some(err),
            Self::Constraint(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum RepoError {
    /// Method name or query string could not be resolved.
    Descriptor(QueryError),
    /// Call arguments do not match the method's parameters.
    Binding(String),
    NonUnique {
        method: String,
        rows: usize,
    },
    /// Operation is not allowed in the session's current state.
    StateConflict(String),
    Validation(ValidationError),
    /// Another transaction kept the database locked past the timeout.
    LockTimeout(Duration),
    NotFound {
        entity: &'static str,
        id: i64,
    },
    InvalidArgument(String),
    InvalidData(String),
    Db(DbError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Descriptor(err) => write!(f, "{err}"),
            Self::Binding(message) => write!(f, "argument binding failed: {message}"),
            Self::NonUnique { method, rows } => write!(
                f,
                "query of `{method}` expected at most one result but returned {rows}"
            ),
            Self::StateConflict(message) => write!(f, "state conflict: {message}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::LockTimeout(waited) => write!(
                f,
                "lock not granted within {} ms; transaction aborted",
                waited.as_millis()
            ),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Descriptor(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Binding(_)
            | Self::NonUnique { .. }
            | Self::StateConflict(_)
            | Self::LockTimeout(_)
            | Self::NotFound { .. }
            | Self::InvalidArgument(_)
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::Descriptor(value)
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<MemberValidationError> for RepoError {
    fn from(value: MemberValidationError) -> Self {
        Self::Validation(ValidationError::Member(value))
    }
}

impl From<TeamValidationError> for RepoError {
    fn from(value: TeamValidationError) -> Self {
        Self::Validation(ValidationError::Team(value))
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if is_foreign_key_violation(&value) {
            return Self::Validation(ValidationError::Constraint(value.to_string()));
        }
        Self::Db(DbError::Sqlite(value))
    }
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}
