//! Repository-style persistence for the Team/Member model on SQLite.
//! Query methods are declared once, parsed into plans and memoized.

pub mod db;
pub mod exec;
pub mod logging;
pub mod mapping;
pub mod model;
pub mod page;
pub mod query;
pub mod repo;
pub mod session;

pub use db::{open_db, open_db_in_memory, DbError};
pub use exec::{ArgValue, Args};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::dto::MemberDto;
pub use model::member::{Member, MemberId, MemberKey, MemberValidationError};
pub use model::team::{Team, TeamId, TeamValidationError};
pub use page::{Direction, Page, PageRequest, Slice, Sort};
pub use query::method::{LockMode, MethodDecl, ReturnKind};
pub use query::registry::QueryRegistry;
pub use query::QueryError;
pub use repo::{EntityRepository, MemberRepository, RepoError, RepoResult, TeamRepository};
pub use session::{Session, SessionConfig, SessionStats, TxMode};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
