//! Bulk UPDATE/DELETE execution.
//!
//! # Invariants
//! - Runs only inside an explicit write boundary.
//! - Staged changes are flushed before the statement so it sees them.
//! - Tracked entities are not refreshed; the cache is cleared instead unless
//!   clearing is disabled for both the session and the method.

use crate::exec::args::{Args, BoundArgs};
use crate::query::registry::ResolvedMethod;
use crate::query::sql::render_modifying;
use crate::query::QueryError;
use crate::repo::error::{RepoError, RepoResult};
use crate::session::Session;
use log::{info, warn};

/// Executes a modifying method and returns the affected row count.
///
/// # Errors
/// - `StateConflict` outside an explicit write transaction.
/// - `Binding` when `args` do not match the method's parameters.
pub fn execute(session: &Session<'_>, method: &ResolvedMethod, args: &Args) -> RepoResult<usize> {
    if !method.plan.is_modifying() {
        return Err(RepoError::Descriptor(QueryError::UnsupportedReturn {
            method: method.name.clone(),
            message: "method is not an UPDATE or DELETE".to_string(),
        }));
    }
    session.require_write(&format!("bulk mutation `{}`", method.name))?;

    let bound = BoundArgs::bind(&method.plan, &method.name, args)?;
    let rendered = render_modifying(&method.plan, &bound).map_err(RepoError::Binding)?;
    session.flush()?;
    let affected = session.execute(&rendered.sql, &rendered.params)?;

    info!(
        "event=bulk_mutation module=exec status=ok session_id={} method={} affected={}",
        session.id(),
        method.name,
        affected
    );
    if session.config().auto_clear_after_bulk || method.clear_automatically {
        session.clear();
    } else {
        warn!(
            "event=bulk_stale_hazard module=exec status=warn session_id={} method={} tracked={}",
            session.id(),
            method.name,
            session.tracked_count()
        );
    }
    Ok(affected)
}
