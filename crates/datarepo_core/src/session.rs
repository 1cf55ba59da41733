//! Unit of work: transaction boundary plus identity cache.
//!
//! # Responsibility
//! - Issue `BEGIN`/`COMMIT`/`ROLLBACK` on one borrowed connection.
//! - Track loaded entities so each identifier maps to one state per
//!   boundary, and stage ordinary updates/deletes until flush.
//!
//! # Invariants
//! - Staged changes are written in ascending `(entity, id)` order.
//! - The cache is emptied whenever a boundary ends.
//! - Outside an explicit boundary every facade call runs in its own.
//! - A session dropped inside a boundary rolls it back.

use crate::logging::sanitize_message;
use crate::mapping::{CachedEntity, Entity, EntityRef};
use crate::query::sql::RenderedSql;
use crate::repo::error::{RepoError, RepoResult};
use log::{debug, error, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

const MAX_LOGGED_SQL_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Clear the identity cache after every bulk mutation.
    pub auto_clear_after_bulk: bool,
    /// How long a statement waits on a lock held by another connection.
    pub lock_timeout: Duration,
    /// Flush staged changes before running a query.
    pub flush_before_query: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_clear_after_bulk: true,
            lock_timeout: crate::db::DEFAULT_BUSY_TIMEOUT,
            flush_before_query: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Deferred boundary; takes the write lock only when it writes.
    Read,
    /// Immediate boundary; holds the database write lock until it ends.
    Write,
}

/// Statement counters for the life of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub statements: usize,
    pub selects: usize,
    pub count_queries: usize,
    pub writes: usize,
    pub flushes: usize,
    pub clears: usize,
}

/// Kind of read statement, for [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadKind {
    Select,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Clean,
    Updated,
    Removed,
}

#[derive(Debug)]
struct CacheEntry {
    state: CachedEntity,
    change: Change,
}

pub struct Session<'conn> {
    conn: &'conn Connection,
    config: SessionConfig,
    id: Uuid,
    tx: Cell<Option<TxMode>>,
    cache: RefCell<BTreeMap<EntityRef, CacheEntry>>,
    stats: Cell<SessionStats>,
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("tx", &self.tx.get())
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

impl<'conn> Session<'conn> {
    /// Opens a session on a migrated connection.
    ///
    /// Applies `config.lock_timeout` as the connection's busy timeout.
    pub fn new(conn: &'conn Connection, config: SessionConfig) -> RepoResult<Self> {
        conn.busy_timeout(config.lock_timeout)?;
        Ok(Self {
            conn,
            config,
            id: Uuid::new_v4(),
            tx: Cell::new(None),
            cache: RefCell::new(BTreeMap::new()),
            stats: Cell::new(SessionStats::default()),
        })
    }

    pub fn with_defaults(conn: &'conn Connection) -> RepoResult<Self> {
        Self::new(conn, SessionConfig::default())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Raw connection for hand-written repository methods.
    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    pub fn tx_mode(&self) -> Option<TxMode> {
        self.tx.get()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.get().is_some()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.get()
    }

    pub fn tracked_count(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Number of staged updates and deletes not yet flushed.
    pub fn pending_count(&self) -> usize {
        self.cache
            .borrow()
            .values()
            .filter(|entry| entry.change != Change::Clean)
            .count()
    }

    pub fn is_tracked<E: Entity>(&self, entity: &E) -> bool {
        entity
            .entity_ref()
            .is_some_and(|key| self.cache.borrow().contains_key(&key))
    }

    /// # Errors
    /// - `StateConflict` when a boundary is already active.
    /// - `LockTimeout` when a write boundary cannot take the lock in time.
    pub fn begin(&self, mode: TxMode) -> RepoResult<()> {
        if let Some(active) = self.tx.get() {
            return Err(RepoError::StateConflict(format!(
                "a {active:?} transaction is already active"
            )));
        }
        let sql = match mode {
            TxMode::Read => "BEGIN DEFERRED",
            TxMode::Write => "BEGIN IMMEDIATE",
        };
        self.conn
            .execute_batch(sql)
            .map_err(|err| self.map_db_error(err))?;
        self.tx.set(Some(mode));
        debug!(
            "event=session_begin module=session status=ok session_id={} mode={:?}",
            self.id, mode
        );
        Ok(())
    }

    /// Flushes staged changes and commits. A failed flush rolls back.
    pub fn commit(&self) -> RepoResult<()> {
        self.require_active("commit")?;
        if let Err(err) = self.flush() {
            self.rollback_quietly();
            return Err(err);
        }
        if let Err(err) = self.conn.execute_batch("COMMIT") {
            let err = self.map_db_error(err);
            self.rollback_quietly();
            return Err(err);
        }
        self.tx.set(None);
        self.discard_cache();
        debug!(
            "event=session_commit module=session status=ok session_id={}",
            self.id
        );
        Ok(())
    }

    /// Discards staged changes and everything written in the boundary.
    pub fn rollback(&self) -> RepoResult<()> {
        self.require_active("rollback")?;
        let result = self.conn.execute_batch("ROLLBACK");
        self.tx.set(None);
        self.discard_cache();
        result.map_err(|err| self.map_db_error(err))?;
        debug!(
            "event=session_rollback module=session status=ok session_id={}",
            self.id
        );
        Ok(())
    }

    /// Runs `f` in a new boundary, committing on `Ok` and rolling back on
    /// `Err`.
    pub fn transaction<T>(
        &self,
        mode: TxMode,
        f: impl FnOnce(&Self) -> RepoResult<T>,
    ) -> RepoResult<T> {
        self.begin(mode)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback_quietly();
                Err(err)
            }
        }
    }

    /// Writes staged updates and deletes; returns the number written.
    pub fn flush(&self) -> RepoResult<usize> {
        let staged: Vec<(EntityRef, Change, CachedEntity)> = self
            .cache
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.change != Change::Clean)
            .map(|(key, entry)| (*key, entry.change, entry.state.clone()))
            .collect();
        if staged.is_empty() {
            return Ok(0);
        }
        self.require_active("flush")?;

        for (key, change, state) in &staged {
            let mapping = state.mapping();
            let id_column = mapping.id_field().column;
            if *change == Change::Removed {
                let sql = format!("DELETE FROM {} WHERE {id_column} = ?", mapping.table);
                self.execute(&sql, &[Value::Integer(key.id)])?;
                self.cache.borrow_mut().remove(key);
                continue;
            }

            let values = state.write_values();
            let assignments = values
                .iter()
                .map(|(column, _)| format!("{column} = ?"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {assignments} WHERE {id_column} = ?",
                mapping.table
            );
            let mut params: Vec<Value> = values.into_iter().map(|(_, value)| value).collect();
            params.push(Value::Integer(key.id));
            self.execute(&sql, &params)?;
            if let Some(entry) = self.cache.borrow_mut().get_mut(key) {
                entry.change = Change::Clean;
            }
        }

        self.bump(|stats| stats.flushes += 1);
        debug!(
            "event=session_flush module=session status=ok session_id={} changes={}",
            self.id,
            staged.len()
        );
        Ok(staged.len())
    }

    /// Detaches every tracked entity. Staged changes are dropped unflushed.
    pub fn clear(&self) {
        let pending = self.pending_count();
        if pending > 0 {
            warn!(
                "event=session_clear module=session status=warn session_id={} dropped_changes={}",
                self.id, pending
            );
        }
        self.discard_cache();
        self.bump(|stats| stats.clears += 1);
        debug!(
            "event=session_clear module=session status=ok session_id={}",
            self.id
        );
    }

    /// Runs `f` inside the active boundary, or inside a fresh boundary of
    /// `mode` that ends with the call.
    pub(crate) fn within_boundary<T>(
        &self,
        mode: TxMode,
        f: impl FnOnce(&Self) -> RepoResult<T>,
    ) -> RepoResult<T> {
        match self.tx.get() {
            Some(TxMode::Read) if mode == TxMode::Write => Err(RepoError::StateConflict(
                "write attempted inside a read-only transaction".to_string(),
            )),
            Some(_) => f(self),
            None => self.transaction(mode, f),
        }
    }

    pub(crate) fn require_write(&self, operation: &str) -> RepoResult<()> {
        if self.tx.get() == Some(TxMode::Write) {
            return Ok(());
        }
        Err(RepoError::StateConflict(format!(
            "{operation} requires an active write transaction"
        )))
    }

    fn require_active(&self, operation: &str) -> RepoResult<()> {
        if self.in_transaction() {
            return Ok(());
        }
        Err(RepoError::StateConflict(format!(
            "{operation} requires an active transaction"
        )))
    }

    /// Runs a read statement, flushing staged changes first when configured.
    pub(crate) fn query_rows<T>(
        &self,
        rendered: &RenderedSql,
        kind: ReadKind,
        mut map: impl FnMut(&Row<'_>) -> RepoResult<T>,
    ) -> RepoResult<Vec<T>> {
        if self.config.flush_before_query {
            self.flush()?;
        }
        debug!(
            "event=query_execute module=session status=start session_id={} kind={:?} sql={}",
            self.id,
            kind,
            sanitize_message(&rendered.sql, MAX_LOGGED_SQL_CHARS)
        );

        let mut stmt = self
            .conn
            .prepare_cached(&rendered.sql)
            .map_err(|err| self.map_db_error(err))?;
        let mut rows = stmt
            .query(params_from_iter(rendered.params.iter()))
            .map_err(|err| self.map_db_error(err))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|err| self.map_db_error(err))? {
            out.push(map(row)?);
        }

        self.bump(|stats| {
            stats.statements += 1;
            match kind {
                ReadKind::Select => stats.selects += 1,
                ReadKind::Count => stats.count_queries += 1,
            }
        });
        Ok(out)
    }

    /// Runs a write statement and returns the affected row count.
    pub(crate) fn execute(&self, sql: &str, params: &[Value]) -> RepoResult<usize> {
        let changed = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(params.iter())))
            .map_err(|err| self.map_db_error(err))?;
        self.bump(|stats| {
            stats.statements += 1;
            stats.writes += 1;
        });
        Ok(changed)
    }

    pub(crate) fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Cached state for `key`, unless it is staged for removal.
    pub(crate) fn lookup<E: Entity>(&self, key: EntityRef) -> Option<E> {
        let cache = self.cache.borrow();
        let entry = cache.get(&key)?;
        if entry.change == Change::Removed {
            return None;
        }
        E::from_cached(&entry.state)
    }

    pub(crate) fn is_removed(&self, key: EntityRef) -> bool {
        self.cache
            .borrow()
            .get(&key)
            .is_some_and(|entry| entry.change == Change::Removed)
    }

    /// Returns the tracked instance for a freshly loaded entity, tracking
    /// `fresh` when the identifier is new to this boundary.
    pub(crate) fn attach<E: Entity>(&self, fresh: E) -> E {
        let Some(key) = fresh.entity_ref() else {
            return fresh;
        };
        let mut cache = self.cache.borrow_mut();
        match cache.get_mut(&key) {
            Some(entry) if entry.change == Change::Removed => fresh,
            Some(entry) => match E::from_cached(&entry.state) {
                Some(mut tracked) => {
                    tracked.absorb_fetched(&fresh);
                    entry.state = tracked.clone().into_cached();
                    tracked
                }
                None => fresh,
            },
            None => {
                cache.insert(
                    key,
                    CacheEntry {
                        state: fresh.clone().into_cached(),
                        change: Change::Clean,
                    },
                );
                fresh
            }
        }
    }

    /// Tracks a just-inserted entity as clean.
    pub(crate) fn track_clean<E: Entity>(&self, entity: &E) {
        self.track(entity, Change::Clean);
    }

    pub(crate) fn stage_update<E: Entity>(&self, entity: &E) {
        self.track(entity, Change::Updated);
    }

    pub(crate) fn stage_remove<E: Entity>(&self, entity: &E) {
        self.track(entity, Change::Removed);
    }

    fn track<E: Entity>(&self, entity: &E, change: Change) {
        if let Some(key) = entity.entity_ref() {
            self.cache.borrow_mut().insert(
                key,
                CacheEntry {
                    state: entity.clone().into_cached(),
                    change,
                },
            );
        }
    }

    fn discard_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    fn rollback_quietly(&self) {
        if let Err(err) = self.rollback() {
            error!(
                "event=session_rollback module=session status=error session_id={} error={}",
                self.id, err
            );
        }
    }

    fn bump(&self, update: impl FnOnce(&mut SessionStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    fn map_db_error(&self, err: rusqlite::Error) -> RepoError {
        let busy = matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        );
        if busy {
            error!(
                "event=lock_timeout module=session status=error session_id={} waited_ms={}",
                self.id,
                self.config.lock_timeout.as_millis()
            );
            return RepoError::LockTimeout(self.config.lock_timeout);
        }
        RepoError::from(err)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.in_transaction() {
            warn!(
                "event=session_rollback module=session status=warn session_id={} reason=dropped_in_transaction",
                self.id
            );
            self.rollback_quietly();
        }
    }
}
