//! Generic CRUD and query-method facade over one entity type.
//!
//! # Responsibility
//! - Upsert, load and delete entities through the session's unit of work.
//! - Dispatch named query methods to the executor or the bulk engine.
//!
//! # Invariants
//! - `save` validates before anything is written.
//! - An unset identifier always means insert; a set identifier means
//!   update when the row exists, otherwise insert with that identifier.
//! - Reusing an identifier for a different natural key is rejected.

use crate::exec::args::Args;
use crate::exec::{bulk, executor};
use crate::mapping::{Entity, EntityRef};
use crate::model::dto::Projected;
use crate::page::{Direction, Page, PageRequest, Slice, Sort};
use crate::query::registry::{QueryRegistry, ResolvedMethod};
use crate::query::sql::RenderedSql;
use crate::repo::error::{RepoError, RepoResult};
use crate::session::{ReadKind, Session, TxMode};
use rusqlite::types::{FromSql, Value};
use std::marker::PhantomData;
use std::sync::Arc;

const ROOT_ALIAS: &str = "e";

pub struct EntityRepository<'s, 'conn, E: Entity> {
    session: &'s Session<'conn>,
    registry: &'s QueryRegistry,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, 'conn, E: Entity> std::fmt::Debug for EntityRepository<'s, 'conn, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRepository")
            .field("entity", &E::mapping().entity)
            .finish_non_exhaustive()
    }
}

impl<'s, 'conn, E: Entity> EntityRepository<'s, 'conn, E> {
    /// # Errors
    /// - `InvalidArgument` when `registry` was built for another entity.
    pub fn new(session: &'s Session<'conn>, registry: &'s QueryRegistry) -> RepoResult<Self> {
        if !std::ptr::eq(registry.entity(), E::mapping()) {
            return Err(RepoError::InvalidArgument(format!(
                "registry for {} cannot serve {}",
                registry.entity().entity,
                E::mapping().entity
            )));
        }
        Ok(Self {
            session,
            registry,
            _entity: PhantomData,
        })
    }

    pub fn session(&self) -> &'s Session<'conn> {
        self.session
    }

    pub fn registry(&self) -> &'s QueryRegistry {
        self.registry
    }

    /// Resolved plan for a declared or derivable method name.
    pub fn method(&self, name: &str) -> RepoResult<Arc<ResolvedMethod>> {
        Ok(self.registry.method(name)?)
    }

    /// Inserts or updates `entity`, assigning its identifier on insert.
    ///
    /// Updates are staged and written at flush; inserts run immediately so
    /// the generated identifier is known on return.
    pub fn save(&self, entity: &mut E) -> RepoResult<()> {
        entity.validate()?;
        self.session
            .within_boundary(TxMode::Write, |s| Self::upsert(s, entity))
    }

    /// Saves every entity in one boundary.
    pub fn save_all(&self, entities: &mut [E]) -> RepoResult<()> {
        for entity in entities.iter() {
            entity.validate()?;
        }
        self.session.within_boundary(TxMode::Write, |s| {
            entities
                .iter_mut()
                .try_for_each(|entity| Self::upsert(s, entity))
        })
    }

    pub fn find_by_id(&self, id: i64) -> RepoResult<Option<E>> {
        let key = entity_ref::<E>(id);
        self.session.within_boundary(TxMode::Read, |s| {
            if let Some(tracked) = s.lookup::<E>(key) {
                return Ok(Some(tracked));
            }
            if s.is_removed(key) {
                return Ok(None);
            }

            let mapping = E::mapping();
            let rendered = RenderedSql {
                sql: format!(
                    "SELECT {} FROM {} AS {ROOT_ALIAS} WHERE {ROOT_ALIAS}.{} = ?",
                    E::select_list(ROOT_ALIAS),
                    mapping.table,
                    mapping.id_field().column
                ),
                params: vec![Value::Integer(id)],
            };
            let mut rows = s.query_rows(&rendered, ReadKind::Select, |row| E::from_row(row, 0))?;
            Ok(rows.pop().map(|fresh| s.attach(fresh)))
        })
    }

    pub fn exists_by_id(&self, id: i64) -> RepoResult<bool> {
        Ok(self.find_by_id(id)?.is_some())
    }

    /// Every entity in identifier order.
    pub fn find_all(&self) -> RepoResult<Vec<E>> {
        executor::list_sorted(
            self.session,
            &*self.method("findAll")?,
            &Args::None,
            &Sort::by(Direction::Asc, ["id"]),
        )
    }

    pub fn find_all_sorted(&self, sort: &Sort) -> RepoResult<Vec<E>> {
        executor::list_sorted(self.session, &*self.method("findAll")?, &Args::None, sort)
    }

    pub fn find_all_page(&self, request: &PageRequest) -> RepoResult<Page<E>> {
        executor::page(self.session, &*self.method("findAll")?, &Args::None, request)
    }

    pub fn count(&self) -> RepoResult<u64> {
        executor::count(self.session, &*self.method("count")?, &Args::None)
    }

    /// Stages removal of `entity`; the row is deleted at flush.
    pub fn delete(&self, entity: &E) -> RepoResult<()> {
        if entity.id().is_none() {
            return Err(RepoError::InvalidArgument(format!(
                "cannot delete an unsaved {}",
                E::mapping().entity
            )));
        }
        self.session.within_boundary(TxMode::Write, |s| {
            s.stage_remove(entity);
            Ok(())
        })
    }

    /// # Errors
    /// - `NotFound` when no entity has `id`.
    pub fn delete_by_id(&self, id: i64) -> RepoResult<()> {
        self.session.within_boundary(TxMode::Write, |s| {
            let entity = self.find_by_id(id)?.ok_or(RepoError::NotFound {
                entity: E::mapping().entity,
                id,
            })?;
            s.stage_remove(&entity);
            Ok(())
        })
    }

    /// Stages removal of every entity; returns how many were staged.
    pub fn delete_all(&self) -> RepoResult<usize> {
        self.session.within_boundary(TxMode::Write, |s| {
            let all = self.find_all()?;
            for entity in &all {
                s.stage_remove(entity);
            }
            Ok(all.len())
        })
    }

    pub fn query_list(&self, method: &str, args: &Args) -> RepoResult<Vec<E>> {
        executor::list(self.session, &*self.method(method)?, args)
    }

    pub fn query_single(&self, method: &str, args: &Args) -> RepoResult<Option<E>> {
        executor::single(self.session, &*self.method(method)?, args)
    }

    pub fn query_page(
        &self,
        method: &str,
        args: &Args,
        request: &PageRequest,
    ) -> RepoResult<Page<E>> {
        executor::page(self.session, &*self.method(method)?, args, request)
    }

    pub fn query_slice(
        &self,
        method: &str,
        args: &Args,
        request: &PageRequest,
    ) -> RepoResult<Slice<E>> {
        executor::slice(self.session, &*self.method(method)?, args, request)
    }

    pub fn query_count(&self, method: &str, args: &Args) -> RepoResult<u64> {
        executor::count(self.session, &*self.method(method)?, args)
    }

    pub fn query_exists(&self, method: &str, args: &Args) -> RepoResult<bool> {
        executor::exists(self.session, &*self.method(method)?, args)
    }

    pub fn query_scalars<T: FromSql>(&self, method: &str, args: &Args) -> RepoResult<Vec<T>> {
        executor::scalars(self.session, &*self.method(method)?, args)
    }

    pub fn query_dtos<D: Projected>(&self, method: &str, args: &Args) -> RepoResult<Vec<D>> {
        executor::dtos(self.session, &*self.method(method)?, args)
    }

    /// Runs a bulk UPDATE/DELETE method; returns the affected row count.
    pub fn execute_modifying(&self, method: &str, args: &Args) -> RepoResult<usize> {
        bulk::execute(self.session, &*self.method(method)?, args)
    }

    fn upsert(session: &Session<'_>, entity: &mut E) -> RepoResult<()> {
        let Some(id) = entity.id() else {
            return Self::insert(session, entity);
        };

        let key = entity_ref::<E>(id);
        if session.is_removed(key) {
            return Err(RepoError::StateConflict(format!(
                "{} {id} is scheduled for removal",
                E::mapping().entity
            )));
        }
        if let Some(tracked) = session.lookup::<E>(key) {
            check_natural_key(&tracked.natural_key(), entity, id)?;
            session.stage_update(entity);
            return Ok(());
        }

        let mapping = E::mapping();
        let probe_column = entity
            .natural_key()
            .map_or(mapping.id_field().column, |(column, _)| column);
        let rendered = RenderedSql {
            sql: format!(
                "SELECT {probe_column} FROM {} WHERE {} = ?",
                mapping.table,
                mapping.id_field().column
            ),
            params: vec![Value::Integer(id)],
        };
        let stored = session.query_rows(&rendered, ReadKind::Select, |row| {
            Ok(row.get::<_, Value>(0)?)
        })?;
        match stored.into_iter().next() {
            Some(value) => {
                let stored_key = entity.natural_key().map(|(column, _)| (column, value));
                check_natural_key(&stored_key, entity, id)?;
                session.stage_update(entity);
                Ok(())
            }
            None => Self::insert(session, entity),
        }
    }

    fn insert(session: &Session<'_>, entity: &mut E) -> RepoResult<()> {
        let mapping = E::mapping();
        let mut columns = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = entity.id() {
            columns.push(mapping.id_field().column);
            values.push(Value::Integer(id));
        }
        for (column, value) in entity.write_values() {
            columns.push(column);
            values.push(value);
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            mapping.table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        session.execute(&sql, &values)?;
        if entity.id().is_none() {
            entity.assign_id(session.last_insert_rowid());
        }
        session.track_clean(entity);
        Ok(())
    }
}

fn entity_ref<E: Entity>(id: i64) -> EntityRef {
    EntityRef {
        entity: E::mapping().entity,
        id,
    }
}

fn check_natural_key<E: Entity>(
    known: &Option<(&'static str, Value)>,
    entity: &E,
    id: i64,
) -> RepoResult<()> {
    match (known, entity.natural_key()) {
        (Some((column, known)), Some((_, incoming))) if *known != incoming => {
            Err(RepoError::StateConflict(format!(
                "{} {id} already exists with a different {column}",
                E::mapping().entity
            )))
        }
        _ => Ok(()),
    }
}
