//! Plan execution for select-shaped methods.
//!
//! # Responsibility
//! - Bind call arguments, render SQL and hydrate rows for every result
//!   shape: entities, scalars, DTOs, counts, pages and slices.
//! - Route entity results through the session's identity cache.
//!
//! # Invariants
//! - Each call runs inside the caller's boundary or its own read boundary.
//! - Fetch joins only add columns; they never change which roots match.
//! - Read-only results are never registered in the identity cache.

use crate::exec::args::{Args, BoundArgs};
use crate::mapping::{Entity, EntityMapping};
use crate::model::dto::Projected;
use crate::page::{Page, PageRequest, Slice, Sort};
use crate::query::plan::{ColumnRef, Projection, QueryPlan, SortOrder, StatementKind};
use crate::query::registry::ResolvedMethod;
use crate::query::sql::{projection_columns, render_exists, render_select, RenderedSql, Window};
use crate::query::QueryError;
use crate::repo::error::{RepoError, RepoResult};
use crate::session::{ReadKind, Session, TxMode};
use rusqlite::types::FromSql;
use rusqlite::Row;

/// Ordered entity list; empty when nothing matches.
pub fn list<E: Entity>(
    session: &Session<'_>,
    method: &ResolvedMethod,
    args: &Args,
) -> RepoResult<Vec<E>> {
    fetch_entities(session, method, args, &[], None)
}

/// Entity list with request-time ordering appended to the plan's own.
pub fn list_sorted<E: Entity>(
    session: &Session<'_>,
    method: &ResolvedMethod,
    args: &Args,
    sort: &Sort,
) -> RepoResult<Vec<E>> {
    let order = resolve_sort(method.plan.entity, &method.plan.root_alias, sort)?;
    fetch_entities(session, method, args, &order, None)
}

/// Zero or one entity.
///
/// # Errors
/// - `NonUnique` when more than one row matches.
pub fn single<E: Entity>(
    session: &Session<'_>,
    method: &ResolvedMethod,
    args: &Args,
) -> RepoResult<Option<E>> {
    let mut rows = fetch_entities::<E>(session, method, args, &[], None)?;
    if rows.len() > 1 {
        return Err(RepoError::NonUnique {
            method: method.name.clone(),
            rows: rows.len(),
        });
    }
    Ok(rows.pop())
}

/// Values of a single-column projection.
pub fn scalars<T: FromSql>(
    session: &Session<'_>,
    method: &ResolvedMethod,
    args: &Args,
) -> RepoResult<Vec<T>> {
    if !matches!(method.plan.projection, Projection::Scalar(_)) {
        return Err(unsupported(method, "method does not select a single property"));
    }
    let rendered = render_projection(method, args)?;
    session.within_boundary(TxMode::Read, |s| {
        s.query_rows(&rendered, ReadKind::Select, |row| Ok(row.get(0)?))
    })
}

/// Records built by a constructor-expression query.
pub fn dtos<D: Projected>(
    session: &Session<'_>,
    method: &ResolvedMethod,
    args: &Args,
) -> RepoResult<Vec<D>> {
    match &method.plan.projection {
        Projection::Dto { type_name, columns }
            if type_name == D::TYPE_NAME && columns.len() == D::ARITY => {}
        Projection::Dto { type_name, columns } => {
            return Err(unsupported(
                method,
                &format!(
                    "query constructs {type_name} with {} arguments, expected {} with {}",
                    columns.len(),
                    D::TYPE_NAME,
                    D::ARITY
                ),
            ))
        }
        _ => return Err(unsupported(method, "method has no constructor projection")),
    }
    let rendered = render_projection(method, args)?;
    session.within_boundary(TxMode::Read, |s| {
        s.query_rows(&rendered, ReadKind::Select, D::from_row)
    })
}

pub fn count(session: &Session<'_>, method: &ResolvedMethod, args: &Args) -> RepoResult<u64> {
    if method.plan.projection != Projection::Count {
        return Err(unsupported(method, "method is not a count query"));
    }
    let bound = BoundArgs::bind(&method.plan, &method.name, args)?;
    session.within_boundary(TxMode::Read, |s| run_count(s, &method.plan, &bound))
}

pub fn exists(session: &Session<'_>, method: &ResolvedMethod, args: &Args) -> RepoResult<bool> {
    if method.plan.kind != StatementKind::Exists {
        return Err(unsupported(method, "method is not an exists query"));
    }
    let bound = BoundArgs::bind(&method.plan, &method.name, args)?;
    let rendered = render_exists(&method.plan, &bound).map_err(RepoError::Binding)?;
    session.within_boundary(TxMode::Read, |s| {
        let rows = s.query_rows(&rendered, ReadKind::Select, |row| Ok(row.get::<_, bool>(0)?))?;
        Ok(rows.first().copied().unwrap_or(false))
    })
}

/// Counted page: one content query plus one count query.
pub fn page<E: Entity>(
    session: &Session<'_>,
    method: &ResolvedMethod,
    args: &Args,
    request: &PageRequest,
) -> RepoResult<Page<E>> {
    check_windowed(method)?;
    let count_plan = method
        .count_plan
        .as_ref()
        .ok_or_else(|| unsupported(method, "method has no count query"))?;
    let order = resolve_sort(method.plan.entity, &method.plan.root_alias, request.sort())?;
    let window = Window {
        limit: request.page_size() as u64,
        offset: request.offset(),
    };
    let count_args = BoundArgs::bind_subset(count_plan, &method.name, args)?;

    session.within_boundary(TxMode::Read, |s| {
        let content = fetch_entities(s, method, args, &order, Some(window))?;
        let total = run_count(s, count_plan, &count_args)?;
        Ok(Page::new(content, request, total))
    })
}

/// Uncounted slice: fetches one probe row past the window.
pub fn slice<E: Entity>(
    session: &Session<'_>,
    method: &ResolvedMethod,
    args: &Args,
    request: &PageRequest,
) -> RepoResult<Slice<E>> {
    check_windowed(method)?;
    let order = resolve_sort(method.plan.entity, &method.plan.root_alias, request.sort())?;
    let window = Window {
        limit: request.page_size() as u64 + 1,
        offset: request.offset(),
    };
    let content = fetch_entities(session, method, args, &order, Some(window))?;
    Ok(Slice::from_overfetch(content, request))
}

fn fetch_entities<E: Entity>(
    session: &Session<'_>,
    method: &ResolvedMethod,
    args: &Args,
    extra_order: &[SortOrder],
    window: Option<Window>,
) -> RepoResult<Vec<E>> {
    let plan = &method.plan;
    if !std::ptr::eq(plan.entity, E::mapping()) {
        return Err(unsupported(
            method,
            &format!("query returns {}, not {}", plan.entity.entity, E::mapping().entity),
        ));
    }
    if plan.projection != Projection::Entity || plan.kind != StatementKind::Select {
        return Err(unsupported(method, "method does not return entities"));
    }
    if method.hints.lock.is_some() {
        session.require_write(&format!("locking query `{}`", method.name))?;
    }

    let fetched: Vec<&'static str> = plan.fetch_joins().map(|join| join.relation.name).collect();
    let mut columns = E::select_list(&plan.root_alias);
    for join in plan.fetch_joins() {
        let list = E::fetch_select_list(join.relation.name, &join.alias).ok_or_else(|| {
            unsupported(
                method,
                &format!("relation `{}` cannot be fetched", join.relation.name),
            )
        })?;
        columns.push_str(", ");
        columns.push_str(&list);
    }

    let bound = BoundArgs::bind(plan, &method.name, args)?;
    let rendered =
        render_select(plan, &columns, extra_order, window, &bound).map_err(RepoError::Binding)?;
    let read_only = method.hints.read_only;

    session.within_boundary(TxMode::Read, |s| {
        let rows = s.query_rows(&rendered, ReadKind::Select, |row| hydrate::<E>(row, &fetched))?;
        Ok(rows
            .into_iter()
            .map(|fresh| {
                if read_only {
                    fresh
                        .entity_ref()
                        .and_then(|key| s.lookup(key))
                        .unwrap_or(fresh)
                } else {
                    s.attach(fresh)
                }
            })
            .collect())
    })
}

fn hydrate<E: Entity>(row: &Row<'_>, fetched: &[&'static str]) -> RepoResult<E> {
    let mut entity = E::from_row(row, 0)?;
    let mut offset = E::column_count();
    for relation in fetched {
        entity.attach_fetched(relation, row, offset)?;
        offset += E::fetched_column_count(relation);
    }
    Ok(entity)
}

fn run_count(session: &Session<'_>, plan: &QueryPlan, args: &BoundArgs<'_>) -> RepoResult<u64> {
    let columns = projection_columns(plan).unwrap_or_else(|| "COUNT(*)".to_string());
    let rendered = render_select(plan, &columns, &[], None, args).map_err(RepoError::Binding)?;
    let rows = session.query_rows(&rendered, ReadKind::Count, |row| Ok(row.get::<_, i64>(0)?))?;
    let total = rows.first().copied().unwrap_or(0);
    u64::try_from(total)
        .map_err(|_| RepoError::InvalidData(format!("negative count `{total}` returned")))
}

fn render_projection(method: &ResolvedMethod, args: &Args) -> RepoResult<RenderedSql> {
    let bound = BoundArgs::bind(&method.plan, &method.name, args)?;
    let columns = projection_columns(&method.plan)
        .ok_or_else(|| unsupported(method, "entity projections need an entity type"))?;
    render_select(&method.plan, &columns, &[], None, &bound).map_err(RepoError::Binding)
}

fn check_windowed(method: &ResolvedMethod) -> RepoResult<()> {
    if method.plan.limit.is_some() {
        return Err(unsupported(
            method,
            "paged execution cannot be combined with a Top/First limit",
        ));
    }
    Ok(())
}

/// Resolves request sort properties against the root entity's fields.
pub(crate) fn resolve_sort(
    entity: &'static EntityMapping,
    root_alias: &str,
    sort: &Sort,
) -> RepoResult<Vec<SortOrder>> {
    sort.orders()
        .iter()
        .map(|order| -> RepoResult<SortOrder> {
            let field = entity
                .field(&order.property)
                .ok_or_else(|| QueryError::UnknownProperty {
                    entity: entity.entity,
                    property: order.property.clone(),
                })?;
            Ok(SortOrder {
                column: ColumnRef::new(root_alias, field),
                direction: order.direction,
            })
        })
        .collect()
}

fn unsupported(method: &ResolvedMethod, message: &str) -> RepoError {
    RepoError::Descriptor(QueryError::UnsupportedReturn {
        method: method.name.clone(),
        message: message.to_string(),
    })
}
