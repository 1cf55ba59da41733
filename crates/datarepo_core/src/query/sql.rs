//! Plan-to-SQL rendering.
//!
//! # Invariants
//! - Every value reaches SQLite as a bound parameter; nothing user-supplied
//!   is spliced into SQL text.
//! - Criteria render left-associated: `((a AND b) OR c)`.
//! - Windowed selects always end with the root identifier as a tiebreaker.

use crate::query::plan::{
    ArithOp, ColumnRef, Comparator, Direction, Join, JoinKind, Operand, ParamRef, Predicate,
    Projection, QueryPlan, SortOrder, StatementKind,
};
use rusqlite::types::Value;

/// Supplies call arguments while a plan is rendered.
///
/// Errors are binding messages for the caller.
pub trait ParamSource {
    fn scalar(&self, param: &ParamRef) -> Result<Value, String>;
    fn list(&self, param: &ParamRef) -> Result<Vec<Value>, String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

/// LIMIT/OFFSET applied on top of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: u64,
    pub offset: u64,
}

/// Select list for non-entity projections; entity lists depend on the
/// hydrating type and are supplied by the executor.
pub fn projection_columns(plan: &QueryPlan) -> Option<String> {
    match &plan.projection {
        Projection::Entity => None,
        Projection::Scalar(column) => Some(column.to_sql()),
        Projection::Dto { columns, .. } => Some(
            columns
                .iter()
                .map(ColumnRef::to_sql)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Projection::Count if plan.distinct => Some(format!(
            "COUNT(DISTINCT {}.{})",
            plan.root_alias,
            plan.entity.id_field().column
        )),
        Projection::Count => Some("COUNT(*)".to_string()),
    }
}

pub fn render_select(
    plan: &QueryPlan,
    columns: &str,
    extra_order: &[SortOrder],
    window: Option<Window>,
    params: &dyn ParamSource,
) -> Result<RenderedSql, String> {
    let mut out = Renderer::default();
    out.sql.push_str("SELECT ");
    if plan.distinct && plan.projection != Projection::Count {
        out.sql.push_str("DISTINCT ");
    }
    out.sql.push_str(columns);
    out.from(plan);
    out.where_clause(plan, params)?;

    let id_column = plan.entity.id_field().column;
    let tiebreaker = SortOrder {
        column: ColumnRef::new(plan.root_alias.clone(), plan.entity.id_field()),
        direction: Direction::Asc,
    };
    let mut order: Vec<&SortOrder> = plan.order.iter().chain(extra_order).collect();
    if window.is_some()
        && !order
            .iter()
            .any(|o| o.column.alias == plan.root_alias && o.column.field.column == id_column)
    {
        order.push(&tiebreaker);
    }
    if !order.is_empty() {
        let rendered = order
            .iter()
            .map(|o| format!("{} {}", o.column.to_sql(), o.direction.as_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        out.sql.push_str(" ORDER BY ");
        out.sql.push_str(&rendered);
    }

    let limit = match (window, plan.limit) {
        (Some(window), Some(limit)) => Some((window.limit.min(u64::from(limit)), window.offset)),
        (Some(window), None) => Some((window.limit, window.offset)),
        (None, Some(limit)) => Some((u64::from(limit), 0)),
        (None, None) => None,
    };
    if let Some((limit, offset)) = limit {
        out.sql.push_str(" LIMIT ? OFFSET ?");
        out.params.push(Value::Integer(to_i64(limit)));
        out.params.push(Value::Integer(to_i64(offset)));
    }
    Ok(out.finish())
}

pub fn render_exists(plan: &QueryPlan, params: &dyn ParamSource) -> Result<RenderedSql, String> {
    let mut out = Renderer::default();
    out.sql.push_str("SELECT EXISTS(SELECT 1");
    out.from(plan);
    out.where_clause(plan, params)?;
    out.sql.push(')');
    Ok(out.finish())
}

/// Renders UPDATE/DELETE plans; joins and limits were rejected when the
/// method was resolved.
pub fn render_modifying(plan: &QueryPlan, params: &dyn ParamSource) -> Result<RenderedSql, String> {
    let mut out = Renderer::default();
    let table = plan.entity.table;
    let alias = &plan.root_alias;
    match &plan.kind {
        StatementKind::Update(assignments) => {
            out.sql.push_str(&format!("UPDATE {table} AS {alias} SET "));
            for (index, assignment) in assignments.iter().enumerate() {
                if index > 0 {
                    out.sql.push_str(", ");
                }
                out.sql.push_str(assignment.field.column);
                out.sql.push_str(" = ");
                out.operand(&assignment.base, params)?;
                if let Some((op, operand)) = &assignment.op {
                    out.sql.push_str(match op {
                        ArithOp::Add => " + ",
                        ArithOp::Sub => " - ",
                    });
                    out.operand(operand, params)?;
                }
            }
        }
        StatementKind::Delete => out.sql.push_str(&format!("DELETE FROM {table} AS {alias}")),
        StatementKind::Select | StatementKind::Exists => {
            return Err(format!("`{}` is not a bulk statement", plan.signature));
        }
    }
    out.where_clause(plan, params)?;
    Ok(out.finish())
}

#[derive(Default)]
struct Renderer {
    sql: String,
    params: Vec<Value>,
}

impl Renderer {
    fn finish(self) -> RenderedSql {
        RenderedSql {
            sql: self.sql,
            params: self.params,
        }
    }

    fn from(&mut self, plan: &QueryPlan) {
        self.sql.push_str(&format!(
            " FROM {} AS {}",
            plan.entity.table, plan.root_alias
        ));
        for join in &plan.joins {
            self.join(join);
        }
    }

    fn join(&mut self, join: &Join) {
        let target = join.relation.target;
        let keyword = match join.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        self.sql.push_str(&format!(
            " {keyword} {} AS {} ON {}.{} = {}.{}",
            target.table,
            join.alias,
            join.alias,
            target.id_field().column,
            join.from_alias,
            join.relation.join_column
        ));
    }

    fn where_clause(&mut self, plan: &QueryPlan, params: &dyn ParamSource) -> Result<(), String> {
        if plan.criteria.is_empty() {
            return Ok(());
        }
        let mut clause = String::new();
        let mut values = Vec::new();
        for (index, criterion) in plan.criteria.iter().enumerate() {
            let predicate = render_predicate(&criterion.predicate, params, &mut values)?;
            clause = if index == 0 {
                predicate
            } else {
                format!("({clause} {} {predicate})", criterion.connector.as_sql())
            };
        }
        self.sql.push_str(" WHERE ");
        self.sql.push_str(&clause);
        self.params.extend(values);
        Ok(())
    }

    fn operand(&mut self, operand: &Operand, params: &dyn ParamSource) -> Result<(), String> {
        let rendered = render_operand(operand, params, &mut self.params)?;
        self.sql.push_str(&rendered);
        Ok(())
    }
}

fn render_predicate(
    predicate: &Predicate,
    params: &dyn ParamSource,
    values: &mut Vec<Value>,
) -> Result<String, String> {
    let column = if predicate.ignore_case {
        format!("LOWER({})", predicate.column.to_sql())
    } else {
        predicate.column.to_sql()
    };
    let wrap = |operand: String| {
        if predicate.ignore_case {
            format!("LOWER({operand})")
        } else {
            operand
        }
    };

    let sql = match predicate.comparator {
        Comparator::IsNull => format!("{column} IS NULL"),
        Comparator::IsNotNull => format!("{column} IS NOT NULL"),
        Comparator::IsTrue => format!("{column} = 1"),
        Comparator::IsFalse => format!("{column} = 0"),
        Comparator::Between => {
            let low = wrap(render_operand(operand_at(predicate, 0)?, params, values)?);
            let high = wrap(render_operand(operand_at(predicate, 1)?, params, values)?);
            format!("{column} BETWEEN {low} AND {high}")
        }
        Comparator::In | Comparator::NotIn => {
            let items = match operand_at(predicate, 0)? {
                Operand::Param(param) => params.list(param)?,
                Operand::Literal(value) => vec![value.clone()],
                Operand::Column(column) => {
                    return Err(format!("IN needs a list argument, got column `{}`", column.to_sql()))
                }
            };
            let negated = predicate.comparator == Comparator::NotIn;
            if items.is_empty() {
                return Ok(if negated { "1 = 1" } else { "0 = 1" }.to_string());
            }
            let placeholders = vec![wrap("?".to_string()); items.len()].join(", ");
            values.extend(items);
            let keyword = if negated { "NOT IN" } else { "IN" };
            format!("{column} {keyword} ({placeholders})")
        }
        Comparator::StartingWith | Comparator::EndingWith | Comparator::Containing => {
            let value = match operand_at(predicate, 0)? {
                Operand::Param(param) => params.scalar(param)?,
                Operand::Literal(value) => value.clone(),
                Operand::Column(column) => {
                    return Err(format!(
                        "pattern comparisons need a text argument, got column `{}`",
                        column.to_sql()
                    ))
                }
            };
            let Value::Text(text) = value else {
                return Err(format!(
                    "`{}` pattern comparison needs a text argument",
                    predicate.column.field.name
                ));
            };
            let escaped = escape_like(&text);
            let pattern = match predicate.comparator {
                Comparator::StartingWith => format!("{escaped}%"),
                Comparator::EndingWith => format!("%{escaped}"),
                _ => format!("%{escaped}%"),
            };
            values.push(Value::Text(pattern));
            format!("{column} LIKE {} ESCAPE '\\'", wrap("?".to_string()))
        }
        comparator => {
            let operator = match comparator {
                Comparator::Eq => "=",
                Comparator::NotEq => "<>",
                Comparator::Gt => ">",
                Comparator::Ge => ">=",
                Comparator::Lt => "<",
                Comparator::Le => "<=",
                Comparator::Like => "LIKE",
                _ => "NOT LIKE",
            };
            let operand = wrap(render_operand(operand_at(predicate, 0)?, params, values)?);
            format!("{column} {operator} {operand}")
        }
    };
    Ok(sql)
}

fn render_operand(
    operand: &Operand,
    params: &dyn ParamSource,
    values: &mut Vec<Value>,
) -> Result<String, String> {
    match operand {
        Operand::Param(param) => {
            values.push(params.scalar(param)?);
            Ok("?".to_string())
        }
        Operand::Literal(value) => {
            values.push(value.clone());
            Ok("?".to_string())
        }
        Operand::Column(column) => Ok(column.to_sql()),
    }
}

fn operand_at(predicate: &Predicate, index: usize) -> Result<&Operand, String> {
    predicate.operands.get(index).ok_or_else(|| {
        format!(
            "predicate on `{}` is missing operand {index}",
            predicate.column.field.name
        )
    })
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{projection_columns, render_modifying, render_select, ParamSource, Window};
    use crate::mapping::MEMBER;
    use crate::query::declarative::parse_query;
    use crate::query::derived::parse_method_name;
    use crate::query::plan::ParamRef;
    use rusqlite::types::Value;

    struct Fixed(Vec<Value>);

    impl ParamSource for Fixed {
        fn scalar(&self, param: &ParamRef) -> Result<Value, String> {
            match param {
                ParamRef::Positional(index) => Ok(self.0[*index].clone()),
                ParamRef::Named(_) => Ok(self.0[0].clone()),
            }
        }

        fn list(&self, _param: &ParamRef) -> Result<Vec<Value>, String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn conjunctions_render_left_associated() {
        let plan = parse_method_name(&MEMBER, "findByUsernameAndAgeOrAgeLessThan").unwrap();
        let params = Fixed(vec![
            Value::Text("a".to_string()),
            Value::Integer(1),
            Value::Integer(2),
        ]);
        let rendered = render_select(&plan, "m.member_id", &[], None, &params).unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT m.member_id FROM members AS m WHERE ((m.username = ? AND m.age = ?) OR m.age < ?)"
        );
        assert_eq!(rendered.params.len(), 3);
    }

    #[test]
    fn windows_add_tiebreaker_and_bind_limit() {
        let plan = parse_method_name(&MEMBER, "findByAgeOrderByUsernameDesc").unwrap();
        let params = Fixed(vec![Value::Integer(10)]);
        let window = Window {
            limit: 3,
            offset: 6,
        };
        let rendered = render_select(&plan, "m.member_id", &[], Some(window), &params).unwrap();
        assert!(rendered
            .sql
            .ends_with("ORDER BY m.username DESC, m.member_id ASC LIMIT ? OFFSET ?"));
        assert_eq!(
            rendered.params,
            vec![Value::Integer(10), Value::Integer(3), Value::Integer(6)]
        );
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let plan = parse_method_name(&MEMBER, "findByUsernameIn").unwrap();
        let rendered = render_select(&plan, "m.member_id", &[], None, &Fixed(vec![])).unwrap();
        assert!(rendered.sql.ends_with("WHERE 0 = 1"));
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn pattern_comparisons_escape_wildcards() {
        let plan = parse_method_name(&MEMBER, "findByUsernameStartingWith").unwrap();
        let params = Fixed(vec![Value::Text("50%_off".to_string())]);
        let rendered = render_select(&plan, "m.member_id", &[], None, &params).unwrap();
        assert!(rendered.sql.contains("LIKE ? ESCAPE '\\'"));
        assert_eq!(rendered.params, vec![Value::Text("50\\%\\_off%".to_string())]);
    }

    #[test]
    fn bulk_update_uses_table_alias() {
        let plan = parse_query(
            "bulkAgePlus",
            "update Member m set m.age = m.age + 1 where m.age >= :age",
        )
        .unwrap();
        let rendered = render_modifying(&plan, &Fixed(vec![Value::Integer(20)])).unwrap();
        assert_eq!(
            rendered.sql,
            "UPDATE members AS m SET age = m.age + ? WHERE m.age >= ?"
        );
        assert_eq!(rendered.params, vec![Value::Integer(1), Value::Integer(20)]);
    }

    #[test]
    fn distinct_count_counts_root_identifiers() {
        let plan = parse_method_name(&MEMBER, "findDistinctByTeamName").unwrap();
        let count = plan.derive_count();
        assert_eq!(
            projection_columns(&count).unwrap(),
            "COUNT(DISTINCT m.member_id)"
        );
    }
}
