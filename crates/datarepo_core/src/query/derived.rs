//! Query derivation from repository method names.
//!
//! # Responsibility
//! - Parse `<verb>[subject]By<criteria>[OrderBy...]` names into plans.
//! - Resolve every property against the entity mapping up front.
//!
//! # Invariants
//! - Conjunctions apply left to right; there is no precedence grouping.
//! - Arguments bind positionally in segment order.

use crate::mapping::{EntityMapping, FieldMapping};
use crate::query::plan::{
    Binding, ColumnRef, Comparator, Connector, Criterion, Direction, Operand, ParamRef, PlanSource,
    Predicate, Projection, QueryPlan, SortOrder, StatementKind,
};
use crate::query::{QueryError, QueryResult};
use once_cell::sync::Lazy;
use regex::Regex;

static METHOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(find|read|get|query|search|stream|count|exists|delete|remove)([A-Za-z0-9]*?)(?:By([A-Z][A-Za-z0-9]*)?)?$",
    )
    .expect("valid method name regex")
});
static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Top|First)(\d*)").expect("valid limit regex"));
static ORDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z][A-Za-z0-9]*?)(Asc|Desc)").expect("valid order regex"));

/// Comparator suffixes, longest first so `GreaterThanEqual` wins over
/// `GreaterThan` and `NotLike` over `Like`.
const SUFFIXES: &[(&str, Comparator)] = &[
    ("GreaterThanEqual", Comparator::Ge),
    ("LessThanEqual", Comparator::Le),
    ("StartingWith", Comparator::StartingWith),
    ("GreaterThan", Comparator::Gt),
    ("EndingWith", Comparator::EndingWith),
    ("Containing", Comparator::Containing),
    ("IsNotNull", Comparator::IsNotNull),
    ("LessThan", Comparator::Lt),
    ("NotNull", Comparator::IsNotNull),
    ("IsFalse", Comparator::IsFalse),
    ("Between", Comparator::Between),
    ("NotLike", Comparator::NotLike),
    ("IsNull", Comparator::IsNull),
    ("IsTrue", Comparator::IsTrue),
    ("Equals", Comparator::Eq),
    ("Before", Comparator::Lt),
    ("After", Comparator::Gt),
    ("False", Comparator::IsFalse),
    ("NotIn", Comparator::NotIn),
    ("Null", Comparator::IsNull),
    ("Like", Comparator::Like),
    ("True", Comparator::IsTrue),
    ("Not", Comparator::NotEq),
    ("In", Comparator::In),
    ("Is", Comparator::Eq),
];

const IGNORE_CASE_SUFFIXES: &[&str] = &["IgnoringCase", "IgnoreCase"];

/// Parses a derived method name into a plan over `entity`.
pub fn parse_method_name(entity: &'static EntityMapping, name: &str) -> QueryResult<QueryPlan> {
    let captures = METHOD_RE
        .captures(name)
        .ok_or_else(|| QueryError::UnknownMethodShape(name.to_string()))?;
    let verb = &captures[1];
    let subject = captures.get(2).map_or("", |m| m.as_str());
    let tail = captures.get(3).map_or("", |m| m.as_str());

    let root_alias = entity.entity[..1].to_ascii_lowercase();
    let mut plan = QueryPlan::new(name, PlanSource::Derived, entity, root_alias);
    match verb {
        "count" => plan.projection = Projection::Count,
        "exists" => plan.kind = StatementKind::Exists,
        "delete" | "remove" => plan.kind = StatementKind::Delete,
        _ => {}
    }

    plan.distinct = subject.contains("Distinct");
    if let Some(limit) = LIMIT_RE.captures(subject) {
        let digits = limit.get(1).map_or("", |m| m.as_str());
        plan.limit = Some(if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|_| QueryError::UnknownMethodShape(name.to_string()))?
        });
    }

    let (criteria, ordering) = split_order_by(tail);
    let mut arity = 0;
    for (connector, segment) in split_conjunctions(criteria) {
        let predicate = parse_segment(&mut plan, segment, &mut arity)?;
        plan.criteria.push(Criterion {
            connector,
            predicate,
        });
    }
    if let Some(ordering) = ordering {
        plan.order = parse_ordering(&mut plan, ordering)?;
    }
    plan.binding = Binding::Positional { arity };
    Ok(plan)
}

fn split_order_by(tail: &str) -> (&str, Option<&str>) {
    match find_keyword(tail, "OrderBy") {
        Some(index) => (&tail[..index], Some(&tail[index + "OrderBy".len()..])),
        None => (tail, None),
    }
}

/// Splits on `And`/`Or` when the keyword starts a new capitalized word.
fn split_conjunctions(criteria: &str) -> Vec<(Connector, &str)> {
    let mut parts = Vec::new();
    if criteria.is_empty() {
        return parts;
    }

    let bytes = criteria.as_bytes();
    let mut connector = Connector::And;
    let mut start = 0;
    let mut index = 1;
    while index < bytes.len() {
        let matched = [("And", Connector::And), ("Or", Connector::Or)]
            .into_iter()
            .find(|(keyword, _)| starts_word(criteria, index, keyword));
        if let Some((keyword, next)) = matched {
            parts.push((connector, &criteria[start..index]));
            connector = next;
            start = index + keyword.len();
            index = start + 1;
        } else {
            index += 1;
        }
    }
    parts.push((connector, &criteria[start..]));
    parts
}

fn starts_word(text: &str, index: usize, keyword: &str) -> bool {
    text[index..].starts_with(keyword)
        && text[index + keyword.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
}

fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    text.match_indices(keyword)
        .map(|(index, _)| index)
        .find(|index| starts_word(text, *index, keyword))
}

fn parse_segment(
    plan: &mut QueryPlan,
    segment: &str,
    arity: &mut usize,
) -> QueryResult<Predicate> {
    if segment.is_empty() {
        return Err(QueryError::UnknownMethodShape(plan.signature.clone()));
    }

    let (segment, ignore_case) = IGNORE_CASE_SUFFIXES
        .iter()
        .find_map(|suffix| {
            segment
                .strip_suffix(suffix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest, true))
        })
        .unwrap_or((segment, false));

    // A suffix only counts when what precedes it is a real property, so a
    // field such as `loggedIn` is not read as `logged` + `In`.
    let candidates = SUFFIXES
        .iter()
        .filter_map(|(suffix, comparator)| {
            segment
                .strip_suffix(suffix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest, *comparator))
        })
        .chain(std::iter::once((segment, Comparator::Eq)));

    for (property, comparator) in candidates {
        if let Some(column) = resolve_property(plan, property) {
            let operands = (0..comparator.arity())
                .map(|offset| Operand::Param(ParamRef::Positional(*arity + offset)))
                .collect();
            *arity += comparator.arity();
            return Ok(Predicate {
                column,
                comparator,
                operands,
                ignore_case,
            });
        }
    }

    Err(QueryError::UnknownProperty {
        entity: plan.entity.entity,
        property: uncapitalize(segment),
    })
}

fn parse_ordering(plan: &mut QueryPlan, ordering: &str) -> QueryResult<Vec<SortOrder>> {
    let mut orders = Vec::new();
    let mut consumed = 0;
    for captures in ORDER_RE.captures_iter(ordering) {
        let whole = captures.get(0).map_or(0..0, |m| m.range());
        if whole.start != consumed {
            break;
        }
        consumed = whole.end;
        let property = &captures[1];
        let direction = if &captures[2] == "Desc" {
            Direction::Desc
        } else {
            Direction::Asc
        };
        orders.push(resolve_order(plan, property, direction)?);
    }

    // Trailing property without an explicit direction sorts ascending.
    let rest = &ordering[consumed..];
    if !rest.is_empty() {
        orders.push(resolve_order(plan, rest, Direction::Asc)?);
    }
    Ok(orders)
}

fn resolve_order(
    plan: &mut QueryPlan,
    property: &str,
    direction: Direction,
) -> QueryResult<SortOrder> {
    let column = resolve_property(plan, property).ok_or_else(|| QueryError::UnknownProperty {
        entity: plan.entity.entity,
        property: uncapitalize(property),
    })?;
    Ok(SortOrder { column, direction })
}

/// Resolves `Username` or `TeamName` style property text, joining through a
/// relation when the text starts with the relation's name.
fn resolve_property(plan: &mut QueryPlan, property: &str) -> Option<ColumnRef> {
    let entity = plan.entity;
    if let Some(field) = field_for(entity, property) {
        return Some(ColumnRef::new(plan.root_alias.clone(), field));
    }

    for relation in entity.relations {
        let prefix = capitalize(relation.name);
        let Some(rest) = property.strip_prefix(prefix.as_str()) else {
            continue;
        };
        let rest = rest.strip_prefix('_').unwrap_or(rest);
        if let Some(field) = field_for(relation.target, rest) {
            let root = plan.root_alias.clone();
            let alias = plan.ensure_join(&root, relation);
            return Some(ColumnRef::new(alias, field));
        }
    }
    None
}

fn field_for(entity: &'static EntityMapping, property: &str) -> Option<&'static FieldMapping> {
    if property.is_empty() {
        return None;
    }
    entity.field(&uncapitalize(property))
}

fn uncapitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

pub(crate) fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_method_name, split_conjunctions};
    use crate::mapping::MEMBER;
    use crate::query::plan::{
        Binding, Comparator, Connector, Direction, JoinKind, Projection, StatementKind,
    };
    use crate::query::QueryError;

    #[test]
    fn equality_is_the_default_comparator() {
        let plan = parse_method_name(&MEMBER, "findByUsername").unwrap();
        assert_eq!(plan.criteria.len(), 1);
        assert_eq!(plan.criteria[0].predicate.column.field.column, "username");
        assert_eq!(plan.criteria[0].predicate.comparator, Comparator::Eq);
        assert_eq!(plan.binding, Binding::Positional { arity: 1 });
        assert_eq!(plan.projection, Projection::Entity);
    }

    #[test]
    fn conjunction_segments_keep_order_and_comparators() {
        let plan = parse_method_name(&MEMBER, "findByUsernameAndAgeGreaterThan").unwrap();
        let predicates: Vec<_> = plan
            .criteria
            .iter()
            .map(|c| (c.connector, c.predicate.column.field.name, c.predicate.comparator))
            .collect();
        assert_eq!(
            predicates,
            vec![
                (Connector::And, "username", Comparator::Eq),
                (Connector::And, "age", Comparator::Gt),
            ]
        );
    }

    #[test]
    fn between_consumes_two_positional_arguments() {
        let plan = parse_method_name(&MEMBER, "findByAgeBetweenOrUsernameLike").unwrap();
        assert_eq!(plan.binding, Binding::Positional { arity: 3 });
        assert_eq!(plan.criteria[1].connector, Connector::Or);
        assert_eq!(plan.criteria[1].predicate.comparator, Comparator::Like);
    }

    #[test]
    fn descriptive_subject_is_ignored_but_limits_and_distinct_apply() {
        let plan = parse_method_name(&MEMBER, "findEntityGraphByUsername").unwrap();
        assert_eq!(plan.limit, None);
        assert!(!plan.distinct);

        let plan = parse_method_name(&MEMBER, "findDistinctTop3By").unwrap();
        assert_eq!(plan.limit, Some(3));
        assert!(plan.distinct);
        assert!(plan.criteria.is_empty());

        let plan = parse_method_name(&MEMBER, "findFirstByOrderByAgeDesc").unwrap();
        assert_eq!(plan.limit, Some(1));
        assert_eq!(plan.order.len(), 1);
        assert_eq!(plan.order[0].direction, Direction::Desc);
    }

    #[test]
    fn relation_paths_add_an_inner_join() {
        let plan = parse_method_name(&MEMBER, "findByTeamName").unwrap();
        assert_eq!(plan.joins.len(), 1);
        assert_eq!(plan.joins[0].kind, JoinKind::Inner);
        assert_eq!(plan.criteria[0].predicate.column.alias, plan.joins[0].alias);
    }

    #[test]
    fn verbs_select_statement_shape() {
        assert_eq!(
            parse_method_name(&MEMBER, "countByUsername").unwrap().projection,
            Projection::Count
        );
        assert_eq!(
            parse_method_name(&MEMBER, "existsByUsername").unwrap().kind,
            StatementKind::Exists
        );
        assert_eq!(
            parse_method_name(&MEMBER, "deleteByAgeLessThan").unwrap().kind,
            StatementKind::Delete
        );
    }

    #[test]
    fn ordering_without_direction_defaults_to_ascending() {
        let plan = parse_method_name(&MEMBER, "findByAgeOrderByUsernameDescAge").unwrap();
        assert_eq!(plan.order.len(), 2);
        assert_eq!(plan.order[0].column.field.name, "username");
        assert_eq!(plan.order[1].column.field.name, "age");
        assert_eq!(plan.order[1].direction, Direction::Asc);
    }

    #[test]
    fn ignore_case_and_null_checks_parse() {
        let plan = parse_method_name(&MEMBER, "findByUsernameIgnoreCaseAndTeamNameIsNotNull")
            .unwrap();
        assert!(plan.criteria[0].predicate.ignore_case);
        assert_eq!(plan.criteria[1].predicate.comparator, Comparator::IsNotNull);
        assert_eq!(plan.binding, Binding::Positional { arity: 1 });
    }

    #[test]
    fn unknown_property_is_rejected() {
        let err = parse_method_name(&MEMBER, "findByNicknameAndAge").unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownProperty {
                entity: "Member",
                property: "nickname".to_string(),
            }
        );
    }

    #[test]
    fn non_derivable_names_are_rejected() {
        assert!(parse_method_name(&MEMBER, "findAll").unwrap().criteria.is_empty());
        assert!(matches!(
            parse_method_name(&MEMBER, "loadEverything"),
            Err(QueryError::UnknownMethodShape(_))
        ));
        assert!(matches!(
            parse_method_name(&MEMBER, "findByUsernameAnd"),
            Err(QueryError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn lowercase_and_inside_a_word_does_not_split() {
        let parts = split_conjunctions("BrandNameAndOrigin");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1, "BrandName");
        assert_eq!(parts[1].1, "Origin");
    }
}
