//! Process-wide plan memo for one entity's repository methods.
//!
//! # Responsibility
//! - Parse every declared method when the registry is built.
//! - Memoize plans per method signature, including derived names resolved
//!   on demand.
//!
//! # Invariants
//! - A signature is parsed at most once, even under concurrent first access.
//! - A registry that fails to build is never observable.

use crate::mapping::EntityMapping;
use crate::query::declarative::parse_query;
use crate::query::derived::parse_method_name;
use crate::query::method::{MethodDecl, QueryHints, ReturnKind};
use crate::query::plan::{Binding, Projection, QueryPlan, StatementKind};
use crate::query::{QueryError, QueryResult};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A method declaration together with its parsed plans.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMethod {
    pub name: String,
    pub returns: ReturnKind,
    pub hints: QueryHints,
    pub clear_automatically: bool,
    pub plan: QueryPlan,
    /// Count plan for paged execution of select plans.
    pub count_plan: Option<QueryPlan>,
}

pub struct QueryRegistry {
    entity: &'static EntityMapping,
    declared: HashMap<&'static str, MethodDecl>,
    plans: Mutex<HashMap<String, Arc<OnceCell<Arc<ResolvedMethod>>>>>,
    parse_count: AtomicUsize,
}

impl std::fmt::Debug for QueryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRegistry")
            .field("entity", &self.entity.entity)
            .field("declared", &self.declared.len())
            .field("parse_count", &self.parse_count())
            .finish()
    }
}

impl QueryRegistry {
    /// Builds the registry for `entity`, parsing every declaration eagerly.
    ///
    /// # Errors
    /// - The first descriptor error of any declaration.
    pub fn build(entity: &'static EntityMapping, methods: &[MethodDecl]) -> QueryResult<Self> {
        let mut declared = HashMap::with_capacity(methods.len());
        for decl in methods {
            if declared.insert(decl.name, *decl).is_some() {
                return Err(QueryError::UnsupportedReturn {
                    method: decl.name.to_string(),
                    message: "method is declared twice".to_string(),
                });
            }
        }

        let registry = Self {
            entity,
            declared,
            plans: Mutex::new(HashMap::new()),
            parse_count: AtomicUsize::new(0),
        };
        for decl in methods {
            if let Err(err) = registry.resolve(decl) {
                error!(
                    "event=plan_registry_build module=query status=error entity={} method={} error={}",
                    entity.entity, decl.name, err
                );
                return Err(err);
            }
        }

        info!(
            "event=plan_registry_build module=query status=ok entity={} methods={}",
            entity.entity,
            methods.len()
        );
        Ok(registry)
    }

    pub fn entity(&self) -> &'static EntityMapping {
        self.entity
    }

    pub fn declaration(&self, name: &str) -> Option<&MethodDecl> {
        self.declared.get(name)
    }

    /// Resolves `name`, deriving a plan from the name when it is not declared.
    pub fn method(&self, name: &str) -> QueryResult<Arc<ResolvedMethod>> {
        match self.declared.get(name) {
            Some(decl) => self.resolve(decl),
            None => self.memoized(name, || {
                let plan = parse_method_name(self.entity, name)?;
                let returns = inferred_return(&plan);
                finish(
                    self.entity,
                    name.to_string(),
                    returns,
                    QueryHints::default(),
                    false,
                    plan,
                    None,
                )
            }),
        }
    }

    /// Number of plans parsed so far.
    pub fn parse_count(&self) -> usize {
        self.parse_count.load(Ordering::SeqCst)
    }

    fn resolve(&self, decl: &MethodDecl) -> QueryResult<Arc<ResolvedMethod>> {
        self.memoized(decl.name, || parse_declaration(self.entity, decl))
    }

    fn memoized(
        &self,
        name: &str,
        parse: impl FnOnce() -> QueryResult<ResolvedMethod>,
    ) -> QueryResult<Arc<ResolvedMethod>> {
        let cell = {
            let mut plans = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(plans.entry(name.to_string()).or_default())
        };
        // Parsing happens outside the map lock; the cell blocks racing
        // callers of the same signature until the first parse finishes.
        cell.get_or_try_init(|| {
            self.parse_count.fetch_add(1, Ordering::SeqCst);
            parse().map(Arc::new)
        })
        .cloned()
    }
}

fn parse_declaration(
    entity: &'static EntityMapping,
    decl: &MethodDecl,
) -> QueryResult<ResolvedMethod> {
    let plan = match decl.query {
        Some(query) => parse_query(decl.name, query)?,
        None => parse_method_name(entity, decl.name)?,
    };

    match &plan.binding {
        Binding::Named { names } => check_placeholders(decl, names, true)?,
        Binding::Positional { arity } => {
            if !decl.params.is_empty() && decl.params.len() != *arity {
                return Err(QueryError::ArityMismatch {
                    method: decl.name.to_string(),
                    expected: *arity,
                    declared: decl.params.len(),
                });
            }
        }
    }

    let count_plan = match decl.count_query {
        Some(query) => {
            let count = parse_query(&format!("{}#count", decl.name), query)?;
            if count.projection != Projection::Count {
                return Err(unsupported(decl.name, "count query must select COUNT(..)"));
            }
            if let Binding::Named { names } = &count.binding {
                check_placeholders(decl, names, false)?;
            }
            Some(count)
        }
        None => None,
    };

    finish(
        entity,
        decl.name.to_string(),
        decl.returns,
        decl.hints,
        decl.clear_automatically,
        plan,
        count_plan,
    )
}

/// Applies hints and checks that the plan can produce the declared shape.
fn finish(
    entity: &'static EntityMapping,
    name: String,
    returns: ReturnKind,
    hints: QueryHints,
    clear_automatically: bool,
    mut plan: QueryPlan,
    count_plan: Option<QueryPlan>,
) -> QueryResult<ResolvedMethod> {
    if !std::ptr::eq(plan.entity, entity) {
        return Err(unsupported(
            &name,
            &format!(
                "query selects from {} but the repository manages {}",
                plan.entity.entity, entity.entity
            ),
        ));
    }

    for path in hints.fetch {
        let relation = entity
            .relation(path)
            .ok_or_else(|| QueryError::UnknownProperty {
                entity: entity.entity,
                property: (*path).to_string(),
            })?;
        if plan.projection != Projection::Entity {
            return Err(unsupported(&name, "fetch hints need an entity projection"));
        }
        plan.add_fetch(relation);
    }

    match returns {
        ReturnKind::Modifying if !plan.is_modifying() => {
            return Err(unsupported(&name, "modifying methods need UPDATE or DELETE"));
        }
        _ if plan.is_modifying() && returns != ReturnKind::Modifying => {
            return Err(unsupported(&name, "bulk statements return an affected count"));
        }
        ReturnKind::Count if plan.projection != Projection::Count => {
            return Err(unsupported(&name, "count methods need a count projection"));
        }
        ReturnKind::Exists if plan.kind != StatementKind::Exists => {
            return Err(unsupported(&name, "exists methods must start with `exists`"));
        }
        ReturnKind::Page | ReturnKind::Slice => {
            if plan.projection != Projection::Entity {
                return Err(unsupported(&name, "paged methods need an entity projection"));
            }
            if plan.limit.is_some() {
                return Err(unsupported(&name, "paged methods cannot carry a Top/First limit"));
            }
        }
        _ => {}
    }
    if plan.is_modifying() {
        if !plan.joins.is_empty() {
            return Err(unsupported(&name, "bulk statements cannot traverse relations"));
        }
        if plan.limit.is_some() {
            return Err(unsupported(&name, "bulk statements cannot carry a Top/First limit"));
        }
    }
    if hints.lock.is_some() && plan.kind != StatementKind::Select {
        return Err(unsupported(&name, "lock hints apply to select queries only"));
    }

    let count_plan = match count_plan {
        Some(count) => Some(count),
        None if plan.kind == StatementKind::Select && plan.projection != Projection::Count => {
            Some(plan.derive_count())
        }
        None => None,
    };

    Ok(ResolvedMethod {
        name,
        returns,
        hints,
        clear_automatically,
        plan,
        count_plan,
    })
}

/// Placeholders must be declared parameters; with `require_all`, every
/// declared parameter must also appear.
fn check_placeholders(decl: &MethodDecl, names: &[String], require_all: bool) -> QueryResult<()> {
    if let Some(placeholder) = names
        .iter()
        .find(|name| !decl.params.contains(&name.as_str()))
    {
        return Err(QueryError::UnknownPlaceholder {
            method: decl.name.to_string(),
            placeholder: placeholder.clone(),
        });
    }
    if require_all {
        if let Some(parameter) = decl
            .params
            .iter()
            .find(|param| !names.iter().any(|name| name == *param))
        {
            return Err(QueryError::UnusedParameter {
                method: decl.name.to_string(),
                parameter: (*parameter).to_string(),
            });
        }
    }
    Ok(())
}

fn inferred_return(plan: &QueryPlan) -> ReturnKind {
    if plan.is_modifying() {
        ReturnKind::Modifying
    } else if plan.kind == StatementKind::Exists {
        ReturnKind::Exists
    } else if plan.projection == Projection::Count {
        ReturnKind::Count
    } else if plan.limit == Some(1) {
        ReturnKind::Single
    } else {
        ReturnKind::Many
    }
}

fn unsupported(method: &str, message: &str) -> QueryError {
    QueryError::UnsupportedReturn {
        method: method.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::QueryRegistry;
    use crate::mapping::{MEMBER, TEAM};
    use crate::query::method::{MethodDecl, ReturnKind};
    use crate::query::plan::JoinKind;
    use crate::query::QueryError;

    #[test]
    fn declarations_are_parsed_once_at_build() {
        let methods = [
            MethodDecl::derived("findByUsername", ReturnKind::Many),
            MethodDecl::declared(
                "findUser",
                "select m from Member m where m.username = :username",
                ReturnKind::Many,
            )
            .params(&["username"]),
        ];
        let registry = QueryRegistry::build(&MEMBER, &methods).unwrap();
        assert_eq!(registry.parse_count(), 2);

        let first = registry.method("findUser").unwrap();
        let again = registry.method("findUser").unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &again));
        assert_eq!(registry.parse_count(), 2);
    }

    #[test]
    fn undeclared_names_are_derived_on_demand() {
        let registry = QueryRegistry::build(&MEMBER, &[]).unwrap();
        let resolved = registry.method("countByAgeGreaterThan").unwrap();
        assert_eq!(resolved.returns, ReturnKind::Count);
        assert!(resolved.count_plan.is_none());
        registry.method("countByAgeGreaterThan").unwrap();
        assert_eq!(registry.parse_count(), 1);
    }

    #[test]
    fn fetch_hint_adds_left_join() {
        let methods =
            [MethodDecl::derived("findEntityGraphByUsername", ReturnKind::Many).fetch(&["team"])];
        let registry = QueryRegistry::build(&MEMBER, &methods).unwrap();
        let resolved = registry.method("findEntityGraphByUsername").unwrap();
        assert_eq!(resolved.plan.joins.len(), 1);
        assert_eq!(resolved.plan.joins[0].kind, JoinKind::Left);
        assert!(resolved.count_plan.as_ref().unwrap().joins.is_empty());
    }

    #[test]
    fn placeholder_mismatches_fail_the_build() {
        let unknown = [MethodDecl::declared(
            "findUser",
            "select m from Member m where m.username = :name",
            ReturnKind::Many,
        )
        .params(&["username"])];
        assert!(matches!(
            QueryRegistry::build(&MEMBER, &unknown),
            Err(QueryError::UnknownPlaceholder { .. })
        ));

        let unused = [MethodDecl::declared(
            "findUser",
            "select m from Member m where m.username = :username",
            ReturnKind::Many,
        )
        .params(&["username", "age"])];
        assert!(matches!(
            QueryRegistry::build(&MEMBER, &unused),
            Err(QueryError::UnusedParameter { .. })
        ));
    }

    #[test]
    fn shape_and_entity_mismatches_fail_the_build() {
        let cases: [&[MethodDecl]; 4] = [
            &[MethodDecl::declared(
                "names",
                "select m.username from Member m",
                ReturnKind::Page,
            )],
            &[MethodDecl::declared(
                "bump",
                "update Member m set m.age = m.age + 1",
                ReturnKind::Many,
            )],
            &[MethodDecl::derived("findByAge", ReturnKind::Modifying)],
            &[MethodDecl::derived("findByUsernameAndAge", ReturnKind::Many).params(&["username"])],
        ];
        for methods in cases {
            assert!(QueryRegistry::build(&MEMBER, methods).is_err(), "{methods:?}");
        }

        let wrong_entity = [MethodDecl::declared(
            "teams",
            "select t from Team t",
            ReturnKind::Many,
        )];
        assert!(matches!(
            QueryRegistry::build(&MEMBER, &wrong_entity),
            Err(QueryError::UnsupportedReturn { .. })
        ));
        assert!(QueryRegistry::build(&TEAM, &wrong_entity).is_ok());
    }

    #[test]
    fn bulk_plans_reject_relation_paths_and_limits() {
        let registry = QueryRegistry::build(&MEMBER, &[]).unwrap();
        for name in ["deleteByTeamName", "deleteFirstByAgeGreaterThan", "deleteTop2ByUsername"] {
            assert!(
                matches!(
                    registry.method(name),
                    Err(QueryError::UnsupportedReturn { .. })
                ),
                "{name}"
            );
        }
        assert!(registry.method("deleteByAgeGreaterThan").is_ok());

        let declared = [MethodDecl::derived("deleteByTeamName", ReturnKind::Modifying)];
        assert!(matches!(
            QueryRegistry::build(&MEMBER, &declared),
            Err(QueryError::UnsupportedReturn { .. })
        ));
    }
}
