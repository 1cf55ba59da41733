//! Structured query plans shared by both descriptor parsers.

use crate::mapping::{EntityMapping, FieldMapping, RelationMapping};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanSource {
    Derived,
    /// Original query text, kept verbatim.
    Declarative(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub relation: &'static RelationMapping,
    pub from_alias: String,
    pub alias: String,
    pub kind: JoinKind,
    /// Hydrate the related entity from this join.
    pub fetch: bool,
}

/// A column qualified by the alias it is read through.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub field: &'static FieldMapping,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, field: &'static FieldMapping) -> Self {
        Self {
            alias: alias.into(),
            field,
        }
    }

    pub fn to_sql(&self) -> String {
        format!("{}.{}", self.alias, self.field.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamRef {
    /// Zero-based argument index for derived plans.
    Positional(usize),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Param(ParamRef),
    Literal(Value),
    Column(ColumnRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    StartingWith,
    EndingWith,
    Containing,
    Between,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
}

impl Comparator {
    /// Number of operands the comparator consumes.
    pub fn arity(self) -> usize {
        match self {
            Self::Between => 2,
            Self::IsNull | Self::IsNotNull | Self::IsTrue | Self::IsFalse => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: ColumnRef,
    pub comparator: Comparator,
    pub operands: Vec<Operand>,
    pub ignore_case: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// One predicate and the conjunction joining it to everything before it.
///
/// The connector of the first criterion is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub connector: Connector,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortOrder {
    pub column: ColumnRef,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: &'static FieldMapping,
    pub base: Operand,
    pub op: Option<(ArithOp, Operand)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Select,
    Exists,
    Update(Vec<Assignment>),
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Full-entity hydration of the root alias.
    Entity,
    Scalar(ColumnRef),
    /// Constructor expression; `type_name` is the unqualified type name.
    Dto {
        type_name: String,
        columns: Vec<ColumnRef>,
    },
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Positional { arity: usize },
    Named { names: Vec<String> },
}

impl Binding {
    pub fn arity(&self) -> usize {
        match self {
            Self::Positional { arity } => *arity,
            Self::Named { names } => names.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub signature: String,
    pub source: PlanSource,
    pub entity: &'static EntityMapping,
    pub root_alias: String,
    pub kind: StatementKind,
    pub distinct: bool,
    pub projection: Projection,
    pub joins: Vec<Join>,
    pub criteria: Vec<Criterion>,
    pub order: Vec<SortOrder>,
    pub limit: Option<u32>,
    pub binding: Binding,
}

impl QueryPlan {
    pub(crate) fn new(
        signature: impl Into<String>,
        source: PlanSource,
        entity: &'static EntityMapping,
        root_alias: impl Into<String>,
    ) -> Self {
        Self {
            signature: signature.into(),
            source,
            entity,
            root_alias: root_alias.into(),
            kind: StatementKind::Select,
            distinct: false,
            projection: Projection::Entity,
            joins: Vec::new(),
            criteria: Vec::new(),
            order: Vec::new(),
            limit: None,
            binding: Binding::Positional { arity: 0 },
        }
    }

    pub fn is_modifying(&self) -> bool {
        matches!(self.kind, StatementKind::Update(_) | StatementKind::Delete)
    }

    pub fn fetch_joins(&self) -> impl Iterator<Item = &Join> {
        self.joins.iter().filter(|join| join.fetch)
    }

    /// Returns the alias joined for `relation` from `from_alias`, adding an
    /// inner join when none exists yet.
    pub(crate) fn ensure_join(
        &mut self,
        from_alias: &str,
        relation: &'static RelationMapping,
    ) -> String {
        if let Some(join) = self
            .joins
            .iter()
            .find(|join| join.from_alias == from_alias && std::ptr::eq(join.relation, relation))
        {
            return join.alias.clone();
        }
        let alias = format!("{from_alias}_{}", relation.name);
        self.joins.push(Join {
            relation,
            from_alias: from_alias.to_string(),
            alias: alias.clone(),
            kind: JoinKind::Inner,
            fetch: false,
        });
        alias
    }

    /// Marks `relation` as fetched, reusing a predicate join when present.
    pub(crate) fn add_fetch(&mut self, relation: &'static RelationMapping) {
        let root = self.root_alias.clone();
        if let Some(join) = self
            .joins
            .iter_mut()
            .find(|join| join.from_alias == root && std::ptr::eq(join.relation, relation))
        {
            join.fetch = true;
            return;
        }
        self.joins.push(Join {
            relation,
            from_alias: root.clone(),
            alias: format!("{root}_{}", relation.name),
            kind: JoinKind::Left,
            fetch: true,
        });
    }

    /// Count plan over the same predicate: fetch-only joins and ordering
    /// removed since they cannot change cardinality.
    pub fn derive_count(&self) -> Self {
        let mut count = self.clone();
        count.signature = format!("{}#count", self.signature);
        count.projection = Projection::Count;
        count.order.clear();
        count.limit = None;
        count
            .joins
            .retain(|join| !(join.fetch && join.kind == JoinKind::Left));
        for join in &mut count.joins {
            join.fetch = false;
        }
        count
    }

    /// Every parameter reference in textual order.
    pub fn param_refs(&self) -> Vec<&ParamRef> {
        let mut refs = Vec::new();
        if let StatementKind::Update(assignments) = &self.kind {
            for assignment in assignments {
                collect_operand(&assignment.base, &mut refs);
                if let Some((_, operand)) = &assignment.op {
                    collect_operand(operand, &mut refs);
                }
            }
        }
        for criterion in &self.criteria {
            for operand in &criterion.predicate.operands {
                collect_operand(operand, &mut refs);
            }
        }
        refs
    }
}

fn collect_operand<'a>(operand: &'a Operand, refs: &mut Vec<&'a ParamRef>) {
    if let Operand::Param(param) = operand {
        refs.push(param);
    }
}
