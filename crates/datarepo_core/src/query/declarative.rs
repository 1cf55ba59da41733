//! Declarative query strings.
//!
//! # Responsibility
//! - Parse the supported select/update/delete subset into a [`QueryPlan`].
//! - Resolve aliases, paths and entity names against static mappings.
//!
//! # Invariants
//! - Keywords are case-insensitive; entity and property names are not.
//! - Conditions are a flat, left-associated list of predicates.
//! - Placeholder names are recorded in order of first appearance.

use crate::mapping::{entity_by_name, EntityMapping, FieldMapping};
use crate::query::plan::{
    ArithOp, Assignment, Binding, ColumnRef, Comparator, Connector, Criterion, Direction, Join,
    JoinKind, Operand, ParamRef, PlanSource, Predicate, Projection, QueryPlan, SortOrder,
    StatementKind,
};
use crate::query::{QueryError, QueryResult};
use rusqlite::types::Value;

/// Parses `query` as the declarative query of method `signature`.
pub fn parse_query(signature: &str, query: &str) -> QueryResult<QueryPlan> {
    let tokens = tokenize(query)?;
    let mut parser = Parser {
        query,
        tokens,
        pos: 0,
        params: Vec::new(),
    };
    let plan = parser.statement(signature)?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.syntax(format!(
            "unexpected trailing input `{}`",
            parser.tokens[parser.pos]
        )));
    }
    Ok(plan)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Identifier or dotted path.
    Word(String),
    Param(String),
    Int(i64),
    Str(String),
    Symbol(&'static str),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word(word) => write!(f, "{word}"),
            Self::Param(name) => write!(f, ":{name}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "'{value}'"),
            Self::Symbol(symbol) => write!(f, "{symbol}"),
        }
    }
}

const SYMBOLS: &[&str] = &["<>", "!=", ">=", "<=", "=", ">", "<", "(", ")", ",", "+", "-", "*"];

fn tokenize(query: &str) -> QueryResult<Vec<Token>> {
    let syntax = |message: String| QueryError::Syntax {
        query: query.to_string(),
        message,
    };
    let chars: Vec<char> = query.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '.'))
            {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse()
                .map_err(|_| syntax(format!("integer literal `{text}` out of range")))?;
            tokens.push(Token::Int(value));
        } else if c == ':' {
            let start = i + 1;
            i = start;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            if i == start {
                return Err(syntax("placeholder without a name".to_string()));
            }
            tokens.push(Token::Param(chars[start..i].iter().collect()));
        } else if c == '\'' {
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(syntax("unterminated string literal".to_string())),
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        value.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(other) => {
                        value.push(*other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(value));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let symbol = SYMBOLS
                .iter()
                .find(|symbol| rest.starts_with(**symbol))
                .ok_or_else(|| syntax(format!("unexpected character `{c}`")))?;
            i += symbol.chars().count();
            tokens.push(Token::Symbol(*symbol));
        }
    }
    Ok(tokens)
}

/// Select item recorded before the FROM clause defines its aliases.
enum SelectItem {
    Path(String),
    Count(String),
    Dto { type_name: String, paths: Vec<String> },
}

struct Parser<'q> {
    query: &'q str,
    tokens: Vec<Token>,
    pos: usize,
    params: Vec<String>,
}

impl Parser<'_> {
    fn statement(&mut self, signature: &str) -> QueryResult<QueryPlan> {
        let plan = if self.eat_keyword("SELECT") {
            self.select(signature)?
        } else if self.eat_keyword("UPDATE") {
            self.update(signature)?
        } else if self.eat_keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let mut plan = self.root(signature)?;
            plan.kind = StatementKind::Delete;
            self.where_clause(&mut plan)?;
            plan
        } else {
            return Err(self.syntax("expected SELECT, UPDATE or DELETE".to_string()));
        };

        let mut plan = plan;
        if plan.is_modifying() && !plan.joins.is_empty() {
            return Err(self.syntax("bulk statements cannot navigate relationships".to_string()));
        }
        plan.binding = Binding::Named {
            names: std::mem::take(&mut self.params),
        };
        Ok(plan)
    }

    fn select(&mut self, signature: &str) -> QueryResult<QueryPlan> {
        let distinct = self.eat_keyword("DISTINCT");
        let item = self.select_item()?;
        self.expect_keyword("FROM")?;
        let mut plan = self.root(signature)?;
        plan.distinct = distinct;
        self.joins(&mut plan)?;

        plan.projection = match item {
            SelectItem::Path(path) if path == plan.root_alias => Projection::Entity,
            SelectItem::Path(path) if !path.contains('.') => {
                if plan.joins.iter().any(|join| join.alias == path) {
                    return Err(self.syntax(format!(
                        "selecting joined alias `{path}` is not supported; select the root alias"
                    )));
                }
                return Err(QueryError::UnknownAlias(path));
            }
            SelectItem::Path(path) => Projection::Scalar(self.resolve_path(&mut plan, &path)?),
            SelectItem::Count(target) => {
                if !target.is_empty() && target != plan.root_alias {
                    self.resolve_path(&mut plan, &target)?;
                }
                Projection::Count
            }
            SelectItem::Dto { type_name, paths } => {
                let columns = paths
                    .iter()
                    .map(|path| self.resolve_path(&mut plan, path))
                    .collect::<QueryResult<Vec<_>>>()?;
                Projection::Dto { type_name, columns }
            }
        };

        self.where_clause(&mut plan)?;
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let path = self.word()?;
                let column = self.resolve_path(&mut plan, &path)?;
                let direction = if self.eat_keyword("DESC") {
                    Direction::Desc
                } else {
                    self.eat_keyword("ASC");
                    Direction::Asc
                };
                plan.order.push(SortOrder { column, direction });
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }
        Ok(plan)
    }

    fn select_item(&mut self) -> QueryResult<SelectItem> {
        if self.eat_keyword("NEW") {
            let qualified = self.word()?;
            let type_name = qualified
                .rsplit('.')
                .next()
                .unwrap_or(qualified.as_str())
                .to_string();
            self.expect_symbol("(")?;
            let mut paths = vec![self.word()?];
            while self.eat_symbol(",") {
                paths.push(self.word()?);
            }
            self.expect_symbol(")")?;
            return Ok(SelectItem::Dto { type_name, paths });
        }
        if self.peek_keyword("COUNT") && self.peek_at(1) == Some(&Token::Symbol("(")) {
            self.pos += 2;
            self.eat_keyword("DISTINCT");
            let target = if self.eat_symbol("*") {
                String::new()
            } else {
                self.word()?
            };
            self.expect_symbol(")")?;
            return Ok(SelectItem::Count(target));
        }
        Ok(SelectItem::Path(self.word()?))
    }

    fn update(&mut self, signature: &str) -> QueryResult<QueryPlan> {
        let mut plan = self.root(signature)?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let target = self.word()?;
            let field = self.root_field(&plan, &target)?;
            self.expect_symbol("=")?;
            let base = self.operand(&mut plan)?;
            let op = if self.eat_symbol("+") {
                Some((ArithOp::Add, self.operand(&mut plan)?))
            } else if self.eat_symbol("-") {
                Some((ArithOp::Sub, self.operand(&mut plan)?))
            } else {
                None
            };
            assignments.push(Assignment { field, base, op });
            if !self.eat_symbol(",") {
                break;
            }
        }
        plan.kind = StatementKind::Update(assignments);
        self.where_clause(&mut plan)?;
        Ok(plan)
    }

    /// `Entity [AS] alias`
    fn root(&mut self, signature: &str) -> QueryResult<QueryPlan> {
        let entity_name = self.word()?;
        let entity = entity_by_name(&entity_name)
            .ok_or_else(|| QueryError::UnknownEntity(entity_name.clone()))?;
        self.eat_keyword("AS");
        let alias = match self.peek() {
            Some(Token::Word(word)) if !is_clause_keyword(word) => {
                let alias = word.clone();
                self.pos += 1;
                alias
            }
            _ => entity.entity[..1].to_ascii_lowercase(),
        };
        Ok(QueryPlan::new(
            signature,
            PlanSource::Declarative(self.query.to_string()),
            entity,
            alias,
        ))
    }

    fn joins(&mut self, plan: &mut QueryPlan) -> QueryResult<()> {
        loop {
            let kind = if self.eat_keyword("LEFT") {
                self.eat_keyword("OUTER");
                Some(JoinKind::Left)
            } else if self.eat_keyword("INNER") {
                Some(JoinKind::Inner)
            } else {
                None
            };
            if !self.eat_keyword("JOIN") {
                if kind.is_some() {
                    return Err(self.syntax("expected JOIN".to_string()));
                }
                return Ok(());
            }
            let kind = kind.unwrap_or(JoinKind::Inner);
            let fetch = self.eat_keyword("FETCH");
            let path = self.word()?;
            let (from_alias, relation_name) = path
                .split_once('.')
                .ok_or_else(|| self.syntax(format!("join path `{path}` must be alias.relation")))?;
            let from_entity = alias_entity(plan, from_alias)?;
            let relation =
                from_entity
                    .relation(relation_name)
                    .ok_or_else(|| QueryError::UnknownProperty {
                        entity: from_entity.entity,
                        property: relation_name.to_string(),
                    })?;
            self.eat_keyword("AS");
            let alias = match self.peek() {
                Some(Token::Word(word)) if !is_clause_keyword(word) => {
                    let alias = word.clone();
                    self.pos += 1;
                    alias
                }
                _ => format!("{from_alias}_{relation_name}"),
            };
            plan.joins.push(Join {
                relation,
                from_alias: from_alias.to_string(),
                alias,
                kind,
                fetch,
            });
        }
    }

    fn where_clause(&mut self, plan: &mut QueryPlan) -> QueryResult<()> {
        if !self.eat_keyword("WHERE") {
            return Ok(());
        }
        let mut connector = Connector::And;
        loop {
            let predicate = self.predicate(plan)?;
            plan.criteria.push(Criterion {
                connector,
                predicate,
            });
            connector = if self.eat_keyword("AND") {
                Connector::And
            } else if self.eat_keyword("OR") {
                Connector::Or
            } else {
                return Ok(());
            };
        }
    }

    fn predicate(&mut self, plan: &mut QueryPlan) -> QueryResult<Predicate> {
        let path = self.word()?;
        let column = self.resolve_path(plan, &path)?;
        let predicate = |comparator, operands| Predicate {
            column: column.clone(),
            comparator,
            operands,
            ignore_case: false,
        };

        if self.eat_keyword("IS") {
            let comparator = if self.eat_keyword("NOT") {
                Comparator::IsNotNull
            } else {
                Comparator::IsNull
            };
            self.expect_keyword("NULL")?;
            return Ok(predicate(comparator, Vec::new()));
        }

        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("LIKE") {
            let comparator = if negated {
                Comparator::NotLike
            } else {
                Comparator::Like
            };
            let operand = self.operand(plan)?;
            return Ok(predicate(comparator, vec![operand]));
        }
        if self.eat_keyword("IN") {
            let comparator = if negated {
                Comparator::NotIn
            } else {
                Comparator::In
            };
            let parenthesized = self.eat_symbol("(");
            let operand = match self.next() {
                Some(Token::Param(name)) => Operand::Param(self.param(name)),
                other => {
                    return Err(self.syntax(format!(
                        "IN expects a list parameter, found `{}`",
                        other.map_or_else(|| "end of query".to_string(), |t| t.to_string())
                    )))
                }
            };
            if parenthesized {
                self.expect_symbol(")")?;
            }
            return Ok(predicate(comparator, vec![operand]));
        }
        if negated {
            return Err(self.syntax("NOT must be followed by LIKE or IN".to_string()));
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.operand(plan)?;
            self.expect_keyword("AND")?;
            let high = self.operand(plan)?;
            return Ok(predicate(Comparator::Between, vec![low, high]));
        }

        let comparator = match self.next() {
            Some(Token::Symbol("=")) => Comparator::Eq,
            Some(Token::Symbol("<>")) | Some(Token::Symbol("!=")) => Comparator::NotEq,
            Some(Token::Symbol(">")) => Comparator::Gt,
            Some(Token::Symbol(">=")) => Comparator::Ge,
            Some(Token::Symbol("<")) => Comparator::Lt,
            Some(Token::Symbol("<=")) => Comparator::Le,
            other => {
                return Err(self.syntax(format!(
                    "expected a comparison after `{path}`, found `{}`",
                    other.map_or_else(|| "end of query".to_string(), |t| t.to_string())
                )))
            }
        };
        let operand = self.operand(plan)?;
        Ok(predicate(comparator, vec![operand]))
    }

    fn operand(&mut self, plan: &mut QueryPlan) -> QueryResult<Operand> {
        match self.next() {
            Some(Token::Param(name)) => Ok(Operand::Param(self.param(name))),
            Some(Token::Int(value)) => Ok(Operand::Literal(Value::Integer(value))),
            Some(Token::Str(value)) => Ok(Operand::Literal(Value::Text(value))),
            Some(Token::Symbol("-")) => match self.next() {
                Some(Token::Int(value)) => Ok(Operand::Literal(Value::Integer(-value))),
                _ => Err(self.syntax("`-` must precede an integer literal".to_string())),
            },
            Some(Token::Word(path)) => Ok(Operand::Column(self.resolve_path(plan, &path)?)),
            other => Err(self.syntax(format!(
                "expected an operand, found `{}`",
                other.map_or_else(|| "end of query".to_string(), |t| t.to_string())
            ))),
        }
    }

    fn param(&mut self, name: String) -> ParamRef {
        if !self.params.contains(&name) {
            self.params.push(name.clone());
        }
        ParamRef::Named(name)
    }

    /// Resolves `alias.field` or `alias.relation.field`, joining implicitly
    /// through the relation in the second form.
    fn resolve_path(&self, plan: &mut QueryPlan, path: &str) -> QueryResult<ColumnRef> {
        let mut segments = path.split('.');
        let alias = segments.next().unwrap_or_default();
        let mut alias = alias.to_string();
        let mut entity = alias_entity(plan, &alias)?;
        let rest: Vec<&str> = segments.collect();
        let Some((field_name, relations)) = rest.split_last() else {
            return Err(self.syntax(format!("`{path}` is not a property path")));
        };

        for relation_name in relations {
            let relation =
                entity
                    .relation(relation_name)
                    .ok_or_else(|| QueryError::UnknownProperty {
                        entity: entity.entity,
                        property: (*relation_name).to_string(),
                    })?;
            alias = plan.ensure_join(&alias, relation);
            entity = relation.target;
        }

        let field = entity
            .field(field_name)
            .ok_or_else(|| QueryError::UnknownProperty {
                entity: entity.entity,
                property: (*field_name).to_string(),
            })?;
        Ok(ColumnRef::new(alias, field))
    }

    /// SET targets may be written `alias.field` or bare `field`.
    fn root_field(&self, plan: &QueryPlan, target: &str) -> QueryResult<&'static FieldMapping> {
        let field_name = match target.split_once('.') {
            Some((alias, field)) if alias == plan.root_alias => field,
            Some((alias, _)) => return Err(QueryError::UnknownAlias(alias.to_string())),
            None => target,
        };
        plan.entity
            .field(field_name)
            .filter(|field| field.name != plan.entity.id_field().name)
            .ok_or_else(|| QueryError::UnknownProperty {
                entity: plan.entity.entity,
                property: field_name.to_string(),
            })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let matched = self.peek_keyword(keyword);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn expect_keyword(&mut self, keyword: &str) -> QueryResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.syntax(format!("expected {keyword}")))
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        let matched = matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn expect_symbol(&mut self, symbol: &str) -> QueryResult<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.syntax(format!("expected `{symbol}`")))
        }
    }

    fn word(&mut self) -> QueryResult<String> {
        match self.next() {
            Some(Token::Word(word)) => Ok(word),
            other => Err(self.syntax(format!(
                "expected an identifier, found `{}`",
                other.map_or_else(|| "end of query".to_string(), |t| t.to_string())
            ))),
        }
    }

    fn syntax(&self, message: String) -> QueryError {
        QueryError::Syntax {
            query: self.query.to_string(),
            message,
        }
    }
}

fn alias_entity(plan: &QueryPlan, alias: &str) -> QueryResult<&'static EntityMapping> {
    if alias == plan.root_alias {
        return Ok(plan.entity);
    }
    plan.joins
        .iter()
        .find(|join| join.alias == alias)
        .map(|join| join.relation.target)
        .ok_or_else(|| QueryError::UnknownAlias(alias.to_string()))
}

fn is_clause_keyword(word: &str) -> bool {
    ["JOIN", "LEFT", "INNER", "WHERE", "ORDER", "SET"]
        .iter()
        .any(|keyword| word.eq_ignore_ascii_case(keyword))
}

#[cfg(test)]
mod tests {
    use super::parse_query;
    use crate::query::plan::{
        ArithOp, Binding, Comparator, Connector, JoinKind, Operand, ParamRef, Projection,
        StatementKind,
    };
    use crate::query::QueryError;
    use rusqlite::types::Value;

    #[test]
    fn named_parameters_are_collected_in_order() {
        let plan = parse_query(
            "findUser",
            "select m from Member m where m.username = :username and m.age = :age",
        )
        .unwrap();
        assert_eq!(plan.projection, Projection::Entity);
        assert_eq!(
            plan.binding,
            Binding::Named {
                names: vec!["username".to_string(), "age".to_string()]
            }
        );
        assert_eq!(plan.criteria[1].connector, Connector::And);
    }

    #[test]
    fn scalar_and_constructor_projections() {
        let plan = parse_query("names", "select m.username from Member m").unwrap();
        assert!(matches!(plan.projection, Projection::Scalar(ref c) if c.field.name == "username"));

        let plan = parse_query(
            "dtos",
            "select new study.datajpa.dto.MemberDto(m.id, m.username, t.name)from Member m join m.team t",
        )
        .unwrap();
        match plan.projection {
            Projection::Dto { type_name, columns } => {
                assert_eq!(type_name, "MemberDto");
                assert_eq!(columns.len(), 3);
                assert_eq!(columns[2].alias, "t");
            }
            other => panic!("unexpected projection {other:?}"),
        }
        assert_eq!(plan.joins[0].kind, JoinKind::Inner);
    }

    #[test]
    fn fetch_join_without_alias_gets_a_generated_alias() {
        let plan = parse_query("members", "select m from Member m left join fetch m.team").unwrap();
        assert_eq!(plan.joins.len(), 1);
        assert!(plan.joins[0].fetch);
        assert_eq!(plan.joins[0].kind, JoinKind::Left);
        assert_eq!(plan.joins[0].alias, "m_team");
    }

    #[test]
    fn update_with_arithmetic_assignment() {
        let plan = parse_query(
            "bulkAgePlus",
            "update Member m set m.age = m.age + 1 where m.age >= :age",
        )
        .unwrap();
        match &plan.kind {
            StatementKind::Update(assignments) => {
                assert_eq!(assignments[0].field.name, "age");
                assert!(matches!(
                    assignments[0].op,
                    Some((ArithOp::Add, Operand::Literal(Value::Integer(1))))
                ));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(plan.criteria[0].predicate.comparator, Comparator::Ge);
    }

    #[test]
    fn in_between_and_null_checks() {
        let plan = parse_query(
            "mixed",
            "SELECT m FROM Member m WHERE m.username IN :names OR m.age BETWEEN 10 AND :max AND m.team.name IS NOT NULL",
        )
        .unwrap();
        let comparators: Vec<_> = plan.criteria.iter().map(|c| c.predicate.comparator).collect();
        assert_eq!(
            comparators,
            vec![Comparator::In, Comparator::Between, Comparator::IsNotNull]
        );
        assert_eq!(plan.criteria[1].connector, Connector::Or);
        assert_eq!(
            plan.criteria[0].predicate.operands,
            vec![Operand::Param(ParamRef::Named("names".to_string()))]
        );
        assert_eq!(plan.joins.len(), 1);
    }

    #[test]
    fn unknown_names_are_descriptor_errors() {
        assert_eq!(
            parse_query("q", "select m from Member m where m.nickname = :n").unwrap_err(),
            QueryError::UnknownProperty {
                entity: "Member",
                property: "nickname".to_string()
            }
        );
        assert_eq!(
            parse_query("q", "select x from Person x").unwrap_err(),
            QueryError::UnknownEntity("Person".to_string())
        );
        assert_eq!(
            parse_query("q", "select m from Member m where z.age = 1").unwrap_err(),
            QueryError::UnknownAlias("z".to_string())
        );
    }

    #[test]
    fn malformed_queries_are_syntax_errors() {
        for query in [
            "select m from Member m where",
            "select m from Member m where m.age ~ 1",
            "select m from Member m where m.username = 'open",
            "update Member m set m.age = 1 where m.team.name = :name",
            "select m Member m",
        ] {
            assert!(
                matches!(parse_query("q", query), Err(QueryError::Syntax { .. })),
                "{query}"
            );
        }
    }
}
