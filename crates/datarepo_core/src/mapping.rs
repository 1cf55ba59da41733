//! Entity-to-storage mapping and row hydration.
//!
//! # Responsibility
//! - Describe tables, columns and relationships for every entity type.
//! - Convert rows to entities and entities to column values.
//!
//! # Invariants
//! - Mappings are static; nothing is discovered at runtime.
//! - `Entity::from_row` reads exactly `Entity::column_count()` columns
//!   starting at the given offset.

use crate::model::member::{Member, MemberKey};
use crate::model::team::Team;
use crate::repo::error::{RepoError, RepoResult, ValidationError};
use rusqlite::types::Value;
use rusqlite::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
}

#[derive(Debug, PartialEq, Eq)]
pub struct FieldMapping {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

/// Many-to-one relationship owned by the mapped entity's foreign key.
#[derive(Debug, PartialEq, Eq)]
pub struct RelationMapping {
    pub name: &'static str,
    pub target: &'static EntityMapping,
    pub join_column: &'static str,
}

#[derive(Debug, PartialEq, Eq)]
pub struct EntityMapping {
    pub entity: &'static str,
    pub table: &'static str,
    /// First field is always the identifier.
    pub fields: &'static [FieldMapping],
    pub relations: &'static [RelationMapping],
}

impl EntityMapping {
    pub fn id_field(&self) -> &'static FieldMapping {
        &self.fields[0]
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldMapping> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationMapping> {
        self.relations.iter().find(|relation| relation.name == name)
    }
}

pub static TEAM: EntityMapping = EntityMapping {
    entity: "Team",
    table: "teams",
    fields: &[
        FieldMapping {
            name: "id",
            column: "team_id",
            kind: FieldKind::Integer,
        },
        FieldMapping {
            name: "name",
            column: "name",
            kind: FieldKind::Text,
        },
    ],
    relations: &[],
};

pub static MEMBER: EntityMapping = EntityMapping {
    entity: "Member",
    table: "members",
    fields: &[
        FieldMapping {
            name: "id",
            column: "member_id",
            kind: FieldKind::Integer,
        },
        FieldMapping {
            name: "key",
            column: "member_key",
            kind: FieldKind::Text,
        },
        FieldMapping {
            name: "username",
            column: "username",
            kind: FieldKind::Text,
        },
        FieldMapping {
            name: "age",
            column: "age",
            kind: FieldKind::Integer,
        },
    ],
    relations: &[RelationMapping {
        name: "team",
        target: &TEAM,
        join_column: "team_id",
    }],
};

/// Looks up a mapping by entity name as written in declarative queries.
pub fn entity_by_name(name: &str) -> Option<&'static EntityMapping> {
    [&TEAM, &MEMBER]
        .into_iter()
        .find(|mapping| mapping.entity == name)
}

/// Identity-cache key: entity name plus storage identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    pub entity: &'static str,
    pub id: i64,
}

/// Type-erased entity state held by the identity cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedEntity {
    Team(Team),
    Member(Member),
}

impl CachedEntity {
    pub(crate) fn mapping(&self) -> &'static EntityMapping {
        match self {
            Self::Team(_) => Team::mapping(),
            Self::Member(_) => Member::mapping(),
        }
    }

    pub(crate) fn write_values(&self) -> Vec<(&'static str, Value)> {
        match self {
            Self::Team(team) => team.write_values(),
            Self::Member(member) => member.write_values(),
        }
    }
}

/// Persistence contract implemented by every mapped record type.
pub trait Entity: Clone + std::fmt::Debug {
    fn mapping() -> &'static EntityMapping;

    fn id(&self) -> Option<i64>;

    fn assign_id(&mut self, id: i64);

    fn validate(&self) -> RepoResult<()>;

    /// Column/value pairs written on insert and update, identifier excluded.
    fn write_values(&self) -> Vec<(&'static str, Value)>;

    /// Secondary unique column that must agree when an identifier is reused.
    fn natural_key(&self) -> Option<(&'static str, Value)> {
        None
    }

    fn column_count() -> usize;

    fn select_list(alias: &str) -> String;

    fn from_row(row: &Row<'_>, offset: usize) -> RepoResult<Self>;

    /// Select list for a fetched relationship, `None` when not fetchable.
    fn fetch_select_list(_relation: &str, _alias: &str) -> Option<String> {
        None
    }

    /// Hydrates a fetched relationship from `row` starting at `offset`.
    fn attach_fetched(&mut self, relation: &str, _row: &Row<'_>, _offset: usize) -> RepoResult<()> {
        Err(RepoError::InvalidData(format!(
            "relation `{relation}` cannot be fetched for {}",
            Self::mapping().entity
        )))
    }

    fn fetched_column_count(_relation: &str) -> usize {
        0
    }

    /// Copies relationships that `fresh` fetched but `self` lacks.
    fn absorb_fetched(&mut self, _fresh: &Self) {}

    fn into_cached(self) -> CachedEntity;

    fn from_cached(cached: &CachedEntity) -> Option<Self>;

    fn entity_ref(&self) -> Option<EntityRef> {
        self.id().map(|id| EntityRef {
            entity: Self::mapping().entity,
            id,
        })
    }
}

const TEAM_COLUMN_COUNT: usize = 3;
const MEMBER_COLUMN_COUNT: usize = 5;

impl Entity for Team {
    fn mapping() -> &'static EntityMapping {
        &TEAM
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        Team::assign_id(self, id);
    }

    fn validate(&self) -> RepoResult<()> {
        Team::validate(self).map_err(|err| RepoError::Validation(ValidationError::Team(err)))
    }

    fn write_values(&self) -> Vec<(&'static str, Value)> {
        vec![("name", Value::Text(self.name.clone()))]
    }

    fn column_count() -> usize {
        TEAM_COLUMN_COUNT
    }

    // The member collection is read in the same statement so a fetched team
    // is as complete as one loaded on its own.
    fn select_list(alias: &str) -> String {
        format!(
            "{alias}.team_id, {alias}.name, \
             (SELECT group_concat(x.member_key, ',' ORDER BY x.member_id) \
              FROM members x WHERE x.team_id = {alias}.team_id)"
        )
    }

    fn from_row(row: &Row<'_>, offset: usize) -> RepoResult<Self> {
        let id: i64 = row.get(offset)?;
        let name: String = row.get(offset + 1)?;
        let keys: Option<String> = row.get(offset + 2)?;
        let members = match keys {
            Some(keys) => keys
                .split(',')
                .map(parse_member_key)
                .collect::<RepoResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(Team::hydrate(id, name, members))
    }

    fn into_cached(self) -> CachedEntity {
        CachedEntity::Team(self)
    }

    fn from_cached(cached: &CachedEntity) -> Option<Self> {
        match cached {
            CachedEntity::Team(team) => Some(team.clone()),
            CachedEntity::Member(_) => None,
        }
    }
}

impl Entity for Member {
    fn mapping() -> &'static EntityMapping {
        &MEMBER
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        Member::assign_id(self, id);
    }

    fn validate(&self) -> RepoResult<()> {
        Member::validate(self).map_err(|err| RepoError::Validation(ValidationError::Member(err)))
    }

    fn write_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("member_key", Value::Text(self.key.to_string())),
            ("username", Value::Text(self.username.clone())),
            ("age", Value::Integer(i64::from(self.age))),
            (
                "team_id",
                self.team_id.map_or(Value::Null, Value::Integer),
            ),
        ]
    }

    fn natural_key(&self) -> Option<(&'static str, Value)> {
        Some(("member_key", Value::Text(self.key.to_string())))
    }

    fn column_count() -> usize {
        MEMBER_COLUMN_COUNT
    }

    fn select_list(alias: &str) -> String {
        format!(
            "{alias}.member_id, {alias}.member_key, {alias}.username, {alias}.age, {alias}.team_id"
        )
    }

    fn from_row(row: &Row<'_>, offset: usize) -> RepoResult<Self> {
        let key_text: String = row.get(offset + 1)?;
        let age: i64 = row.get(offset + 3)?;
        let age = i32::try_from(age).map_err(|_| {
            RepoError::InvalidData(format!("age value `{age}` out of range in members.age"))
        })?;
        Ok(Member::hydrate(
            row.get(offset)?,
            parse_member_key(&key_text)?,
            row.get(offset + 2)?,
            age,
            row.get(offset + 4)?,
        ))
    }

    fn fetch_select_list(relation: &str, alias: &str) -> Option<String> {
        (relation == "team").then(|| Team::select_list(alias))
    }

    fn attach_fetched(&mut self, relation: &str, row: &Row<'_>, offset: usize) -> RepoResult<()> {
        if relation != "team" {
            return Err(RepoError::InvalidData(format!(
                "relation `{relation}` cannot be fetched for Member"
            )));
        }
        // LEFT JOIN: a member without a team yields a NULL team id.
        if row.get::<_, Option<i64>>(offset)?.is_some() {
            self.attach_fetched_team(Team::from_row(row, offset)?);
        }
        Ok(())
    }

    fn fetched_column_count(relation: &str) -> usize {
        if relation == "team" {
            TEAM_COLUMN_COUNT
        } else {
            0
        }
    }

    fn absorb_fetched(&mut self, fresh: &Self) {
        if self.team.is_none() && self.team_id == fresh.team_id {
            self.team = fresh.team.clone();
        }
    }

    fn into_cached(self) -> CachedEntity {
        CachedEntity::Member(self)
    }

    fn from_cached(cached: &CachedEntity) -> Option<Self> {
        match cached {
            CachedEntity::Member(member) => Some(member.clone()),
            CachedEntity::Team(_) => None,
        }
    }
}

fn parse_member_key(value: &str) -> RepoResult<MemberKey> {
    Uuid::parse_str(value).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{value}` in members.member_key"))
    })
}

#[cfg(test)]
mod tests {
    use super::{entity_by_name, MEMBER, TEAM};

    #[test]
    fn identifier_is_first_field() {
        assert_eq!(MEMBER.id_field().column, "member_id");
        assert_eq!(TEAM.id_field().column, "team_id");
    }

    #[test]
    fn member_relation_targets_team_mapping() {
        let relation = MEMBER.relation("team").unwrap();
        assert_eq!(relation.target.table, "teams");
        assert_eq!(relation.join_column, "team_id");
    }

    #[test]
    fn entity_lookup_is_case_sensitive() {
        assert!(entity_by_name("Member").is_some());
        assert!(entity_by_name("member").is_none());
    }
}
