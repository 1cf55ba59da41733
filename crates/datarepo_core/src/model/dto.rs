//! Read-only projections assembled from query rows.

use crate::model::member::{Member, MemberId};
use crate::repo::error::RepoResult;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// A record built by a constructor-expression query.
///
/// `TYPE_NAME` must equal the unqualified type named after `NEW` and `ARITY`
/// the number of constructor arguments.
pub trait Projected: Sized {
    const TYPE_NAME: &'static str;
    const ARITY: usize;

    fn from_row(row: &Row<'_>) -> RepoResult<Self>;
}

/// Member projection joined with its team name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDto {
    pub id: MemberId,
    pub username: String,
    pub team_name: Option<String>,
}

impl MemberDto {
    pub fn new(id: MemberId, username: impl Into<String>, team_name: Option<String>) -> Self {
        Self {
            id,
            username: username.into(),
            team_name,
        }
    }

    /// Builds a projection from an entity and an already-resolved team name.
    ///
    /// Returns `None` for members that were never saved.
    pub fn from_member(member: &Member, team_name: Option<String>) -> Option<Self> {
        Some(Self::new(member.id()?, member.username(), team_name))
    }
}

impl Projected for MemberDto {
    const TYPE_NAME: &'static str = "MemberDto";
    const ARITY: usize = 3;

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self::new(row.get(0)?, row.get::<_, String>(1)?, row.get(2)?))
    }
}
