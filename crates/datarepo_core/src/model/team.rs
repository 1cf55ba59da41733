//! Team entity.
//!
//! # Invariants
//! - `members` holds member keys in join order, without duplicates.
//! - `name` is never blank.

use crate::model::member::MemberKey;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage-assigned team identifier.
pub type TeamId = i64;

/// Validation errors for team records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamValidationError {
    BlankName,
}

impl Display for TeamValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "team name must not be blank"),
        }
    }
}

impl Error for TeamValidationError {}

/// One side of the Team ↔ Member relationship.
///
/// The member collection is the inverse side: it mirrors `members.team_id`
/// and is never written to storage on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub(crate) id: Option<TeamId>,
    pub name: String,
    pub(crate) members: Vec<MemberKey>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub(crate) fn hydrate(id: TeamId, name: String, members: Vec<MemberKey>) -> Self {
        Self {
            id: Some(id),
            name,
            members,
        }
    }

    pub fn id(&self) -> Option<TeamId> {
        self.id
    }

    /// Keys of members that joined this team, in join order.
    pub fn members(&self) -> &[MemberKey] {
        &self.members
    }

    pub fn contains_member(&self, key: MemberKey) -> bool {
        self.members.contains(&key)
    }

    pub fn validate(&self) -> Result<(), TeamValidationError> {
        if self.name.trim().is_empty() {
            return Err(TeamValidationError::BlankName);
        }
        Ok(())
    }

    pub(crate) fn add_member(&mut self, key: MemberKey) {
        if !self.members.contains(&key) {
            self.members.push(key);
        }
    }

    pub(crate) fn remove_member(&mut self, key: MemberKey) {
        self.members.retain(|current| *current != key);
    }

    pub(crate) fn assign_id(&mut self, id: TeamId) {
        self.id = Some(id);
    }
}
