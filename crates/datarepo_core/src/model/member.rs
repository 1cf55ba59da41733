//! Member entity and its relationship operations.
//!
//! # Responsibility
//! - Own the member-side foreign key (`team_id`).
//! - Keep the owning team's in-memory collection in step with that key.
//!
//! # Invariants
//! - `key` is generated once and never reused for another member.
//! - `Member::create` always registers the member in the team's collection.
//! - A member that joined a team before the team was saved fails validation
//!   until it rejoins the saved team.
//! - `team`, when present, is a fetched copy of the team `team_id` points at.

use crate::model::team::{Team, TeamId};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Storage-assigned member identifier.
pub type MemberId = i64;

/// Construction-time key used by a team's member collection.
pub type MemberKey = Uuid;

/// Domain validation errors for members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberValidationError {
    /// The relationship-establishing constructor got no team.
    MissingTeam,
    /// The joined team had no storage identifier when the member was saved.
    TeamNotPersisted,
    BlankUsername,
    NegativeAge(i32),
    NilKey,
}

impl Display for MemberValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTeam => write!(f, "team is null"),
            Self::TeamNotPersisted => {
                write!(f, "team must be saved before members can join it")
            }
            Self::BlankUsername => write!(f, "username must not be blank"),
            Self::NegativeAge(age) => write!(f, "age must not be negative, got {age}"),
            Self::NilKey => write!(f, "member key must not be nil"),
        }
    }
}

impl Error for MemberValidationError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub(crate) id: Option<MemberId>,
    pub(crate) key: MemberKey,
    pub(crate) username: String,
    pub(crate) age: i32,
    pub(crate) team_id: Option<TeamId>,
    /// Joined a team that had not been saved yet.
    #[serde(default)]
    pub(crate) team_pending: bool,
    /// Populated only by entity-graph fetches.
    #[serde(skip)]
    pub(crate) team: Option<Box<Team>>,
}

impl Member {
    /// Creates a member that belongs to no team.
    pub fn new(username: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            key: Uuid::new_v4(),
            username: username.into(),
            age,
            team_id: None,
            team_pending: false,
            team: None,
        }
    }

    /// Creates a member and joins `team` in one step.
    ///
    /// The team may still be unsaved; saving the member then fails with
    /// `TeamNotPersisted` until [`Member::change_team`] is called again with
    /// the saved team.
    ///
    /// # Errors
    /// - `MissingTeam` when `team` is `None`.
    pub fn create(
        username: impl Into<String>,
        age: i32,
        team: Option<&mut Team>,
    ) -> Result<Self, MemberValidationError> {
        let team = team.ok_or(MemberValidationError::MissingTeam)?;
        let mut member = Self::new(username, age);
        member.change_team(team);
        Ok(member)
    }

    pub(crate) fn hydrate(
        id: MemberId,
        key: MemberKey,
        username: String,
        age: i32,
        team_id: Option<TeamId>,
    ) -> Self {
        Self {
            id: Some(id),
            key,
            username,
            age,
            team_id,
            team_pending: false,
            team: None,
        }
    }

    pub fn id(&self) -> Option<MemberId> {
        self.id
    }

    pub fn key(&self) -> MemberKey {
        self.key
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn age(&self) -> i32 {
        self.age
    }

    pub fn team_id(&self) -> Option<TeamId> {
        self.team_id
    }

    /// True while the joined team has no storage identifier.
    pub fn has_unsaved_team(&self) -> bool {
        self.team_pending && self.team_id.is_none()
    }

    /// Team fetched together with this member, if the query asked for it.
    pub fn fetched_team(&self) -> Option<&Team> {
        self.team.as_deref()
    }

    /// Points this member at `team` and registers it in the team's collection.
    pub fn change_team(&mut self, team: &mut Team) {
        self.team_id = team.id();
        self.team_pending = team.id().is_none();
        self.team = None;
        team.add_member(self.key);
    }

    /// Detaches this member from `team` on both sides.
    ///
    /// No-op when the member does not currently reference `team`.
    pub fn leave_team(&mut self, team: &mut Team) {
        let current = match team.id() {
            Some(id) => self.team_id == Some(id),
            None => self.has_unsaved_team() && team.contains_member(self.key),
        };
        if current {
            self.team_id = None;
            self.team_pending = false;
            self.team = None;
        }
        team.remove_member(self.key);
    }

    pub fn change_name(&mut self, username: impl Into<String>) {
        self.username = username.into();
    }

    pub fn validate(&self) -> Result<(), MemberValidationError> {
        if self.key.is_nil() {
            return Err(MemberValidationError::NilKey);
        }
        if self.username.trim().is_empty() {
            return Err(MemberValidationError::BlankUsername);
        }
        if self.age < 0 {
            return Err(MemberValidationError::NegativeAge(self.age));
        }
        if self.has_unsaved_team() {
            return Err(MemberValidationError::TeamNotPersisted);
        }
        Ok(())
    }

    pub(crate) fn assign_id(&mut self, id: MemberId) {
        self.id = Some(id);
    }

    pub(crate) fn attach_fetched_team(&mut self, team: Team) {
        self.team = Some(Box::new(team));
    }
}
