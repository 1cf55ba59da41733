//! Repository facades over the session and query layers.
//!
//! # Responsibility
//! - Offer CRUD plus declared query methods per entity type.
//! - Keep method tables static so plans are parsed once per process.
//!
//! # Invariants
//! - Repository writes run entity validation before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `NonUnique`,
//!   `StateConflict`) in addition to storage errors.

pub mod entity_repo;
pub mod error;
pub mod member_repo;
pub mod team_repo;

pub use entity_repo::EntityRepository;
pub use error::{RepoError, RepoResult, ValidationError};
pub use member_repo::{member_registry, MemberRepository, MEMBER_METHODS};
pub use team_repo::{team_registry, TeamRepository, TEAM_METHODS};
