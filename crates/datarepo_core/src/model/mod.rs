//! Entity model for the Team/Member aggregate.
//!
//! # Responsibility
//! - Define the persisted records and their in-memory relationship rules.
//! - Validate domain invariants before anything reaches storage.
//!
//! # Invariants
//! - Storage identifiers are absent before first save and never change after.
//! - Team and Member reference each other by identifier/key, never by pointer.

pub mod dto;
pub mod member;
pub mod team;
