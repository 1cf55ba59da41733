//! Query execution against a session.
//!
//! # Responsibility
//! - Bind arguments into resolved plans and run them.
//! - Keep select execution ([`executor`]) apart from bulk statements
//!   ([`bulk`]), which bypass the identity cache.

pub mod args;
pub mod bulk;
pub mod executor;

pub use args::{ArgValue, Args};
