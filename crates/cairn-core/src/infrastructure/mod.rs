//! Infrastructure layer
//!
//! SQLite implementations of the domain repository traits.

pub mod community;
pub mod knowledge;
