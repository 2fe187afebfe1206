//! Storage layer - SQLite
//!
//! - `database`: connection pool management and initialization
//! - `migrations`: schema versioning and automatic migration
//!
//! ```ignore
//! use cairn_core::storage::Database;
//!
//! let db = Database::in_memory().await?;
//! let pool = db.pool().clone();
//! ```

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig, default_database_path};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
