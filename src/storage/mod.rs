//! Storage module for the local SQLite database: session and brief cache.

pub(crate) mod database;
pub mod briefs;
pub mod session;

pub use database::Database;
pub use session::{MemoryVault, PersistedSession, SessionVault, SqliteVault};
