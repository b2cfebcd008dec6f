//! Identity lookups the relay consumes: login sessions and user records.
//!
//! Each store is an async trait with an in-memory implementation (tests,
//! embedding) and a SQLite one sharing a single [`Database`].

pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use sessions::{MemorySessionStore, SessionRecord, SessionStore, SqliteSessionStore};
pub use users::{MemoryUserStore, SqliteUserStore, UserRecord, UserStore};
