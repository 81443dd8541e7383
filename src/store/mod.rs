//! Metadata store: repositories, changes, bookmarks, and file lists in
//! SQLite. Queries are free functions over a `&Connection` so they compose
//! under a `rusqlite::Transaction`.

pub mod queries;
mod schema;
mod sqlite;

pub use sqlite::SqliteStore;
