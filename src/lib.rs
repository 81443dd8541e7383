//! # Skiff
//!
//! A centralized change-based version control server, usable both as a
//! standalone binary and as a library.
//!
//! Clients keep exactly one mutable working change per (user, machine,
//! repository) and continuously synchronize it over signed RPCs. All
//! repository state lives on the server: metadata (the change DAG,
//! bookmarks, file lists) in SQLite, file contents in a content-addressed
//! blob store. A change becomes immutable the moment it gains a child;
//! merging two parents runs a per-file three-way merge with text conflicts
//! marked inline and binary conflicts forked into sibling files.

pub mod config;
pub mod content;
pub mod error;
pub mod merge;
pub mod protos;
pub mod server;
pub mod signed;
pub mod store;
pub mod text;
pub mod types;
