//! Persistent state module
//!
//! - Shared data structures and the sidecar format (data.rs)
//! - SQLite index of assets and their tags (index.rs)

pub mod data;
pub mod index;
