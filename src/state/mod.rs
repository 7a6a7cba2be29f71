//! State management module
//!
//! This module holds the whole catalog core:
//! - Database-backed record store (library.rs, store.rs)
//! - Shared data structures (data.rs)
//! - Scoped edit sessions with undo/redo (session.rs)
//! - Live grouped projection and view deltas (catalog.rs)
//! - Error types (error.rs)

pub mod catalog;
pub mod data;
pub mod error;
pub mod library;
pub mod session;
pub mod store;
