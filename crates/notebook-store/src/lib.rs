//! # notebook-store
//!
//! Persistent storage for notebook contact records, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for [`Note`]
//! records, including partial updates that may rename a record's id.

pub mod database;
pub mod migrations;
pub mod models;
pub mod notes;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
