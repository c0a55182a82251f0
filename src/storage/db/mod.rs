//! Database connection layer.
//!
//! Currently supports SQLite through sqlx. The pool wrapper owns connection
//! options and migrations; queries live in [`crate::storage::SqliteStore`].
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite:data/fleetwatch.db?mode=rwc").await?;
//! pool.migrate().await?;
//! ```

mod sqlite;

pub use sqlite::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
