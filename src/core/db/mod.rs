//! Database layer for persistence using Diesel ORM.
//!
//! The gateway keeps two independent SQLite files: one for broker access
//! tokens and one for paper orders/fills. Each store embeds and runs its own
//! migrations, so opening a store is always schema-idempotent.

pub mod model;
pub mod schema;

use std::path::Path;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::SqliteConnection;

use crate::error::{Error, Result};

/// Database connection pool type alias.
pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Create a connection pool for the given database path, creating parent
/// directories as needed.
///
/// # Errors
/// Returns an error if the pool cannot be created.
pub fn create_pool(database_path: &str) -> Result<DbPool> {
    if let Some(parent) = Path::new(database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let manager = ConnectionManager::<SqliteConnection>::new(database_path);
    Pool::builder()
        .max_size(5)
        .build(manager)
        .map_err(|e| Error::Connection(e.to_string()))
}
