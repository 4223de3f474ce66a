//! SQLite repository
//!
//! Persists job, task and trigger records so future triggers survive a
//! restart.

mod migrations;
mod queries;
mod rows;


use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};

/// SQLite-backed repository
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pub(super) pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Open (creating if needed) the database at `path`
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::InvalidConfig(format!("Failed to create directory: {}", e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repository = Self { pool };
        repository.migrate().await?;
        info!(path = %path.display(), "SQLite repository opened");
        Ok(repository)
    }

    /// Open a private in-memory database.
    ///
    /// Uses a single connection: every SQLite in-memory connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repository = Self { pool };
        repository.migrate().await?;
        Ok(repository)
    }
}
