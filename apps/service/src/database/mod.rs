//! Database abstraction layer
//!
//! The monitor only talks to the `Storage` trait. `LibsqlStorage` backs it
//! with a local SQLite file or a remote libsql server.

pub mod repository;
pub mod migrations;
pub mod models;
#[cfg(test)]
pub mod memory;

pub use repository::{LibsqlStorage, Storage, open_database};

use anyhow::Result;
use std::path::Path;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Bring the schema up to date, run the optional operator script and make
/// sure every required table exists afterwards.
///
/// A broken script only matters when the schema it was meant to create is
/// genuinely absent.
pub async fn bootstrap_schema(conn: &libsql::Connection, script: Option<&Path>) -> Result<()> {
    initialize_database(conn).await?;

    if let Some(path) = script {
        if let Err(e) = migrations::run_bootstrap_script(conn, path).await {
            tracing::error!("Schema bootstrap script failed: {:#}", e);
        }
    }

    migrations::verify_schema(conn).await
}
