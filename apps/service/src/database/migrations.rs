use anyhow::{Context, Result, bail};
use libsql::Connection;
use std::path::Path;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Tables the monitor cannot run without
const REQUIRED_TABLES: [&str; 3] = ["targets", "ping_results", "ping_stats"];

/// Run database migrations
///
/// Safe to call on every start, an up to date schema is left untouched.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Targets and result tables").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Result indices by target and time").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Execute an operator supplied SQL script.
///
/// The script runs after the built-in migrations, so it should only add to
/// the schema and has to tolerate being run again.
pub async fn run_bootstrap_script(conn: &Connection, path: &Path) -> Result<()> {
    let script = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("SQL file not found: {}", path.display()))?;

    conn.execute_batch(&script)
        .await
        .with_context(|| format!("Failed to execute {}", path.display()))?;

    tracing::info!("Executed build DB SQL script from {} successfully", path.display());
    Ok(())
}

/// Fail if any table the monitor writes to is missing
pub async fn verify_schema(conn: &Connection) -> Result<()> {
    for table in REQUIRED_TABLES {
        let mut rows = conn
            .query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?", libsql::params![table])
            .await?;
        if rows.next().await?.is_none() {
            bail!("Database schema is missing table '{}'", table);
        }
    }
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query("SELECT MAX(version) FROM schema_migrations", ())
        .await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: targets, boolean outcome log and latency log
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            address TEXT NOT NULL UNIQUE,
            alias TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ping_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            target_id INTEGER NOT NULL REFERENCES targets(id),
            success INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ping_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            target_id INTEGER NOT NULL REFERENCES targets(id),
            rtt_min REAL,
            rtt_max REAL,
            rtt_avg REAL
        )",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: lookups by target over time
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ping_results_target_time ON ping_results(target_id, timestamp)",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ping_stats_target_time ON ping_stats(target_id, timestamp)",
        (),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(dir: &tempfile::TempDir) -> Connection {
        let db = libsql::Builder::new_local(dir.path().join("test.db")).build().await.unwrap();
        db.connect().unwrap()
    }

    async fn migration_count(conn: &Connection) -> i64 {
        let mut rows = conn.query("SELECT COUNT(*) FROM schema_migrations", ()).await.unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir).await;

        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        assert_eq!(get_current_version(&conn).await.unwrap(), SCHEMA_VERSION);
        assert_eq!(migration_count(&conn).await, SCHEMA_VERSION as i64);
        verify_schema(&conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_schema_detects_missing_tables() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir).await;

        assert!(verify_schema(&conn).await.is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_script() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir).await;
        run_migrations(&conn).await.unwrap();

        let script = dir.path().join("extra.sql");
        std::fs::write(
            &script,
            "CREATE VIEW IF NOT EXISTS uptime AS SELECT target_id, AVG(success) AS ratio FROM ping_results GROUP BY target_id;",
        )
        .unwrap();

        run_bootstrap_script(&conn, &script).await.unwrap();
        run_bootstrap_script(&conn, &script).await.unwrap();

        assert!(run_bootstrap_script(&conn, &dir.path().join("missing.sql")).await.is_err());
    }
}
