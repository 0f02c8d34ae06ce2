use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use libsql::params;

use super::models::{ResultRow, TargetId, TargetRow, i64_to_timestamp, timestamp_to_i64};
use crate::config::DatabaseLocation;
use crate::monitoring::types::ResultRecord;
use crate::pool::{LibsqlManager, LibsqlPool, build_pool};

/// Storage collaborator of the monitor
///
/// Implementations need not support concurrent writers, the scheduler writes
/// one result at a time.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a target or update the alias of a known address, returning its id
    async fn ensure_target(&self, address: &str, alias: &str) -> Result<TargetId>;

    /// Persist the outcome of one probe
    async fn record_result(&self, target_id: TargetId, record: &ResultRecord) -> Result<()>;

    /// Get a target by id
    async fn get_target(&self, target_id: TargetId) -> Result<Option<TargetRow>>;

    /// Get the most recent results of a target, newest first
    async fn recent_results(&self, target_id: TargetId, limit: usize) -> Result<Vec<ResultRow>>;
}

/// Open the database behind a configured location
pub async fn open_database(location: &DatabaseLocation) -> Result<libsql::Database> {
    match location {
        DatabaseLocation::Local(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            libsql::Builder::new_local(path)
                .build()
                .await
                .with_context(|| format!("Failed to open database {}", path.display()))
        }
        DatabaseLocation::Remote { url, auth_token } => libsql::Builder::new_remote(url.clone(), auth_token.clone())
            .build()
            .await
            .with_context(|| format!("Failed to connect to {url}")),
    }
}

/// LibSQL storage implementation
pub struct LibsqlStorage {
    pool: LibsqlPool,
}

impl LibsqlStorage {
    /// Create a new storage instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    pub fn new(database: libsql::Database, max_connections: usize) -> Result<Self> {
        Ok(Self::new_from_pool(build_pool(database, max_connections)?))
    }

    /// Get a connection from the pool
    pub async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("Failed to get database connection: {e}"))
    }
}

#[async_trait]
impl Storage for LibsqlStorage {
    async fn ensure_target(&self, address: &str, alias: &str) -> Result<TargetId> {
        let conn = self.get_conn().await?;
        let now = timestamp_to_i64(chrono::Utc::now());

        conn.execute(
            "INSERT INTO targets (address, alias, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (address) DO UPDATE SET alias = excluded.alias, updated_at = excluded.updated_at
             WHERE targets.alias <> excluded.alias",
            params![address, alias, now, now],
        )
        .await?;

        let mut rows = conn.query("SELECT id FROM targets WHERE address = ?", params![address]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| anyhow!("Target {} vanished right after upsert", address))?;

        Ok(TargetId(row.get(0)?))
    }

    async fn record_result(&self, target_id: TargetId, record: &ResultRecord) -> Result<()> {
        let conn = self.get_conn().await?;
        let timestamp = timestamp_to_i64(record.timestamp);

        let tx = conn.transaction().await?;
        tx.execute(
            "INSERT INTO ping_results (timestamp, target_id, success) VALUES (?, ?, ?)",
            params![timestamp, target_id.0, i64::from(record.succeeded)],
        )
        .await?;

        if record.succeeded {
            tx.execute(
                "INSERT INTO ping_stats (timestamp, target_id, rtt_min, rtt_max, rtt_avg) VALUES (?, ?, ?, ?, ?)",
                params![timestamp, target_id.0, record.rtt_min, record.rtt_max, record.rtt_avg],
            )
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn get_target(&self, target_id: TargetId) -> Result<Option<TargetRow>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, address, alias, created_at, updated_at FROM targets WHERE id = ?",
                params![target_id.0],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(TargetRow {
                id: TargetId(row.get(0)?),
                address: row.get(1)?,
                alias: row.get(2)?,
                created_at: i64_to_timestamp(row.get(3)?),
                updated_at: i64_to_timestamp(row.get(4)?),
            }))
        } else {
            Ok(None)
        }
    }

    async fn recent_results(&self, target_id: TargetId, limit: usize) -> Result<Vec<ResultRow>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT r.timestamp, r.success, s.rtt_min, s.rtt_avg, s.rtt_max
                 FROM ping_results r
                 LEFT JOIN ping_stats s ON s.target_id = r.target_id AND s.timestamp = r.timestamp
                 WHERE r.target_id = ?
                 ORDER BY r.timestamp DESC, r.id DESC
                 LIMIT ?",
                params![target_id.0, limit as i64],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(ResultRow {
                timestamp: i64_to_timestamp(row.get(0)?),
                succeeded: row.get::<i64>(1)? != 0,
                rtt_min: row.get(2)?,
                rtt_avg: row.get(3)?,
                rtt_max: row.get(4)?,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::monitoring::types::{ProbeOutcome, RttStats};

    pub(crate) async fn create_test_storage(dir: &tempfile::TempDir) -> Result<LibsqlStorage> {
        let location = DatabaseLocation::Local(dir.path().join("data/test.db"));
        let database = open_database(&location).await?;
        let storage = LibsqlStorage::new(database, 1)?;

        let conn = storage.get_conn().await?;
        crate::database::initialize_database(&conn).await?;
        drop(conn);

        Ok(storage)
    }

    #[tokio::test]
    async fn test_ensure_target_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = create_test_storage(&dir).await?;

        let first = storage.ensure_target("192.168.1.1", "router").await?;
        let second = storage.ensure_target("192.168.1.1", "gateway").await?;
        assert_eq!(first, second);

        let row = storage.get_target(first).await?.expect("target exists");
        assert_eq!(row.address, "192.168.1.1");
        assert_eq!(row.alias, "gateway");

        let other = storage.ensure_target("8.8.8.8", "internet").await?;
        assert_ne!(other, first);

        assert!(storage.get_target(TargetId(9999)).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_updated_at_tracks_alias_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = create_test_storage(&dir).await?;

        let id = storage.ensure_target("8.8.8.8", "internet").await?;
        let registered = storage.get_target(id).await?.expect("target exists");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        storage.ensure_target("8.8.8.8", "internet").await?;
        assert_eq!(storage.get_target(id).await?.expect("target exists"), registered);

        storage.ensure_target("8.8.8.8", "google").await?;
        let renamed = storage.get_target(id).await?.expect("target exists");
        assert_eq!(renamed.created_at, registered.created_at);
        assert!(renamed.updated_at > registered.updated_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_ids_survive_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let id = {
            let storage = create_test_storage(&dir).await?;
            storage.ensure_target("8.8.8.8", "internet").await?
        };

        let storage = create_test_storage(&dir).await?;
        assert_eq!(storage.ensure_target("8.8.8.8", "internet").await?, id);
        Ok(())
    }

    #[tokio::test]
    async fn test_record_result() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = create_test_storage(&dir).await?;
        let id = storage.ensure_target("8.8.8.8", "internet").await?;

        let first = chrono::Utc::now();
        let second = first + chrono::Duration::seconds(20);
        let rtt = RttStats { min: 10.5, avg: 12.25, max: 14.0 };

        storage.record_result(id, &ResultRecord::new(first, &ProbeOutcome::success(rtt))).await?;
        storage.record_result(id, &ResultRecord::new(second, &ProbeOutcome::failure())).await?;

        let results = storage.recent_results(id, 10).await?;
        assert_eq!(results.len(), 2);

        assert!(!results[0].succeeded);
        assert_eq!(results[0].rtt_avg, None);
        assert_eq!(timestamp_to_i64(results[0].timestamp), timestamp_to_i64(second));

        assert!(results[1].succeeded);
        assert_eq!((results[1].rtt_min, results[1].rtt_avg, results[1].rtt_max), (Some(10.5), Some(12.25), Some(14.0)));

        assert_eq!(storage.recent_results(id, 1).await?.len(), 1);
        Ok(())
    }
}
