use deadpool::managed::{self, Pool, RecycleError, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

/// Hands out connections to one libsql database, local file or remote
pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.database.connect()
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        // A dropped remote connection surfaces here instead of in the next write.
        let mut rows = conn.query("SELECT 1", ()).await?;
        match rows.next().await? {
            Some(_) => Ok(()),
            None => Err(RecycleError::Message("liveness query returned no rows".into())),
        }
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Build a pool holding at most `max_size` connections
pub fn build_pool(database: Database, max_size: usize) -> anyhow::Result<LibsqlPool> {
    Ok(Pool::builder(LibsqlManager::new(database)).max_size(max_size).build()?)
}
