use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::runtime::Runtime;

use crate::error::StorageError;
use crate::storage_traits::{
    validate_read, HistoryIterator, KeyModification, Version, VersionedValue, WorldState,
    WorldStateIterator, WriteBatch,
};

/// A SQLite-based implementation of the WorldState interface using sqlx.
///
/// `world_state` holds the live value of each key, `key_history` every write
/// ever committed (tombstones included) and `ledger_meta` the commit height.
pub struct SqliteWorldState {
    pool: SqlitePool,
    rt: Arc<Runtime>,
    db_path: PathBuf,
}

impl SqliteWorldState {
    /// Creates a new SQLite world state
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();
        let db_url = format!("sqlite:{}", db_path.to_string_lossy());

        // Create a runtime for async operations
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(Arc::new)
            .context("Failed to create runtime")?;

        // Connect options
        let options = SqliteConnectOptions::from_str(&db_url)
            .with_context(|| format!("Invalid database URL: {}", db_url))?
            .create_if_missing(true);

        // A single connection serializes commits, which read validation relies on
        let pool = rt
            .block_on(async {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(options)
                    .await
            })
            .context("Failed to connect to database")?;

        rt.block_on(Self::initialize_schema(&pool))
            .context("Failed to initialize database schema")?;

        log::info!("Opened SQLite world state at {}", db_path.display());

        Ok(Self { pool, rt, db_path })
    }

    /// Creates the necessary tables in the database
    async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        // Live values
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS world_state (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                version INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Append-only history, tombstones stored with a NULL value
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS key_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                version INTEGER NOT NULL,
                tx_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                value BLOB
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_key_history_key
             ON key_history(key, seq)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ledger_meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                height INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO ledger_meta (id, height) VALUES (0, 0)")
            .execute(pool)
            .await?;

        Ok(())
    }

    fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| StorageError::Serialization(format!("Invalid timestamp {:?}: {}", raw, e)))
    }

    async fn commit_async(&self, batch: &WriteBatch) -> Result<Version, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start database transaction")?;

        for (key, observed) in &batch.reads {
            let current: Option<i64> = sqlx::query("SELECT version FROM world_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .with_context(|| format!("Failed to read version of key {:?}", key))?
                .map(|row| row.get(0));
            validate_read(key, *observed, current.map(|v| v as Version))?;
        }

        let height: i64 = sqlx::query("SELECT height FROM ledger_meta WHERE id = 0")
            .fetch_one(&mut *tx)
            .await
            .context("Failed to read ledger height")?
            .get(0);
        let version = height + 1;
        let timestamp = Self::format_timestamp(&batch.timestamp);

        for (key, value) in &batch.writes {
            match value {
                Some(value) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO world_state (key, value, version) VALUES (?, ?, ?)",
                    )
                    .bind(key)
                    .bind(value)
                    .bind(version)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to store key {:?}", key))?;
                }
                None => {
                    sqlx::query("DELETE FROM world_state WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .with_context(|| format!("Failed to delete key {:?}", key))?;
                }
            }

            sqlx::query(
                "INSERT INTO key_history (key, version, tx_id, timestamp, value) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(key)
            .bind(version)
            .bind(&batch.tx_id)
            .bind(&timestamp)
            .bind(value.as_deref())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to append history for key {:?}", key))?;
        }

        sqlx::query("UPDATE ledger_meta SET height = ? WHERE id = 0")
            .bind(version)
            .execute(&mut *tx)
            .await
            .context("Failed to advance ledger height")?;

        tx.commit()
            .await
            .context("Failed to commit database transaction")?;

        Ok(version as Version)
    }
}

impl WorldState for SqliteWorldState {
    fn get_state(&self, key: &str) -> Result<Option<VersionedValue>, StorageError> {
        self.rt.block_on(async {
            let row = sqlx::query("SELECT value, version FROM world_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to fetch key {:?}", key))?;

            Ok(row.map(|row| VersionedValue {
                value: row.get(0),
                version: row.get::<i64, _>(1) as Version,
            }))
        })
    }

    fn scan_range(&self, start: &str, end: &str) -> Box<dyn WorldStateIterator + '_> {
        // One statement reads a consistent snapshot of the whole range
        let rows = self.rt.block_on(async {
            sqlx::query(
                "SELECT key, value FROM world_state
                 WHERE key >= ? AND (? = '' OR key < ?)
                 ORDER BY key",
            )
            .bind(start)
            .bind(end)
            .bind(end)
            .fetch_all(&self.pool)
            .await
        });

        match rows {
            Ok(rows) => Box::new(
                rows.into_iter()
                    .map(|row| Ok((row.get::<String, _>(0), row.get::<Vec<u8>, _>(1))))
                    .collect::<Vec<Result<(String, Vec<u8>), StorageError>>>()
                    .into_iter(),
            ),
            Err(e) => Box::new(std::iter::once(Err(StorageError::from(e)))),
        }
    }

    fn history_for_key(&self, key: &str) -> Box<dyn HistoryIterator + '_> {
        let rows = self.rt.block_on(async {
            sqlx::query(
                "SELECT tx_id, timestamp, version, value FROM key_history
                 WHERE key = ? ORDER BY seq",
            )
            .bind(key)
            .fetch_all(&self.pool)
            .await
        });

        match rows {
            Ok(rows) => Box::new(
                rows.into_iter()
                    .map(|row| -> Result<KeyModification, StorageError> {
                        let raw_timestamp: String = row.get(1);
                        Ok(KeyModification {
                            tx_id: row.get(0),
                            timestamp: Self::parse_timestamp(&raw_timestamp)?,
                            version: row.get::<i64, _>(2) as Version,
                            value: row.get(3),
                        })
                    })
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Err(e) => Box::new(std::iter::once(Err(StorageError::from(e)))),
        }
    }

    fn commit(&self, batch: &WriteBatch) -> Result<Version, StorageError> {
        let version = self.rt.block_on(self.commit_async(batch))?;
        log::debug!(
            "Committed tx {} at height {} ({} writes)",
            batch.tx_id,
            version,
            batch.writes.len()
        );
        Ok(version)
    }

    fn height(&self) -> Result<Version, StorageError> {
        self.rt.block_on(async {
            let height: i64 = sqlx::query("SELECT height FROM ledger_meta WHERE id = 0")
                .fetch_one(&self.pool)
                .await
                .context("Failed to read ledger height")?
                .get(0);
            Ok(height as Version)
        })
    }
}

impl std::fmt::Debug for SqliteWorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWorldState")
            .field("db_path", &self.db_path)
            .finish()
    }
}
