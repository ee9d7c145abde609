//! libSQL run ledger and lease store.
//!
//! The [`Storage`] struct wraps a local libSQL database holding:
//! - a history of classify/sync runs and their summary stats
//! - per-record sync outcomes for each run
//! - short-lived leases that keep overlapping runs from upserting the same id
//!
//! **Access rules:**
//! - pipelines: read-write via [`Storage::open`]
//! - `history` command: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use intakesync_shared::{IntakeSyncError, Result};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// A row of `sync_runs`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRow {
    pub id: String,
    /// `"classify"` or `"sync"`.
    pub pipeline: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

/// A row of `record_outcomes`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRow {
    pub record_id: u32,
    /// `"created"`, `"updated"`, `"skipped"` or `"failed"`.
    pub outcome: String,
    pub page_id: Option<String>,
    pub detail: Option<String>,
}

fn storage_err(e: libsql::Error) -> IntakeSyncError {
    IntakeSyncError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IntakeSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IntakeSyncError::Storage(format!(
                "ledger not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        IntakeSyncError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(IntakeSyncError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a pipeline run. Returns the generated run ID.
    pub async fn insert_run(&self, pipeline: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO sync_runs (id, pipeline, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), pipeline, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a run finished and attach its summary.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE sync_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, pipeline, started_at, finished_at, stats_json
                 FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RunRow {
                id: row.get::<String>(0).map_err(storage_err)?,
                pipeline: row.get::<String>(1).map_err(storage_err)?,
                started_at: row.get::<String>(2).map_err(storage_err)?,
                finished_at: row.get::<String>(3).ok(),
                stats_json: row.get::<String>(4).ok(),
            });
        }
        Ok(results)
    }

    /// Store the outcome of syncing one record.
    pub async fn insert_outcome(
        &self,
        run_id: &str,
        record_id: u32,
        outcome: &str,
        page_id: Option<&str>,
        detail: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO record_outcomes (run_id, record_id, outcome, page_id, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, record_id, outcome, page_id, detail],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Outcomes of one run, in the order they were recorded.
    pub async fn outcomes_for_run(&self, run_id: &str) -> Result<Vec<OutcomeRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT record_id, outcome, page_id, detail
                 FROM record_outcomes WHERE run_id = ?1 ORDER BY id",
                params![run_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let record_id: i64 = row.get(0).map_err(storage_err)?;
            results.push(OutcomeRow {
                record_id: u32::try_from(record_id).map_err(|_| {
                    IntakeSyncError::Storage(format!("record id out of range: {record_id}"))
                })?,
                outcome: row.get::<String>(1).map_err(storage_err)?,
                page_id: row.get::<String>(2).ok(),
                detail: row.get::<String>(3).ok(),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Try to take the lease on `key` for `owner` until `ttl` from now.
    ///
    /// Succeeds when the key is free, expired, or already held by `owner`
    /// (which extends it). Returns `false` when another live owner holds it.
    pub async fn try_acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_ms);

        let changed = self
            .conn
            .execute(
                "INSERT INTO leases (key, owner, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   owner = excluded.owner,
                   expires_at = excluded.expires_at
                 WHERE leases.expires_at <= ?4 OR leases.owner = excluded.owner",
                params![key, owner, expires_at, now],
            )
            .await
            .map_err(storage_err)?;

        Ok(changed > 0)
    }

    /// Extend the lease on `key` only if `owner` still holds it.
    ///
    /// Unlike [`Self::try_acquire_lease`], this never takes over a lease: it
    /// fails once the row was released or passed to another owner, even if
    /// that owner's lease has since expired.
    pub async fn renew_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let changed = self
            .conn
            .execute(
                "UPDATE leases SET expires_at = ?3 WHERE key = ?1 AND owner = ?2",
                params![key, owner, now.saturating_add(ttl_ms)],
            )
            .await
            .map_err(storage_err)?;

        Ok(changed > 0)
    }

    /// Release `key` if `owner` still holds it.
    pub async fn release_lease(&self, key: &str, owner: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM leases WHERE key = ?1 AND owner = ?2",
                params![key, owner],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Current holder of `key`, ignoring expiry.
    pub async fn lease_owner(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT owner FROM leases WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("is_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("is_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn run_lifecycle_and_outcomes() {
        let storage = test_storage().await;

        let run_id = storage.insert_run("sync").await.expect("insert run");
        assert!(!run_id.is_empty());

        storage
            .insert_outcome(&run_id, 3, "created", Some("page-3"), None)
            .await
            .expect("outcome 3");
        storage
            .insert_outcome(&run_id, 4, "failed", None, Some("query: HTTP 502"))
            .await
            .expect("outcome 4");
        storage
            .finish_run(&run_id, r#"{"created":1,"failed":1}"#)
            .await
            .expect("finish run");

        let runs = storage.list_runs(10).await.expect("list runs");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pipeline, "sync");
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].stats_json.as_deref().unwrap_or("").contains("created"));

        let outcomes = storage.outcomes_for_run(&run_id).await.expect("outcomes");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].record_id, 3);
        assert_eq!(outcomes[0].page_id.as_deref(), Some("page-3"));
        assert_eq!(outcomes[1].outcome, "failed");
        assert!(outcomes[1].page_id.is_none());
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let storage = test_storage().await;
        let ttl = Duration::from_secs(60);

        assert!(storage.try_acquire_lease("db:3", "run-a", ttl).await.unwrap());
        assert!(!storage.try_acquire_lease("db:3", "run-b", ttl).await.unwrap());
        // Re-entrant for the same owner.
        assert!(storage.try_acquire_lease("db:3", "run-a", ttl).await.unwrap());
        // Other keys are independent.
        assert!(storage.try_acquire_lease("db:4", "run-b", ttl).await.unwrap());

        // Only the holder can release.
        storage.release_lease("db:3", "run-b").await.unwrap();
        assert_eq!(storage.lease_owner("db:3").await.unwrap().as_deref(), Some("run-a"));

        storage.release_lease("db:3", "run-a").await.unwrap();
        assert!(storage.lease_owner("db:3").await.unwrap().is_none());
        assert!(storage.try_acquire_lease("db:3", "run-b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let storage = test_storage().await;

        assert!(
            storage
                .try_acquire_lease("db:9", "crashed-run", Duration::ZERO)
                .await
                .unwrap()
        );
        assert!(
            storage
                .try_acquire_lease("db:9", "next-run", Duration::from_secs(60))
                .await
                .unwrap()
        );
        assert_eq!(
            storage.lease_owner("db:9").await.unwrap().as_deref(),
            Some("next-run")
        );
    }

    #[tokio::test]
    async fn renew_fails_after_takeover() {
        let storage = test_storage().await;
        let ttl = Duration::from_secs(60);

        assert!(storage.try_acquire_lease("db:5", "run-a", Duration::ZERO).await.unwrap());
        // Expired but untouched: the holder may still extend it.
        assert!(storage.renew_lease("db:5", "run-a", ttl).await.unwrap());

        storage.release_lease("db:5", "run-a").await.unwrap();
        assert!(!storage.renew_lease("db:5", "run-a", ttl).await.unwrap());

        assert!(storage.try_acquire_lease("db:5", "run-b", Duration::ZERO).await.unwrap());
        assert!(!storage.renew_lease("db:5", "run-a", ttl).await.unwrap());
        assert_eq!(
            storage.lease_owner("db:5").await.unwrap().as_deref(),
            Some("run-b")
        );
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("is_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_run("classify").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_runs(5).await.unwrap().len(), 1);
        let result = ro.insert_run("sync").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("is_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
