//! Idempotent query-then-upsert of canonical records into the remote database.
//!
//! For each record the synchronizer looks up pages whose `ID` property equals
//! the record id, then updates the first match or creates a page when there is
//! none. Every failure is caught at the phase where it happened and reported
//! in the record's [`RecordOutcome`]; a batch always runs to the end.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use intakesync_notion::{NumberEquals, RemoteDatabase};
use intakesync_shared::CanonicalRequestRecord;

use crate::lease::{LeaseStore, record_key};
use crate::mapping::{PROP_ID, build_properties};
use crate::pipeline::ProgressReporter;
use crate::records::RecordSet;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Step of the per-record protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Lease,
    Query,
    Create,
    Update,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Lease => "lease",
            Self::Query => "query",
            Self::Create => "create",
            Self::Update => "update",
        })
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RecordOutcome {
    Created {
        id: u32,
        page_id: String,
    },
    /// `duplicates` counts extra pages with the same id that were left alone.
    Updated {
        id: u32,
        page_id: String,
        duplicates: usize,
    },
    Skipped {
        id: u32,
        reason: String,
    },
    Failed {
        id: u32,
        phase: SyncPhase,
        error: String,
    },
}

impl RecordOutcome {
    pub fn id(&self) -> u32 {
        match self {
            Self::Created { id, .. }
            | Self::Updated { id, .. }
            | Self::Skipped { id, .. }
            | Self::Failed { id, .. } => *id,
        }
    }

    /// Short label stored in the run ledger.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn page_id(&self) -> Option<&str> {
        match self {
            Self::Created { page_id, .. } | Self::Updated { page_id, .. } => Some(page_id),
            _ => None,
        }
    }

    /// Human-readable detail for skipped and failed records.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Updated { duplicates, .. } if *duplicates > 0 => {
                Some(format!("{duplicates} duplicate page(s) not updated"))
            }
            Self::Skipped { reason, .. } => Some(reason.clone()),
            Self::Failed { phase, error, .. } => Some(format!("{phase}: {error}")),
            _ => None,
        }
    }
}

/// Counts and per-record outcomes of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: RecordOutcome) {
        match &outcome {
            RecordOutcome::Created { .. } => self.created += 1,
            RecordOutcome::Updated { .. } => self.updated += 1,
            RecordOutcome::Skipped { .. } => self.skipped += 1,
            RecordOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Counts only, for the run ledger.
    pub fn stats_json(&self) -> serde_json::Value {
        serde_json::json!({
            "created": self.created,
            "updated": self.updated,
            "skipped": self.skipped,
            "failed": self.failed,
        })
    }
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

struct LeaseGuard {
    store: Arc<dyn LeaseStore>,
    owner: String,
    ttl: Duration,
}

/// Upserts records into one remote database.
pub struct Synchronizer {
    remote: Arc<dyn RemoteDatabase>,
    database_id: String,
    lease: Option<LeaseGuard>,
}

impl Synchronizer {
    pub fn new(remote: Arc<dyn RemoteDatabase>, database_id: impl Into<String>) -> Self {
        Self {
            remote,
            database_id: database_id.into(),
            lease: None,
        }
    }

    /// Hold a lease on `<database_id>:<id>` around each record's upsert.
    pub fn with_leases(
        mut self,
        store: Arc<dyn LeaseStore>,
        owner: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        self.lease = Some(LeaseGuard {
            store,
            owner: owner.into(),
            ttl,
        });
        self
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Synchronize one record.
    #[instrument(skip_all, fields(id = record.id))]
    pub async fn sync(&self, record: &CanonicalRequestRecord) -> RecordOutcome {
        let Some(guard) = &self.lease else {
            return self.upsert(record, None).await;
        };

        let key = record_key(&self.database_id, record.id);
        match guard.store.try_acquire(&key, &guard.owner, guard.ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%key, "lease held by another run, skipping record");
                return RecordOutcome::Skipped {
                    id: record.id,
                    reason: "lease held".into(),
                };
            }
            Err(e) => {
                warn!(%key, error = %e, "lease acquisition failed");
                return RecordOutcome::Failed {
                    id: record.id,
                    phase: SyncPhase::Lease,
                    error: e.to_string(),
                };
            }
        }

        let outcome = self.upsert(record, Some((guard, key.as_str()))).await;

        if let Err(e) = guard.store.release(&key, &guard.owner).await {
            warn!(%key, error = %e, "failed to release lease; it will expire");
        }
        outcome
    }

    /// Synchronize every record in order. Never stops early.
    #[instrument(skip_all, fields(database_id = %self.database_id, records = records.len()))]
    pub async fn sync_batch(
        &self,
        records: &RecordSet,
        progress: &dyn ProgressReporter,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let total = records.len();

        for (i, record) in records.iter().enumerate() {
            let outcome = self.sync(record).await;
            progress.record_synced(&outcome, i + 1, total);
            summary.record(outcome);
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "sync batch complete"
        );
        summary
    }

    /// Query, then create or update. With a lease, it is renewed between the
    /// query and the write; a lease lost during the query skips the write.
    async fn upsert(
        &self,
        record: &CanonicalRequestRecord,
        lease: Option<(&LeaseGuard, &str)>,
    ) -> RecordOutcome {
        let id = record.id;
        let filter = NumberEquals::new(PROP_ID, i64::from(id));

        let matches = match self.remote.query(&self.database_id, &filter).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(id, error = %e, "query failed");
                return RecordOutcome::Failed {
                    id,
                    phase: SyncPhase::Query,
                    error: e.to_string(),
                };
            }
        };

        if let Some((guard, key)) = lease {
            match guard.store.renew(key, &guard.owner, guard.ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(%key, "lease lost while querying, skipping write");
                    return RecordOutcome::Skipped {
                        id,
                        reason: "lease lost".into(),
                    };
                }
                Err(e) => {
                    warn!(%key, error = %e, "lease renewal failed");
                    return RecordOutcome::Failed {
                        id,
                        phase: SyncPhase::Lease,
                        error: e.to_string(),
                    };
                }
            }
        }

        let properties = build_properties(record);

        match matches.split_first() {
            Some((first, rest)) => {
                if !rest.is_empty() {
                    warn!(
                        id,
                        duplicates = rest.len(),
                        page_id = %first.id,
                        "multiple pages share this id; updating the first"
                    );
                }
                match self.remote.update(&first.id, &properties).await {
                    Ok(_) => {
                        debug!(id, page_id = %first.id, "page updated");
                        RecordOutcome::Updated {
                            id,
                            page_id: first.id.clone(),
                            duplicates: rest.len(),
                        }
                    }
                    Err(e) => {
                        warn!(id, page_id = %first.id, error = %e, "update failed");
                        RecordOutcome::Failed {
                            id,
                            phase: SyncPhase::Update,
                            error: e.to_string(),
                        }
                    }
                }
            }
            None => match self.remote.create(&self.database_id, &properties).await {
                Ok(page) => {
                    debug!(id, page_id = %page.id, "page created");
                    RecordOutcome::Created { id, page_id: page.id }
                }
                Err(e) => {
                    warn!(id, error = %e, "create failed");
                    RecordOutcome::Failed {
                        id,
                        phase: SyncPhase::Create,
                        error: e.to_string(),
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use intakesync_notion::{NotionClient, PropertyMap, RemotePage};
    use intakesync_shared::{
        IntakeSyncError, NotionConfig, NotionSettings, RequestType, Result,
    };
    use intakesync_storage::Storage;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::pipeline::SilentProgress;

    /// In-process stand-in for a Notion database.
    #[derive(Default)]
    struct FakeDatabase {
        pages: Mutex<Vec<(String, PropertyMap)>>,
        failing_queries: HashSet<i64>,
        query_delay: Duration,
        creates: Mutex<usize>,
    }

    impl FakeDatabase {
        fn failing_on(ids: &[i64]) -> Self {
            Self {
                failing_queries: ids.iter().copied().collect(),
                ..Self::default()
            }
        }

        fn slow(query_delay: Duration) -> Self {
            Self {
                query_delay,
                ..Self::default()
            }
        }

        fn seed(&self, page_id: &str, id: i64) {
            let mut props = PropertyMap::new();
            props.insert(PROP_ID.into(), json!({ "number": id }));
            self.pages
                .lock()
                .expect("lock")
                .push((page_id.into(), props));
        }

        fn pages_with_id(&self, id: i64) -> Vec<(String, PropertyMap)> {
            self.pages
                .lock()
                .expect("lock")
                .iter()
                .filter(|(_, p)| p[PROP_ID]["number"] == json!(id))
                .cloned()
                .collect()
        }
    }

    fn page(id: &str) -> RemotePage {
        RemotePage { id: id.into() }
    }

    #[async_trait]
    impl RemoteDatabase for FakeDatabase {
        async fn query(&self, _database_id: &str, filter: &NumberEquals) -> Result<Vec<RemotePage>> {
            tokio::time::sleep(self.query_delay).await;
            if self.failing_queries.contains(&filter.equals) {
                return Err(IntakeSyncError::Network("connection reset".into()));
            }
            Ok(self
                .pages_with_id(filter.equals)
                .into_iter()
                .map(|(id, _)| page(&id))
                .collect())
        }

        async fn create(&self, _database_id: &str, properties: &PropertyMap) -> Result<RemotePage> {
            let mut creates = self.creates.lock().expect("lock");
            *creates += 1;
            let page_id = format!("page-{creates}");
            self.pages
                .lock()
                .expect("lock")
                .push((page_id.clone(), properties.clone()));
            Ok(page(&page_id))
        }

        async fn update(&self, page_id: &str, properties: &PropertyMap) -> Result<RemotePage> {
            let mut pages = self.pages.lock().expect("lock");
            let entry = pages
                .iter_mut()
                .find(|(id, _)| id == page_id)
                .ok_or_else(|| IntakeSyncError::Network("HTTP 404".into()))?;
            entry.1 = properties.clone();
            Ok(page(page_id))
        }
    }

    fn record(id: u32, title: &str) -> CanonicalRequestRecord {
        CanonicalRequestRecord::new(id, RequestType::Reimbursement, title, "Ada", "Ops")
    }

    #[tokio::test]
    async fn second_sync_updates_same_page() {
        let db = Arc::new(FakeDatabase::default());
        let sync = Synchronizer::new(db.clone(), "db1");

        let first = sync.sync(&record(3, "Taxi")).await;
        assert_eq!(
            first,
            RecordOutcome::Created {
                id: 3,
                page_id: "page-1".into()
            }
        );

        let second = sync.sync(&record(3, "Taxi to venue")).await;
        assert_eq!(
            second,
            RecordOutcome::Updated {
                id: 3,
                page_id: "page-1".into(),
                duplicates: 0
            }
        );

        let pages = db.pages_with_id(3);
        assert_eq!(pages.len(), 1);
        assert_eq!(
            pages[0].1["Title"]["title"][0]["text"]["content"],
            json!("Taxi to venue")
        );
    }

    #[tokio::test]
    async fn duplicates_are_counted_not_reconciled() {
        let db = Arc::new(FakeDatabase::default());
        db.seed("a", 5);
        db.seed("b", 5);
        let sync = Synchronizer::new(db.clone(), "db1");

        let outcome = sync.sync(&record(5, "Hotel")).await;
        assert_eq!(
            outcome,
            RecordOutcome::Updated {
                id: 5,
                page_id: "a".into(),
                duplicates: 1
            }
        );
        assert!(outcome.detail().is_some_and(|d| d.contains("1 duplicate")));
        assert_eq!(db.pages_with_id(5).len(), 2);
    }

    #[tokio::test]
    async fn failure_does_not_stop_batch() {
        let db = Arc::new(FakeDatabase::failing_on(&[2]));
        let sync = Synchronizer::new(db.clone(), "db1");
        let records: RecordSet = [record(1, "A"), record(2, "B"), record(3, "C")]
            .into_iter()
            .collect();

        let summary = sync.sync_batch(&records, &SilentProgress).await;

        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 3);
        match &summary.outcomes[1] {
            RecordOutcome::Failed { id, phase, error } => {
                assert_eq!(*id, 2);
                assert_eq!(*phase, SyncPhase::Query);
                assert!(error.contains("connection reset"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(db.pages_with_id(3).len(), 1);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let v = serde_json::to_value(RecordOutcome::Failed {
            id: 4,
            phase: SyncPhase::Create,
            error: "boom".into(),
        })
        .expect("serialize");
        assert_eq!(
            v,
            json!({ "outcome": "failed", "id": 4, "phase": "create", "error": "boom" })
        );
    }

    // -- leases ------------------------------------------------------------

    async fn temp_storage() -> (Arc<Storage>, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("intakesync_lease_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&path).await.expect("open storage");
        (Arc::new(storage), path)
    }

    #[tokio::test]
    async fn held_lease_skips_record() {
        let (storage, path) = temp_storage().await;
        storage
            .try_acquire_lease("db1:7", "other-run", Duration::from_secs(60))
            .await
            .expect("lease");

        let db = Arc::new(FakeDatabase::default());
        let sync = Synchronizer::new(db.clone(), "db1").with_leases(
            storage.clone(),
            "this-run",
            Duration::from_secs(60),
        );

        let outcome = sync.sync(&record(7, "Taxi")).await;
        assert_eq!(
            outcome,
            RecordOutcome::Skipped {
                id: 7,
                reason: "lease held".into()
            }
        );
        assert!(db.pages_with_id(7).is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn lease_is_released_after_upsert() {
        let (storage, path) = temp_storage().await;
        let db = Arc::new(FakeDatabase::default());
        let sync = Synchronizer::new(db, "db1").with_leases(
            storage.clone(),
            "this-run",
            Duration::from_secs(60),
        );

        let outcome = sync.sync(&record(8, "Taxi")).await;
        assert_eq!(outcome.label(), "created");
        assert_eq!(storage.lease_owner("db1:8").await.expect("owner"), None);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let (storage, path) = temp_storage().await;
        storage
            .try_acquire_lease("db1:9", "crashed-run", Duration::ZERO)
            .await
            .expect("lease");

        let db = Arc::new(FakeDatabase::default());
        let sync = Synchronizer::new(db, "db1").with_leases(
            storage.clone(),
            "this-run",
            Duration::from_secs(60),
        );
        assert_eq!(sync.sync(&record(9, "Taxi")).await.label(), "created");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn lease_lost_during_query_skips_write() {
        let (storage, path) = temp_storage().await;
        let db = Arc::new(FakeDatabase::slow(Duration::from_millis(300)));
        let ttl = Duration::from_millis(100);
        let run_a = Synchronizer::new(db.clone(), "db1").with_leases(storage.clone(), "run-a", ttl);
        let run_b = Synchronizer::new(db.clone(), "db1").with_leases(storage.clone(), "run-b", ttl);

        let taxi = record(3, "Taxi");

        // Run B takes over A's expired lease while A is still querying.
        let (a, b) = tokio::join!(run_a.sync(&taxi), async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            run_b.sync(&taxi).await
        });

        assert_eq!(
            a,
            RecordOutcome::Skipped {
                id: 3,
                reason: "lease lost".into()
            }
        );
        assert_eq!(b.label(), "created");
        assert_eq!(db.pages_with_id(3).len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    // -- over HTTP ---------------------------------------------------------

    fn notion_for(server: &MockServer) -> Arc<NotionClient> {
        let settings = NotionSettings {
            database_id: "db1".into(),
            base_url: server.uri(),
            timeout_secs: 5,
            ..NotionSettings::default()
        };
        let config = NotionConfig::from_settings(&settings, "secret_test").expect("config");
        Arc::new(NotionClient::new(config).expect("client"))
    }

    #[tokio::test]
    async fn http_error_on_one_record_does_not_stop_next() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .and(body_json(json!({
                "filter": { "property": "ID", "number": { "equals": 1 } }
            })))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .and(body_json(json!({
                "filter": { "property": "ID", "number": { "equals": 2 } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p2" })))
            .expect(1)
            .mount(&server)
            .await;

        let sync = Synchronizer::new(notion_for(&server), "db1");
        let records: RecordSet = [record(1, "A"), record(2, "B")].into_iter().collect();
        let summary = sync.sync_batch(&records, &SilentProgress).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.outcomes[1].page_id(), Some("p2"));
    }
}
