//! SQL migration definitions for the IntakeSync ledger database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: sync_runs, record_outcomes, leases",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per classify or sync invocation
CREATE TABLE IF NOT EXISTS sync_runs (
    id          TEXT PRIMARY KEY,
    pipeline    TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at);

-- Per-record result of a sync run
CREATE TABLE IF NOT EXISTS record_outcomes (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id     TEXT NOT NULL REFERENCES sync_runs(id) ON DELETE CASCADE,
    record_id  INTEGER NOT NULL,
    outcome    TEXT NOT NULL,
    page_id    TEXT,
    detail     TEXT
);

CREATE INDEX IF NOT EXISTS idx_record_outcomes_run ON record_outcomes(run_id);

-- Single-flight leases keyed by "<database>:<record id>"
CREATE TABLE IF NOT EXISTS leases (
    key        TEXT PRIMARY KEY,
    owner      TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
