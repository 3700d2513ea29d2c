/// Inline SQL migrations for the diagnostic job store.
///
/// Applied in order and tracked by 1-based version in `_migrations`, so new
/// statements are only ever appended.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: diagnostic_jobs table
    r#"
CREATE TABLE IF NOT EXISTS diagnostic_jobs (
    id                TEXT PRIMARY KEY,
    status            TEXT NOT NULL DEFAULT 'QUEUED'
                      CHECK (status IN ('QUEUED', 'RUNNING', 'COMPLETE', 'FAILED', 'CANCELLED')),
    tier              TEXT NOT NULL DEFAULT 'full',
    output_mode       TEXT NOT NULL DEFAULT 'rapid',
    input_payload     TEXT NOT NULL,
    normalized_intake TEXT,
    simulate_overload INTEGER NOT NULL DEFAULT 0,
    progress_pct      INTEGER NOT NULL DEFAULT 0 CHECK (progress_pct BETWEEN 0 AND 100),
    last_event        TEXT NOT NULL DEFAULT '',
    attempts          INTEGER NOT NULL DEFAULT 0,
    ai_status         TEXT,
    model_used        TEXT,
    fail_reason       TEXT,
    report            TEXT,
    provenance        TEXT,
    dispatch_count    INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL,
    started_at        TEXT,
    updated_at        TEXT NOT NULL,
    completed_at      TEXT
);
"#,
    // Migration 2: sweeper scan (status + staleness)
    r#"
CREATE INDEX IF NOT EXISTS idx_diagnostic_jobs_status_updated ON diagnostic_jobs(status, updated_at);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_diagnostic_jobs_created ON diagnostic_jobs(created_at DESC);
"#,
];
