//! SQL migration definitions for the posterpress database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: jobs, templates",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Rendering jobs
CREATE TABLE IF NOT EXISTS jobs (
    id                TEXT PRIMARY KEY,
    project_id        TEXT NOT NULL,
    template_id       TEXT NOT NULL,
    mode              TEXT NOT NULL CHECK (mode IN ('preview', 'final', 'paid')),
    status            TEXT NOT NULL DEFAULT 'queued'
                      CHECK (status IN ('queued', 'claimed', 'succeeded', 'failed')),
    error_code        TEXT,
    error_detail      TEXT,
    output_paths_json TEXT,
    attempts          INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    claimed_at        TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_project ON jobs(project_id);

-- Document templates
CREATE TABLE IF NOT EXISTS templates (
    id         TEXT PRIMARY KEY,
    source     TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Claim fencing token on jobs",
            sql: r#"
ALTER TABLE jobs ADD COLUMN claim_token TEXT;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
