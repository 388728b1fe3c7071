use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Numbered migrations, applied in order exactly once. Never reorder or
/// edit an entry that has shipped — append a new version instead.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "
        CREATE TABLE summaries (
            id              TEXT    NOT NULL PRIMARY KEY,
            channel_id      TEXT    NOT NULL,
            guild_id        TEXT    NOT NULL,
            start_at        TEXT    NOT NULL,   -- ISO-8601
            end_at          TEXT    NOT NULL,
            message_count   INTEGER NOT NULL,
            body            TEXT    NOT NULL,
            key_points      TEXT    NOT NULL,   -- JSON array
            action_items    TEXT    NOT NULL,   -- JSON array
            technical_terms TEXT    NOT NULL,   -- JSON array
            participants    TEXT    NOT NULL,   -- JSON array
            metadata        TEXT    NOT NULL,   -- JSON object
            warnings        TEXT    NOT NULL,   -- JSON array
            created_at      TEXT    NOT NULL
        ) STRICT;
        CREATE INDEX idx_summaries_guild_channel
            ON summaries (guild_id, channel_id, created_at DESC);

        CREATE TABLE guild_configs (
            guild_id          TEXT NOT NULL PRIMARY KEY,
            enabled_channels  TEXT NOT NULL,    -- JSON array
            excluded_channels TEXT NOT NULL,    -- JSON array
            default_options   TEXT NOT NULL,    -- JSON object
            permissions       TEXT NOT NULL,    -- JSON object
            webhook_enabled   INTEGER NOT NULL DEFAULT 0,
            webhook_secret    TEXT,
            updated_at        TEXT NOT NULL
        ) STRICT;

        CREATE TABLE scheduled_tasks (
            id                   TEXT    NOT NULL PRIMARY KEY,
            name                 TEXT    NOT NULL,
            channel_id           TEXT    NOT NULL,
            guild_id             TEXT    NOT NULL,
            schedule             TEXT    NOT NULL,   -- JSON-encoded Schedule enum
            destinations         TEXT    NOT NULL,   -- JSON array
            options              TEXT    NOT NULL,   -- JSON object
            active               INTEGER NOT NULL DEFAULT 1,
            created_at           TEXT    NOT NULL,
            created_by           TEXT    NOT NULL,
            last_run             TEXT,
            next_run             TEXT,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            max_failures         INTEGER NOT NULL DEFAULT 3,
            retry_delay_minutes  INTEGER NOT NULL DEFAULT 5,
            UNIQUE (guild_id, name)
        ) STRICT;
        CREATE INDEX idx_tasks_due ON scheduled_tasks (active, next_run);

        CREATE TABLE task_executions (
            id           TEXT    NOT NULL PRIMARY KEY,
            task_id      TEXT    NOT NULL REFERENCES scheduled_tasks(id) ON DELETE CASCADE,
            status       TEXT    NOT NULL DEFAULT 'pending',
            started_at   TEXT    NOT NULL,
            completed_at TEXT,
            summary_id   TEXT,
            error        TEXT,
            deliveries   TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            duration_ms  INTEGER NOT NULL DEFAULT 0
        ) STRICT;
        ",
    ),
    (
        2,
        "
        -- Durable cache tier: fingerprint -> summary, TTL enforced on read.
        CREATE TABLE summary_cache (
            fingerprint TEXT NOT NULL PRIMARY KEY,
            summary_id  TEXT NOT NULL REFERENCES summaries(id) ON DELETE CASCADE,
            cached_at   TEXT NOT NULL
        ) STRICT;
        ",
    ),
    (
        3,
        "
        CREATE INDEX idx_executions_task ON task_executions (task_id, started_at DESC);
        ",
    ),
];

/// Apply pending migrations. Refuses to open a database whose recorded
/// version is newer than this binary knows about.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS schema_version (
             version    INTEGER NOT NULL PRIMARY KEY,
             applied_at TEXT    NOT NULL
         ) STRICT;",
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let supported = MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0);
    if current > supported {
        return Err(StoreError::UnknownSchemaVersion {
            found: current,
            supported,
        });
    }

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        conn.execute_batch(&format!("BEGIN; {sql} COMMIT;"))?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
        )?;
        info!(version, "schema migration applied");
    }

    Ok(())
}

/// Open a connection with the pragmas every pool member needs.
pub fn open_connection(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}
