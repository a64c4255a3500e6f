//! Database schema migrations.
//!
//! Version 1 creates the parent context tables (users, modules,
//! chat_sessions, enrollments) and the three embeddable tables
//! (chat_messages, insights, topics).

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub const LATEST_VERSION: i64 = 1;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )?;

    if current_version(conn)? < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

/// Version 1: Initial schema.
///
/// Embeddings are nullable blobs of little-endian f32s. Each embeddable
/// table carries a partial index over its vectorised live rows, which is
/// the candidate set of every nearest-neighbour scan.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            email           TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            deleted_at      INTEGER
        );

        CREATE TABLE IF NOT EXISTS modules (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            code            TEXT NOT NULL,
            title           TEXT NOT NULL,
            description     TEXT,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            deleted_at      INTEGER
        );

        CREATE TABLE IF NOT EXISTS chat_sessions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users (id),
            module_id       INTEGER REFERENCES modules (id),
            title           TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            deleted_at      INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_chat_sessions_user
            ON chat_sessions (user_id);

        CREATE TABLE IF NOT EXISTS enrollments (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users (id),
            module_id       INTEGER NOT NULL REFERENCES modules (id),
            status          TEXT NOT NULL DEFAULT 'active'
                            CHECK (status IN ('active', 'dropped', 'completed')),
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            deleted_at      INTEGER,
            UNIQUE (user_id, module_id)
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES chat_sessions (id),
            role            TEXT NOT NULL
                            CHECK (role IN ('user', 'assistant', 'system', 'tool')),
            content         TEXT NOT NULL,
            name            TEXT,
            tool_call_id    TEXT,
            tool_calls      TEXT,
            embedding       BLOB,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            deleted_at      INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation
            ON chat_messages (conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_chat_messages_embedding
            ON chat_messages (id) WHERE embedding IS NOT NULL AND deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS insights (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users (id),
            insight_type    TEXT NOT NULL,
            content         TEXT NOT NULL,
            embedding       BLOB,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            deleted_at      INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_insights_user_type
            ON insights (user_id, insight_type);

        CREATE INDEX IF NOT EXISTS idx_insights_embedding
            ON insights (id) WHERE embedding IS NOT NULL AND deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS topics (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            module_id       INTEGER NOT NULL REFERENCES modules (id),
            unit_title      TEXT NOT NULL,
            content         TEXT,
            scheduled_date  TEXT NOT NULL,
            embedding       BLOB,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            deleted_at      INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_topics_module_date
            ON topics (module_id, scheduled_date);

        CREATE INDEX IF NOT EXISTS idx_topics_embedding
            ON topics (id) WHERE embedding IS NOT NULL AND deleted_at IS NULL;

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');

        COMMIT;
        ",
    )?;

    Ok(())
}
