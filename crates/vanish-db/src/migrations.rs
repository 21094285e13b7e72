use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            -- Timestamps are fixed-width RFC 3339 in UTC, so text order is time order.
            CREATE TABLE content (
                id              TEXT PRIMARY KEY,
                kind            TEXT NOT NULL CHECK (kind IN ('text', 'file')),
                text_content    TEXT,
                blob_path       TEXT,
                file_name       TEXT,
                file_size       INTEGER,
                mime_type       TEXT,
                password_hash   TEXT,
                one_time_view   INTEGER NOT NULL DEFAULT 0,
                max_views       INTEGER,
                view_count      INTEGER NOT NULL DEFAULT 0,
                expires_at      TEXT NOT NULL,
                owner_id        TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                deactivated_at  TEXT,
                created_at      TEXT NOT NULL,
                phase           TEXT NOT NULL DEFAULT 'fresh',
                deliveries_in_flight INTEGER NOT NULL DEFAULT 0 CHECK (deliveries_in_flight >= 0),
                revision        INTEGER NOT NULL DEFAULT 0,
                CHECK ((kind = 'text') = (text_content IS NOT NULL)),
                CHECK ((kind = 'file') = (file_name IS NOT NULL))
            );

            CREATE INDEX idx_content_owner ON content(owner_id, created_at);
            CREATE INDEX idx_content_expires ON content(expires_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
