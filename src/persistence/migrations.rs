use anyhow::{Context, Result};
use duckdb::Connection;

pub fn run(conn: &Connection) -> Result<()> {
    // Simple migration system: ensure a schema version table and apply migrations sequentially.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .context("creating schema_migrations table")?;

    let current = current_version(conn)?;
    let mut migrations_applied = false;

    if current < 1 {
        apply_v1(conn)?;
        set_version(conn, 1)?;
        migrations_applied = true;
    }

    if current < 2 {
        apply_v2(conn)?;
        set_version(conn, 2)?;
        migrations_applied = true;
    }

    // Merge the WAL so schema changes are not replayed on the next open.
    if migrations_applied {
        conn.execute_batch("FORCE CHECKPOINT;")
            .context("forcing checkpoint after migrations")?;
    }

    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")?;
    let v: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(v)
}

fn set_version(conn: &Connection, v: i64) -> Result<()> {
    conn.execute("INSERT INTO schema_migrations (version) VALUES (?)", [v])?;
    Ok(())
}

fn apply_v1(conn: &Connection) -> Result<()> {
    // Dashboard entities written by the phone sync
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS clients_id_seq START 1;

        CREATE TABLE IF NOT EXISTS clients (
            id BIGINT PRIMARY KEY DEFAULT nextval('clients_id_seq'),
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT UNIQUE,         -- natural key for find-or-create
            quickbooks_id TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS calls (
            id TEXT PRIMARY KEY,       -- phone provider call id
            client_id BIGINT NOT NULL,
            direction TEXT NOT NULL,
            start_time TEXT NOT NULL,  -- RFC 3339
            end_time TEXT NOT NULL,
            duration BIGINT NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            from_number TEXT NOT NULL,
            to_number TEXT NOT NULL,
            recording_url TEXT,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,       -- phone provider message id
            client_id BIGINT NOT NULL,
            direction TEXT NOT NULL,
            content TEXT NOT NULL,
            status TEXT NOT NULL,
            from_number TEXT NOT NULL,
            to_number TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS live_calls (
            call_id TEXT PRIMARY KEY,  -- phone provider line id
            phone_number TEXT,
            name TEXT,
            details TEXT NOT NULL,     -- remaining provider fields as JSON
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .context("applying v1 schema")?;

    Ok(())
}

fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS quickbooks_tokens (
            realm_id TEXT PRIMARY KEY,
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            access_expires_at TEXT NOT NULL,
            refresh_expires_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .context("applying v2 schema (ledger credentials)")
}
