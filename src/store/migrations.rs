//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL DEFAULT 'prospect',
                phone TEXT NOT NULL,
                phone_tail TEXT NOT NULL,
                market TEXT,
                owner_name TEXT,
                property_address TEXT,
                property_locality TEXT,
                asking_price INTEGER,
                condition_notes TEXT NOT NULL DEFAULT '[]',
                timeline TEXT,
                urgency INTEGER,
                quality_score INTEGER,
                stage TEXT NOT NULL,
                ownership_verified INTEGER NOT NULL DEFAULT 0,
                opted_out INTEGER NOT NULL DEFAULT 0,
                last_inbound_at TEXT,
                last_outbound_at TEXT,
                last_activity_at TEXT,
                reply_count INTEGER NOT NULL DEFAULT 0,
                send_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_contacts_phone_tail ON contacts(phone_tail);
            CREATE INDEX IF NOT EXISTS idx_contacts_stage ON contacts(stage);
            CREATE INDEX IF NOT EXISTS idx_contacts_kind ON contacts(kind);

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL UNIQUE,
                direction TEXT NOT NULL,
                from_phone TEXT NOT NULL,
                to_phone TEXT NOT NULL,
                body TEXT NOT NULL,
                intent TEXT,
                stage TEXT,
                contact_id TEXT,
                contact_kind TEXT,
                received_at TEXT,
                processed_at TEXT,
                sent_at TEXT,
                summary TEXT,
                claimed_by TEXT,
                claimed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_events_message_id ON events(message_id);
            CREATE INDEX IF NOT EXISTS idx_events_contact ON events(contact_id);
            CREATE INDEX IF NOT EXISTS idx_events_unprocessed
                ON events(direction, processed_at);

            CREATE TABLE IF NOT EXISTS deferred (
                id TEXT PRIMARY KEY,
                contact_id TEXT NOT NULL,
                to_phone TEXT NOT NULL,
                from_phone TEXT NOT NULL,
                body TEXT NOT NULL,
                scheduled_for TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_deferred_due ON deferred(status, scheduled_for);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                StoreError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                StoreError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
