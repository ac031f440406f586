//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
///
/// The alerts table is wide on purpose: each alert type fills its own
/// columns and leaves the rest NULL, so one query surfaces every kind
/// of alert side by side.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            alert_type TEXT NOT NULL,
            risk_score INTEGER NOT NULL,
            status TEXT NOT NULL,
            dispatched_at TEXT NOT NULL,
            ip_address TEXT,
            hour TEXT,
            count INTEGER,
            user_id TEXT,
            date TEXT,
            countries INTEGER,
            threat_type TEXT,
            confidence INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_dispatched ON alerts(dispatched_at);
        CREATE INDEX IF NOT EXISTS idx_alerts_type ON alerts(alert_type);",
    )?;
    Ok(())
}
