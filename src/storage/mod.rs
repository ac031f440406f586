//! SQLite alert sink -- schema, queries, migrations.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, info};

use crate::dispatch::{Alert, AlertTrigger};
use crate::model::AlertType;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

// ---------------------------------------------------------------------------
// Alert rows
// ---------------------------------------------------------------------------

/// One row of the alerts table. Columns that do not apply to the alert
/// type are NULL.
#[derive(Debug, Clone)]
pub struct AlertRow {
    pub id: String,
    pub alert_type: String,
    pub risk_score: u8,
    pub status: String,
    pub dispatched_at: String,
    pub ip_address: Option<String>,
    pub hour: Option<String>,
    pub count: Option<i64>,
    pub user_id: Option<String>,
    pub date: Option<String>,
    pub countries: Option<i64>,
    pub threat_type: Option<String>,
    pub confidence: Option<u8>,
}

impl AlertRow {
    pub fn from_alert(alert: &Alert) -> Self {
        let mut row = Self {
            id: alert.id.to_string(),
            alert_type: alert.trigger.alert_type().as_str().to_string(),
            risk_score: alert.risk_score,
            status: alert.status.as_str().to_string(),
            dispatched_at: alert.dispatched_at.to_rfc3339(),
            ip_address: None,
            hour: None,
            count: None,
            user_id: None,
            date: None,
            countries: None,
            threat_type: None,
            confidence: None,
        };
        match &alert.trigger {
            AlertTrigger::Finding(finding) => match finding.alert_type {
                AlertType::HighFrequency => {
                    row.ip_address = Some(finding.key.group.clone());
                    row.hour = Some(finding.key.bucket.to_rfc3339());
                    row.count = Some(finding.metric as i64);
                }
                AlertType::ImpossibleTravel => {
                    row.user_id = Some(finding.key.group.clone());
                    row.date = Some(finding.key.bucket.date_naive().to_string());
                    row.countries = Some(finding.metric as i64);
                }
                AlertType::Threat => {
                    row.ip_address = Some(finding.key.group.clone());
                }
            },
            AlertTrigger::Threat {
                ip,
                threat_type,
                confidence,
                ..
            } => {
                row.ip_address = Some(ip.clone());
                row.threat_type = Some(threat_type.clone());
                row.confidence = Some(*confidence);
            }
        }
        row
    }
}

const INSERT_ALERT_SQL: &str = "INSERT INTO alerts (
        id, alert_type, risk_score, status, dispatched_at,
        ip_address, hour, count, user_id, date, countries, threat_type, confidence
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const SELECT_ALERT_COLUMNS: &str = "SELECT
        id, alert_type, risk_score, status, dispatched_at,
        ip_address, hour, count, user_id, date, countries, threat_type, confidence
    FROM alerts";

fn execute_insert(stmt: &mut rusqlite::Statement<'_>, row: &AlertRow) -> rusqlite::Result<usize> {
    stmt.execute(rusqlite::params![
        row.id,
        row.alert_type,
        row.risk_score,
        row.status,
        row.dispatched_at,
        row.ip_address,
        row.hour,
        row.count,
        row.user_id,
        row.date,
        row.countries,
        row.threat_type,
        row.confidence,
    ])
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRow> {
    Ok(AlertRow {
        id: row.get(0)?,
        alert_type: row.get(1)?,
        risk_score: row.get(2)?,
        status: row.get(3)?,
        dispatched_at: row.get(4)?,
        ip_address: row.get(5)?,
        hour: row.get(6)?,
        count: row.get(7)?,
        user_id: row.get(8)?,
        date: row.get(9)?,
        countries: row.get(10)?,
        threat_type: row.get(11)?,
        confidence: row.get(12)?,
    })
}

/// Save one alert to the sink.
pub fn insert_alert(pool: &Pool, alert: &Alert) -> Result<()> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(INSERT_ALERT_SQL)?;
    execute_insert(&mut stmt, &AlertRow::from_alert(alert))?;
    Ok(())
}

/// Save a batch of alerts in a single transaction. Either every row
/// lands or none do.
pub fn insert_alerts(pool: &Pool, alerts: &[Alert]) -> Result<()> {
    if alerts.is_empty() {
        return Ok(());
    }
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(INSERT_ALERT_SQL)?;
        for alert in alerts {
            execute_insert(&mut stmt, &AlertRow::from_alert(alert))?;
        }
    }
    tx.commit()?;
    debug!(count = alerts.len(), "alerts persisted");
    Ok(())
}

/// Newest alerts first.
pub fn list_recent_alerts(pool: &Pool, limit: usize) -> Result<Vec<AlertRow>> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare(&format!("{SELECT_ALERT_COLUMNS} ORDER BY dispatched_at DESC LIMIT ?1"))?;
    let rows = stmt.query_map([limit as i64], row_from_sql)?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(row?);
    }
    Ok(alerts)
}

/// Dump every alert to a CSV file, oldest first. Returns the number of
/// rows written.
pub fn export_alerts_csv(pool: &Pool, path: &Path) -> Result<usize> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!("{SELECT_ALERT_COLUMNS} ORDER BY dispatched_at ASC"))?;
    let rows = stmt.query_map([], row_from_sql)?;

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "alert_type",
        "ip_address",
        "hour",
        "count",
        "user_id",
        "date",
        "countries",
        "threat_type",
        "confidence",
        "risk_score",
        "status",
        "dispatched_at",
    ])?;

    let mut exported = 0usize;
    for row in rows {
        let row = row?;
        writer.write_record([
            row.alert_type,
            row.ip_address.unwrap_or_default(),
            row.hour.unwrap_or_default(),
            row.count.map(|v| v.to_string()).unwrap_or_default(),
            row.user_id.unwrap_or_default(),
            row.date.unwrap_or_default(),
            row.countries.map(|v| v.to_string()).unwrap_or_default(),
            row.threat_type.unwrap_or_default(),
            row.confidence.map(|v| v.to_string()).unwrap_or_default(),
            row.risk_score.to_string(),
            row.status,
            row.dispatched_at,
        ])?;
        exported += 1;
    }
    writer.flush()?;
    info!(count = exported, path = %path.display(), "alerts exported");
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::detect::window::WindowKey;
    use crate::detect::Finding;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn threat_alert(ip: &str) -> Alert {
        Alert::new(
            AlertTrigger::Threat {
                ip: ip.to_string(),
                threat_type: "malware".to_string(),
                confidence: 95,
                observed_at: ts("2024-03-01T10:00:00Z"),
            },
            100,
        )
    }

    fn frequency_alert() -> Alert {
        let key = WindowKey::new("203.0.113.9", ts("2024-03-01T10:00:00Z"));
        let finding = Finding::new("high_frequency", AlertType::HighFrequency, key, 3);
        Alert::new(AlertTrigger::Finding(finding), 75)
    }

    fn temp_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = open_pool(&dir.path().join("alerts.db")).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_insert_and_list_roundtrip() {
        let (_dir, pool) = temp_pool();
        insert_alert(&pool, &threat_alert("185.22.33.4")).unwrap();
        insert_alert(&pool, &frequency_alert()).unwrap();

        let rows = list_recent_alerts(&pool, 10).unwrap();
        assert_eq!(rows.len(), 2);

        let threat = rows.iter().find(|r| r.alert_type == "threat").unwrap();
        assert_eq!(threat.ip_address.as_deref(), Some("185.22.33.4"));
        assert_eq!(threat.threat_type.as_deref(), Some("malware"));
        assert_eq!(threat.confidence, Some(95));
        assert_eq!(threat.count, None);

        let freq = rows.iter().find(|r| r.alert_type == "high_frequency").unwrap();
        assert_eq!(freq.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(freq.count, Some(3));
        assert_eq!(freq.threat_type, None);
    }

    #[test]
    fn test_batch_insert_rolls_back_on_conflict() {
        let (_dir, pool) = temp_pool();
        let alert = threat_alert("185.22.33.4");
        let duplicate = alert.clone();

        let result = insert_alerts(&pool, &[alert, duplicate]);
        assert!(result.is_err());

        let rows = list_recent_alerts(&pool, 10).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_list_returns_newest_first() {
        let (_dir, pool) = temp_pool();
        let mut older = threat_alert("185.22.33.4");
        older.dispatched_at = ts("2024-03-01T09:00:00Z");
        let mut newer = threat_alert("198.51.100.7");
        newer.dispatched_at = ts("2024-03-01T11:00:00Z");

        insert_alerts(&pool, &[older, newer]).unwrap();
        let rows = list_recent_alerts(&pool, 10).unwrap();
        assert_eq!(rows[0].ip_address.as_deref(), Some("198.51.100.7"));
        assert_eq!(rows[1].ip_address.as_deref(), Some("185.22.33.4"));
    }

    #[test]
    fn test_export_csv_fills_blanks_for_nulls() {
        let (dir, pool) = temp_pool();
        insert_alert(&pool, &threat_alert("185.22.33.4")).unwrap();

        let out = dir.path().join("alerts.csv");
        let exported = export_alerts_csv(&pool, &out).unwrap();
        assert_eq!(exported, 1);

        let raw = std::fs::read_to_string(&out).unwrap();
        let mut lines = raw.lines();
        assert!(lines.next().unwrap().starts_with("alert_type,ip_address"));
        let data = lines.next().unwrap();
        assert!(data.starts_with("threat,185.22.33.4,,"));
        assert!(data.contains("malware"));
    }
}
