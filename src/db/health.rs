use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{pool::PoolConnection, Row, Sqlite, SqlitePool};
use ts_rs::TS;

use crate::db::manifest;

const EXPECTED_JOURNAL_MODE: &str = "wal";

/// Error code raised when a mutating operation is refused because the last
/// health report was not `Ok`.
pub const DB_UNHEALTHY_CODE: &str = "DB_UNHEALTHY";
pub const DB_UNHEALTHY_CLI_HINT: &str =
    "Database health checks failed. Run `clinica db status` for details.";
pub const DB_UNHEALTHY_EXIT_CODE: i32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/")]
pub enum DbHealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct DbHealthCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    #[ts(type = "number")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub details: Option<String>,
}

/// A row that references a parent which no longer exists. References are
/// advisory in this schema, so offenders are reported rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct DbHealthOffender {
    pub table: String,
    #[ts(type = "number")]
    pub rowid: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct DbHealthReport {
    pub status: DbHealthStatus,
    pub checks: Vec<DbHealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offenders: Vec<DbHealthOffender>,
    pub schema_hash: String,
    pub app_version: String,
    pub generated_at: String,
}

impl DbHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == DbHealthStatus::Ok
    }
}

pub async fn run_health_checks(pool: &SqlitePool) -> Result<DbHealthReport> {
    let mut conn = pool
        .acquire()
        .await
        .context("acquire connection for health checks")?;

    let mut checks: Vec<DbHealthCheck> = Vec::new();
    let mut offenders: Vec<DbHealthOffender> = Vec::new();
    let mut overall_ok = true;

    let quick_check = run_quick_check(&mut conn).await;
    overall_ok &= quick_check.passed;
    checks.push(quick_check);

    let integrity_check = run_integrity_check(&mut conn).await;
    overall_ok &= integrity_check.passed;
    checks.push(integrity_check);

    let fk_result = run_foreign_key_check(&mut conn).await;
    overall_ok &= fk_result.check.passed;
    offenders.extend(fk_result.offenders);
    checks.push(fk_result.check);

    let journal_check = run_journal_mode_check(&mut conn).await;
    overall_ok &= journal_check.passed;
    checks.push(journal_check);

    drop(conn);
    let schema_hash = manifest::schema_hash(pool).await.unwrap_or_default();

    let status = if overall_ok {
        DbHealthStatus::Ok
    } else {
        DbHealthStatus::Error
    };

    Ok(DbHealthReport {
        status,
        checks,
        offenders,
        schema_hash,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

struct ForeignKeyCheckResult {
    check: DbHealthCheck,
    offenders: Vec<DbHealthOffender>,
}

async fn run_quick_check(conn: &mut PoolConnection<Sqlite>) -> DbHealthCheck {
    let start = Instant::now();
    let mut check = DbHealthCheck {
        name: "quick_check".to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    };

    match sqlx::query_scalar::<_, String>("PRAGMA quick_check;")
        .fetch_one(conn.as_mut())
        .await
    {
        Ok(result) => {
            if !result.eq_ignore_ascii_case("ok") {
                check.passed = false;
                check.details = Some(result);
            }
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("quick_check failed: {err}"));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    check
}

async fn run_integrity_check(conn: &mut PoolConnection<Sqlite>) -> DbHealthCheck {
    let start = Instant::now();
    let mut check = DbHealthCheck {
        name: "integrity_check".to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    };

    match sqlx::query_scalar::<_, String>("PRAGMA integrity_check(1);")
        .fetch_one(conn.as_mut())
        .await
    {
        Ok(result) => {
            if !result.eq_ignore_ascii_case("ok") {
                check.passed = false;
                check.details = Some(result);
            }
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("integrity_check failed: {err}"));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    check
}

async fn run_foreign_key_check(conn: &mut PoolConnection<Sqlite>) -> ForeignKeyCheckResult {
    let start = Instant::now();
    let mut check = DbHealthCheck {
        name: "foreign_key_check".to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    };

    let rows = sqlx::query("PRAGMA foreign_key_check;")
        .fetch_all(conn.as_mut())
        .await;

    let mut offenders = Vec::new();
    match rows {
        Ok(rows) => {
            for row in rows {
                if let Some(offender) = offender_from_row(&row) {
                    offenders.push(offender);
                }
            }
            if !offenders.is_empty() {
                check.passed = false;
                check.details = Some(format!("{} reference violation(s)", offenders.len()));
            }
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("foreign_key_check failed: {err}"));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    ForeignKeyCheckResult { check, offenders }
}

fn offender_from_row(row: &SqliteRow) -> Option<DbHealthOffender> {
    let table: String = row.try_get("table").ok()?;
    let rowid: i64 = row.try_get("rowid").ok()?;
    let parent: Option<String> = row.try_get("parent").ok();
    let fkid: Option<i64> = row.try_get("fkid").ok();

    let mut message = String::new();
    if let Some(parent) = parent {
        message.push_str(&format!("missing parent '{parent}'"));
    }
    if let Some(fkid) = fkid {
        if !message.is_empty() {
            message.push_str(", ");
        }
        message.push_str(&format!("constraint #{fkid}"));
    }
    if message.is_empty() {
        message.push_str("reference violation");
    }

    Some(DbHealthOffender {
        table,
        rowid,
        message,
    })
}

async fn run_journal_mode_check(conn: &mut PoolConnection<Sqlite>) -> DbHealthCheck {
    let start = Instant::now();
    let mut check = DbHealthCheck {
        name: "journal_mode".to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    };

    match sqlx::query_scalar::<_, String>("PRAGMA journal_mode;")
        .fetch_one(conn.as_mut())
        .await
    {
        Ok(mode) => {
            if mode.eq_ignore_ascii_case(EXPECTED_JOURNAL_MODE) {
                check.details = Some(format!("journal_mode={mode}"));
            } else if mode.eq_ignore_ascii_case("memory") {
                // In-memory databases never run in WAL mode; fine for tests.
                check.details = Some(format!("journal_mode={mode}"));
            } else {
                check.passed = false;
                check.details = Some(format!(
                    "journal_mode mismatch: expected {EXPECTED_JOURNAL_MODE}, got {mode}"
                ));
            }
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("journal_mode query failed: {err}"));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    check
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn memory_pool() -> SqlitePool {
        // Match the production pool: references are advisory (src/db.rs).
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .expect("parse url")
            .foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .expect("connect");
        migrate::apply_migrations(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn fresh_database_reports_ok() {
        let pool = memory_pool().await;
        let report = run_health_checks(&pool).await.unwrap();
        assert!(report.is_healthy(), "checks: {:?}", report.checks);
        assert!(report.offenders.is_empty());
        assert!(!report.schema_hash.is_empty());
    }

    #[tokio::test]
    async fn dangling_reference_is_reported_not_rejected() {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO patients (id, clinic_id, public_id, full_name, created_at, updated_at)\
             VALUES ('p1', 'no-such-clinic', 'P-001', 'Jane Doe', 0, 0)",
        )
        .execute(&pool)
        .await
        .expect("advisory references must not block the insert");

        let report = run_health_checks(&pool).await.unwrap();
        assert_eq!(report.status, DbHealthStatus::Error);
        assert!(report
            .offenders
            .iter()
            .any(|o| o.table == "patients" && o.message.contains("clinics")));
    }
}
