use anyhow::{Context, Result as AnyResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Pool, Sqlite, Transaction};
use std::fs;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;

pub mod backup;
pub mod health;
pub mod manifest;

pub const DB_FILE_NAME: &str = "clinica.sqlite3";
const APP_DIR_NAME: &str = "com.clinica.app";

/// Resolve the on-device database path. `CLINICA_FAKE_APPDATA` overrides the
/// platform data directory so tests and scripts can run hermetically.
pub fn default_db_path() -> AnyResult<PathBuf> {
    if let Ok(fake) = std::env::var("CLINICA_FAKE_APPDATA") {
        return Ok(PathBuf::from(fake).join(DB_FILE_NAME));
    }

    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow::anyhow!("failed to resolve application data directory"))?;
    Ok(base.join(APP_DIR_NAME).join(DB_FILE_NAME))
}

pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            tracing::error!(
                target: "clinica",
                error = %e,
                event = "app_data_dir_create_failed",
                path = %parent.display()
            );
            e
        })?;
    }
    tracing::info!(target: "clinica", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        // References in the schema are advisory; health checks surface
        // violations instead of the storage layer rejecting writes.
        .foreign_keys(false)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA wal_autocheckpoint = 1000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .with_context(|| format!("open sqlite database at {}", db_path.display()))?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let sync: (i64,) = sqlx::query_as("PRAGMA synchronous;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "clinica",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        synchronous = %sync.0,
        foreign_keys = %fks.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "clinica",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Run work inside a transaction. Commits on success, rolls back on error.
pub async fn run_in_tx<R, E, F>(pool: &Pool<Sqlite>, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut Transaction<'static, Sqlite>) -> BoxFuture<'c, Result<R, E>>,
{
    use tracing::{debug, error, warn};

    let mut tx = pool.begin().await.map_err(E::from)?;
    debug!(target: "clinica", event = "db_tx_begin");
    match f(&mut tx).await {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            debug!(target: "clinica", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "clinica", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "clinica", event = "db_tx_rollback");
            }
            Err(e)
        }
    }
}

/// Write a file via a temp sibling and rename so readers never observe a
/// partial payload.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent dir"))?;
    fs::create_dir_all(parent)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    let file = fs::File::open(&tmp)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory");
        sqlx::query("CREATE TABLE notes (id TEXT PRIMARY KEY, body TEXT);")
            .execute(&pool)
            .await
            .expect("create table");
        pool
    }

    #[tokio::test]
    async fn tx_commits_on_success() {
        let pool = memory_pool().await;
        run_in_tx::<_, sqlx::Error, _>(&pool, |tx| {
            async move {
                sqlx::query("INSERT INTO notes (id, body) VALUES ('a', 'hello')")
                    .execute(&mut **tx)
                    .await?;
                Ok(())
            }
            .boxed()
        })
        .await
        .expect("tx should commit");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn tx_rolls_back_on_error() {
        let pool = memory_pool().await;
        let result = run_in_tx::<(), sqlx::Error, _>(&pool, |tx| {
            async move {
                sqlx::query("INSERT INTO notes (id, body) VALUES ('a', 'first')")
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("INSERT INTO notes (id, body) VALUES ('a', 'second')")
                    .execute(&mut **tx)
                    .await?;
                Ok(())
            }
            .boxed()
        })
        .await;
        assert!(result.is_err());

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[test]
    fn write_atomic_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("settings.json");
        write_atomic(&target, b"{\"a\":1}").unwrap();
        write_atomic(&target, b"{\"a\":2}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{\"a\":2}");
        assert!(!target.with_extension("tmp").exists());
    }
}
