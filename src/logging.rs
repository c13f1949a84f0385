//! Structured logging. Events carry `target: "clinica"` plus an `event`
//! field so the JSON stream can be filtered downstream. `CLINICA_LOG`
//! overrides the filter, `CLINICA_LOG_JSON=1` switches stderr to JSON.

use std::env;
use std::fs;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "clinica=info,sqlx=warn";
const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_PREFIX: &str = "clinica.log";

static INIT: OnceCell<()> = OnceCell::new();
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops so tests can initialize freely.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let _ = tracing_log::LogTracer::init();

        let filter = EnvFilter::new(
            env::var("CLINICA_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
        );

        let json_stderr = env::var("CLINICA_LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        // Logs go to stderr so `--json` command output stays parseable.
        let stderr_layer = if json_stderr {
            fmt::layer()
                .json()
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed()
        };

        let file_layer = file_writer().map(|(writer, guard)| {
            let _ = FILE_GUARD.set(guard);
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
                .boxed()
        });

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init();
    });
}

/// Daily-rotated JSON file sink under `logs/` next to the database. Returns
/// `None` when the directory cannot be created; stderr logging still works.
fn file_writer() -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let db_path = crate::db::default_db_path().ok()?;
    let log_dir = db_path.parent()?.join(LOG_DIR_NAME);
    fs::create_dir_all(&log_dir).ok()?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}
