use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};

use clinica_lib::db::health::{
    run_health_checks, DbHealthReport, DbHealthStatus, DB_UNHEALTHY_CLI_HINT, DB_UNHEALTHY_CODE,
    DB_UNHEALTHY_EXIT_CODE,
};
use clinica_lib::db::{backup, default_db_path, open_sqlite_pool};
use clinica_lib::device::SimulatedUsbKey;
use clinica_lib::model::PrivacyMode;
use clinica_lib::privacy::{ConfirmPrompt, PrivacyController, StaticPrompt};
use clinica_lib::remote::{HttpRemoteBackend, RemoteConfig};
use clinica_lib::settings::StoreHandle;
use clinica_lib::sync::{queue, SyncEngine};
use clinica_lib::{connectivity::ConnectivityWatcher, migrate};

#[derive(Debug, Parser)]
#[command(name = "clinica", about = "Local-first clinic data engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance and inspection commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Offline mutation queue commands.
    #[command(subcommand)]
    Sync(SyncCommand),
    /// Privacy mode inspection and switching.
    #[command(subcommand)]
    Privacy(PrivacyCommand),
    /// Toggle the simulated USB privacy key.
    Usb {
        #[arg(value_enum)]
        state: UsbState,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Run the SQLite health checks and report their status.
    Status {
        /// Emit the raw JSON health report instead of the table view.
        #[arg(long)]
        json: bool,
    },
    /// Run VACUUM to compact the database when it is healthy.
    Vacuum,
    /// Create a consistent snapshot of the database with manifest metadata.
    Backup {
        /// Emit a machine-readable JSON object with the backup entry details.
        #[arg(long)]
        json: bool,
    },
    /// List recorded backups with disk usage and retention settings.
    Backups {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    /// Drain the pending queue against the configured remote.
    Run {
        #[arg(long)]
        json: bool,
    },
    /// Show how many mutations are queued.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum PrivacyCommand {
    /// Show the persisted mode, USB-key presence and the derived visibility.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Switch between ID and NAME display modes.
    SetMode {
        #[arg(value_enum)]
        mode: ModeArg,
        /// Skip the online confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Id,
    Name,
}

impl From<ModeArg> for PrivacyMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Id => PrivacyMode::Id,
            ModeArg::Name => PrivacyMode::Name,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UsbState {
    Present,
    Absent,
}

/// Confirmation prompt backed by stdin, used when switching modes without
/// `--yes`.
struct StdinPrompt;

impl ConfirmPrompt for StdinPrompt {
    fn confirm(&self, message: &str) -> bool {
        use std::io::{BufRead, Write};
        print!("{message} [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}

#[tokio::main]
async fn main() {
    clinica_lib::init_logging();

    let cli = Cli::parse();
    match handle_cli(cli.command).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn handle_cli(command: Commands) -> Result<i32> {
    match command {
        Commands::Db(db) => handle_db_command(db).await,
        Commands::Sync(sync) => handle_sync_command(sync).await,
        Commands::Privacy(privacy) => handle_privacy_command(privacy),
        Commands::Usb { state } => handle_usb_command(state),
    }
}

async fn handle_db_command(command: DbCommand) -> Result<i32> {
    match command {
        DbCommand::Status { json } => {
            let db_path = default_db_path().context("determine database path")?;
            ensure_parent_dir(&db_path)?;

            let pool = open_health_pool(&db_path).await?;
            let report = run_health_checks(&pool)
                .await
                .context("run database health checks")?;
            pool.close().await;

            if json {
                print_report_json(&report)?;
            } else {
                print_report_table(&report);
            }

            Ok(match report.status {
                DbHealthStatus::Ok => 0,
                DbHealthStatus::Error => 1,
            })
        }
        DbCommand::Vacuum => handle_db_vacuum().await,
        DbCommand::Backup { json } => handle_db_backup(json).await,
        DbCommand::Backups { json } => handle_db_backups(json).await,
    }
}

async fn handle_db_backups(emit_json: bool) -> Result<i32> {
    let db_path = default_db_path().context("determine database path")?;
    ensure_parent_dir(&db_path)?;

    let info = backup::overview(&db_path)
        .await
        .context("collect backup overview")?;
    if emit_json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else if info.backups.is_empty() {
        println!("No backups recorded.");
    } else {
        println!("{:<26} {:>14}  Location", "Created", "Size (bytes)");
        for entry in &info.backups {
            println!(
                "{:<26} {:>14}  {}",
                entry.manifest.created_at, entry.total_size_bytes, entry.directory
            );
        }
    }
    Ok(0)
}

async fn guard_cli_db_mutation(db_path: &Path) -> Result<Result<SqlitePool, i32>> {
    let pool = open_health_pool(db_path).await?;
    let report = run_health_checks(&pool)
        .await
        .context("run database health checks")?;
    if !matches!(report.status, DbHealthStatus::Ok) {
        eprintln!("Error: {}. {}", DB_UNHEALTHY_CODE, DB_UNHEALTHY_CLI_HINT);
        pool.close().await;
        return Ok(Err(DB_UNHEALTHY_EXIT_CODE));
    }
    Ok(Ok(pool))
}

async fn handle_db_vacuum() -> Result<i32> {
    let db_path = default_db_path().context("determine database path")?;
    ensure_parent_dir(&db_path)?;

    match guard_cli_db_mutation(&db_path).await? {
        Ok(pool) => {
            let result = sqlx::query("VACUUM;")
                .execute(&pool)
                .await
                .context("vacuum database");
            pool.close().await;
            result?;
            println!("Database vacuum completed.");
            Ok(0)
        }
        Err(code) => Ok(code),
    }
}

async fn handle_db_backup(emit_json: bool) -> Result<i32> {
    let db_path = default_db_path().context("determine database path")?;
    ensure_parent_dir(&db_path)?;

    match guard_cli_db_mutation(&db_path).await? {
        Ok(pool) => {
            let result = backup::create_backup(&pool, &db_path)
                .await
                .context("create database backup");
            pool.close().await;
            let entry = result?;
            if emit_json {
                let path = entry.sqlite_path.clone();
                let payload = json!({
                    "entry": entry,
                    "path": path,
                });
                let serialized = serde_json::to_string_pretty(&payload)
                    .context("serialize backup entry payload")?;
                println!("{serialized}");
            } else {
                let manifest_json = serde_json::to_string_pretty(&entry.manifest)
                    .context("serialize backup manifest")?;
                println!("{manifest_json}");
                println!("Backup stored at {}", entry.sqlite_path);
            }
            Ok(0)
        }
        Err(code) => Ok(code),
    }
}

async fn handle_sync_command(command: SyncCommand) -> Result<i32> {
    let db_path = default_db_path().context("determine database path")?;
    let pool = open_sqlite_pool(&db_path).await?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply migrations")?;

    let code = match command {
        SyncCommand::Run { json } => {
            let config = RemoteConfig::from_env().context("load remote configuration")?;
            let remote = HttpRemoteBackend::new(config).context("build remote client")?;
            if !remote.ping().await {
                eprintln!("Remote is unreachable; queued mutations stay queued.");
                1
            } else {
                let engine = SyncEngine::new(pool.clone(), Arc::new(remote));
                let summary = engine.sync_data().await.context("run sync")?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    println!(
                        "Sync finished: {} attempted, {} applied, {} failed.",
                        summary.attempted, summary.applied, summary.failed
                    );
                }
                if summary.failed > 0 {
                    1
                } else {
                    0
                }
            }
        }
        SyncCommand::Status { json } => {
            let counts = queue::counts(&pool).await.context("read queue counts")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!(
                    "Queue: {} pending, {} errored.",
                    counts.pending, counts.error
                );
            }
            0
        }
    };

    pool.close().await;
    Ok(code)
}

fn handle_privacy_command(command: PrivacyCommand) -> Result<i32> {
    let db_path = default_db_path().context("determine database path")?;
    ensure_parent_dir(&db_path)?;
    let settings_dir = db_path
        .parent()
        .context("database path has no parent directory")?;
    let store = StoreHandle::json_file(settings_dir);
    let device = Arc::new(SimulatedUsbKey::new(store.clone()));

    match command {
        PrivacyCommand::Status { json } => {
            let controller = PrivacyController::new(
                store,
                device,
                ConnectivityWatcher::default(),
                Arc::new(StaticPrompt(false)),
            );
            let signals = controller.signals();
            if json {
                let payload = json!({
                    "signals": signals,
                    "namesVisible": controller.names_visible(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Mode          : {}", signals.mode);
                println!("USB key       : {}", if signals.usb_key_present { "present" } else { "absent" });
                println!("Online        : {}", signals.online);
                println!("Names visible : {}", controller.names_visible());
            }
            Ok(0)
        }
        PrivacyCommand::SetMode { mode, yes } => {
            let prompt: Arc<dyn ConfirmPrompt> = if yes {
                Arc::new(StaticPrompt(true))
            } else {
                Arc::new(StdinPrompt)
            };
            let controller =
                PrivacyController::new(store, device, ConnectivityWatcher::default(), prompt);
            if controller.set_mode(mode.into()) {
                println!("Privacy mode set to {}.", controller.mode());
                Ok(0)
            } else {
                eprintln!("Privacy mode unchanged.");
                Ok(1)
            }
        }
    }
}

fn handle_usb_command(state: UsbState) -> Result<i32> {
    let db_path = default_db_path().context("determine database path")?;
    ensure_parent_dir(&db_path)?;
    let settings_dir = db_path
        .parent()
        .context("database path has no parent directory")?;
    let store = StoreHandle::json_file(settings_dir);
    let key = SimulatedUsbKey::new(store);
    let present = matches!(state, UsbState::Present);
    key.set_present(present)?;
    println!(
        "Simulated USB key is now {}.",
        if present { "present" } else { "absent" }
    );
    Ok(0)
}

fn ensure_parent_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database parent directory {}", parent.display()))?;
    }
    Ok(())
}

fn print_report_json(report: &DbHealthReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serialize health report")?;
    println!("{json}");
    Ok(())
}

fn print_report_table(report: &DbHealthReport) {
    println!("Database health report");
    println!("Status       : {}", status_label(&report.status));
    println!("Schema hash  : {}", report.schema_hash);
    println!("App version  : {}", report.app_version);
    println!("Generated at : {}", report.generated_at);

    println!("\nChecks:");
    println!(
        "{:<20} {:<7} {:>13}  Details",
        "Check", "Passed", "Duration (ms)"
    );
    for check in &report.checks {
        let passed = if check.passed { "yes" } else { "no" };
        let details = check
            .details
            .as_deref()
            .map(|value| value.replace('\n', " "))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<7} {:>13}  {}",
            check.name, passed, check.duration_ms, details
        );
    }

    if report.offenders.is_empty() {
        println!("\nOffenders: none");
    } else {
        println!("\nOffenders:");
        println!("{:<20} {:>10}  Message", "Table", "RowID");
        for offender in &report.offenders {
            println!(
                "{:<20} {:>10}  {}",
                offender.table,
                offender.rowid,
                offender.message.replace('\n', " ")
            );
        }
    }
}

fn status_label(status: &DbHealthStatus) -> &'static str {
    match status {
        DbHealthStatus::Ok => "ok",
        DbHealthStatus::Error => "error",
    }
}

async fn open_health_pool(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(false)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("open sqlite database at {}", db_path.display()))?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&pool)
        .await
        .ok();

    Ok(pool)
}
