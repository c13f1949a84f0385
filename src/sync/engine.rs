//! Reconciliation engine. `sync_data` drains one snapshot of the queue
//! strictly in insertion order, one awaited remote call at a time. Items
//! enqueued after the snapshot was read wait for the next trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use ts_rs::TS;

use crate::connectivity::ConnectivityWatcher;
use crate::model::{EntityType, MutationOp};
use crate::remote::RemoteBackend;
use crate::sync::queue;
use crate::{repo, AppError, AppResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct SyncSummary {
    #[ts(type = "number")]
    pub attempted: usize,
    #[ts(type = "number")]
    pub applied: usize,
    #[ts(type = "number")]
    pub failed: usize,
}

#[derive(Clone)]
pub struct SyncEngine {
    pool: SqlitePool,
    remote: Arc<dyn RemoteBackend>,
    running: Arc<AtomicBool>,
}

struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn begin(flag: Arc<AtomicBool>) -> AppResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::new(
                "SYNC/ALREADY_RUNNING",
                "A sync is already in progress.",
            ));
        }
        Ok(Self { flag })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(pool: SqlitePool, remote: Arc<dyn RemoteBackend>) -> Self {
        Self {
            pool,
            remote,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drain the queue against the remote. Per-item failures are recorded on
    /// the queue row and do not abort the batch; the item is retried on the
    /// next trigger.
    pub async fn sync_data(&self) -> AppResult<SyncSummary> {
        let _guard = RunGuard::begin(self.running.clone())?;

        let snapshot = queue::pending_in_order(&self.pool).await?;
        let mut summary = SyncSummary {
            attempted: snapshot.len(),
            ..SyncSummary::default()
        };
        if snapshot.is_empty() {
            return Ok(summary);
        }

        info!(target: "clinica", event = "sync_begin", queued = snapshot.len());
        for mutation in &snapshot {
            match self.remote.apply_mutation(mutation).await {
                Ok(()) => {
                    queue::remove(&self.pool, &mutation.id).await?;
                    if mutation.op != MutationOp::Delete {
                        let table = match mutation.entity_type {
                            EntityType::Patient => "patients",
                            EntityType::Session => "sessions",
                        };
                        if let Err(err) = repo::mark_synced(&self.pool, table, &mutation.entity_id).await
                        {
                            warn!(
                                target: "clinica",
                                event = "sync_stamp_failed",
                                mutation_id = %mutation.id,
                                error = %err
                            );
                        }
                    }
                    summary.applied += 1;
                }
                Err(err) => {
                    // No classification: network, conflict and validation
                    // failures all land here.
                    warn!(
                        target: "clinica",
                        event = "sync_item_failed",
                        mutation_id = %mutation.id,
                        entity_id = %mutation.entity_id,
                        error = %err
                    );
                    queue::mark_error(&self.pool, &mutation.id, err.message()).await?;
                    summary.failed += 1;
                }
            }
        }

        info!(
            target: "clinica",
            event = "sync_done",
            attempted = summary.attempted,
            applied = summary.applied,
            failed = summary.failed
        );
        Ok(summary)
    }
}

/// Run a sync once at start if online, then on every offline→online
/// transition. Errors are logged and swallowed; the task only ends when the
/// watcher is dropped.
pub fn spawn_online_trigger(
    engine: SyncEngine,
    watcher: ConnectivityWatcher,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = watcher.subscribe();
        let mut was_online = watcher.online();
        if was_online {
            run_logged(&engine).await;
        }
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            if online && !was_online {
                run_logged(&engine).await;
            }
            was_online = online;
        }
    })
}

async fn run_logged(engine: &SyncEngine) {
    match engine.sync_data().await {
        Ok(summary) => {
            if summary.attempted > 0 {
                info!(
                    target: "clinica",
                    event = "sync_trigger_done",
                    applied = summary.applied,
                    failed = summary.failed
                );
            }
        }
        Err(err) if err.code() == "SYNC/ALREADY_RUNNING" => {}
        Err(err) => {
            warn!(target: "clinica", event = "sync_trigger_failed", error = %err);
        }
    }
}
