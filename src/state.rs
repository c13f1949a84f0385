//! Wiring for a running instance: one pool, one settings store, one privacy
//! controller, one sync engine. An embedding app shell builds this once at
//! startup; the CLI assembles only the pieces each subcommand needs, and
//! tests build it from in-memory parts.

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::connectivity::ConnectivityWatcher;
use crate::device::{DeviceHandle, SimulatedUsbKey};
use crate::privacy::{ConfirmPrompt, PrivacyController};
use crate::remote::RemoteBackend;
use crate::settings::StoreHandle;
use crate::sync::SyncEngine;

#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    db_path: PathBuf,
    settings: StoreHandle,
    device: DeviceHandle,
    connectivity: ConnectivityWatcher,
    privacy: PrivacyController,
    engine: SyncEngine,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        db_path: PathBuf,
        settings: StoreHandle,
        remote: Arc<dyn RemoteBackend>,
        prompt: Arc<dyn ConfirmPrompt>,
    ) -> Self {
        let device: DeviceHandle = Arc::new(SimulatedUsbKey::new(settings.clone()));
        let connectivity = ConnectivityWatcher::default();
        let privacy = PrivacyController::new(
            settings.clone(),
            device.clone(),
            connectivity.clone(),
            prompt,
        );
        let engine = SyncEngine::new(pool.clone(), remote);
        Self {
            pool,
            db_path,
            settings,
            device,
            connectivity,
            privacy,
            engine,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn settings(&self) -> &StoreHandle {
        &self.settings
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn connectivity(&self) -> &ConnectivityWatcher {
        &self.connectivity
    }

    pub fn privacy(&self) -> &PrivacyController {
        &self.privacy
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }
}
