//! Key-value settings persisted per device (the web build kept these in
//! browser local storage). Holds the privacy mode and the simulated USB-key
//! flag.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::db::write_atomic;

pub const PRIVACY_MODE_KEY: &str = "privacyMode";
pub const USB_KEY_PRESENT_KEY: &str = "usbKeyPresent";

const SETTINGS_FILE_NAME: &str = "settings.json";

trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn save(&self) -> anyhow::Result<()>;
}

struct JsonFileStore {
    path: PathBuf,
    data: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    fn load(path: PathBuf) -> Self {
        let data = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<HashMap<String, String>>(&bytes).ok())
            .unwrap_or_default();
        Self {
            path,
            data: Mutex::new(data),
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.to_string(), value.to_string());
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        let snapshot = self
            .data
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        let payload = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(&self.path, &payload)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.to_string(), value.to_string());
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn SettingsStore + Send + Sync>,
}

impl StoreHandle {
    /// File-backed store next to the database.
    pub fn json_file(dir: &Path) -> Self {
        Self {
            inner: Arc::new(JsonFileStore::load(dir.join(SETTINGS_FILE_NAME))),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(MemoryStore::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    pub fn set(&self, key: &str, value: &str) {
        self.inner.set(key, value);
    }

    pub fn persist(&self) -> anyhow::Result<()> {
        self.inner.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_round_trips() {
        let store = StoreHandle::in_memory();
        assert_eq!(store.get(PRIVACY_MODE_KEY), None);
        store.set(PRIVACY_MODE_KEY, "name");
        assert_eq!(store.get(PRIVACY_MODE_KEY).as_deref(), Some("name"));
    }

    #[test]
    fn json_store_survives_reload() {
        let tmp = tempdir().unwrap();
        let store = StoreHandle::json_file(tmp.path());
        store.set(USB_KEY_PRESENT_KEY, "true");
        store.persist().unwrap();

        let reloaded = StoreHandle::json_file(tmp.path());
        assert_eq!(reloaded.get(USB_KEY_PRESENT_KEY).as_deref(), Some("true"));
    }

    #[test]
    fn corrupt_settings_file_falls_back_to_empty() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join(SETTINGS_FILE_NAME), b"not json").unwrap();
        let store = StoreHandle::json_file(tmp.path());
        assert_eq!(store.get(PRIVACY_MODE_KEY), None);
    }
}
