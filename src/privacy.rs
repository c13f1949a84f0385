//! Privacy/offline mode controller. The persisted display mode, USB-key
//! presence and connectivity together derive a single flag: whether
//! identifying patient names may be shown. Names are never shown while online.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ts_rs::TS;

use crate::connectivity::ConnectivityWatcher;
use crate::device::DeviceHandle;
use crate::model::PrivacyMode;
use crate::settings::{StoreHandle, PRIVACY_MODE_KEY};

/// Blocking yes/no capability used when switching to NAME mode while online.
pub trait ConfirmPrompt: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Prompt that always answers the same way; used by tests and the `--yes` CLI
/// path.
pub struct StaticPrompt(pub bool);

impl ConfirmPrompt for StaticPrompt {
    fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct PrivacySignals {
    pub mode: PrivacyMode,
    pub usb_key_present: bool,
    pub online: bool,
}

#[derive(Clone)]
pub struct PrivacyController {
    store: StoreHandle,
    device: DeviceHandle,
    connectivity: ConnectivityWatcher,
    prompt: Arc<dyn ConfirmPrompt>,
}

impl PrivacyController {
    pub fn new(
        store: StoreHandle,
        device: DeviceHandle,
        connectivity: ConnectivityWatcher,
        prompt: Arc<dyn ConfirmPrompt>,
    ) -> Self {
        Self {
            store,
            device,
            connectivity,
            prompt,
        }
    }

    /// Persisted mode; unknown or missing values fall back to ID.
    pub fn mode(&self) -> PrivacyMode {
        self.store
            .get(PRIVACY_MODE_KEY)
            .and_then(|value| value.parse().ok())
            .unwrap_or(PrivacyMode::Id)
    }

    /// Snapshot of the three signals. USB presence and connectivity are
    /// re-read on every call, never cached.
    pub fn signals(&self) -> PrivacySignals {
        PrivacySignals {
            mode: self.mode(),
            usb_key_present: self.device.usb_key_present(),
            online: self.connectivity.online(),
        }
    }

    /// Whether identifying names may be displayed right now.
    pub fn names_visible(&self) -> bool {
        let signals = self.signals();
        signals.mode == PrivacyMode::Name && signals.usb_key_present && !signals.online
    }

    /// Switch display modes. Returns `false` and leaves the persisted mode
    /// untouched when the switch is refused; the refusal reason is only
    /// logged, the caller sees a bare boolean.
    pub fn set_mode(&self, mode: PrivacyMode) -> bool {
        if mode == PrivacyMode::Name {
            if !self.device.usb_key_present() {
                warn!(
                    target: "clinica",
                    event = "privacy_mode_rejected",
                    reason = "usb_key_missing"
                );
                return false;
            }
            if self.connectivity.online()
                && !self
                    .prompt
                    .confirm("You are online. Names will stay hidden until you go offline. Switch anyway?")
            {
                warn!(
                    target: "clinica",
                    event = "privacy_mode_rejected",
                    reason = "declined"
                );
                return false;
            }
        }

        self.store.set(PRIVACY_MODE_KEY, mode.as_str());
        if let Err(err) = self.store.persist() {
            warn!(
                target: "clinica",
                event = "privacy_mode_store_save_failed",
                error = %err
            );
        }
        info!(target: "clinica", event = "privacy_mode_changed", mode = %mode);
        true
    }
}
