//! Device-presence capability. The web deployment has no hardware access, so
//! the shipped implementation reads a settings flag toggled from the UI (or
//! the `usb` CLI subcommand). A native build can plug in a real probe without
//! touching callers.

use std::sync::Arc;

use crate::settings::{StoreHandle, USB_KEY_PRESENT_KEY};

pub trait DevicePresenceProvider: Send + Sync {
    fn usb_key_present(&self) -> bool;
}

/// Settings-flag simulation of the clinic's USB key.
pub struct SimulatedUsbKey {
    store: StoreHandle,
}

impl SimulatedUsbKey {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub fn set_present(&self, present: bool) -> anyhow::Result<()> {
        self.store
            .set(USB_KEY_PRESENT_KEY, if present { "true" } else { "false" });
        self.store.persist()?;
        tracing::info!(target: "clinica", event = "usb_key_simulated", present);
        Ok(())
    }
}

impl DevicePresenceProvider for SimulatedUsbKey {
    fn usb_key_present(&self) -> bool {
        self.store
            .get(USB_KEY_PRESENT_KEY)
            .map(|value| value == "true")
            .unwrap_or(false)
    }
}

pub type DeviceHandle = Arc<dyn DevicePresenceProvider>;
