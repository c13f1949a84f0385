use std::sync::Arc;

use tempfile::tempdir;

use clinica_lib::connectivity::ConnectivityWatcher;
use clinica_lib::device::SimulatedUsbKey;
use clinica_lib::model::PrivacyMode;
use clinica_lib::privacy::{PrivacyController, StaticPrompt};
use clinica_lib::settings::StoreHandle;

fn controller(store: StoreHandle, watcher: ConnectivityWatcher) -> PrivacyController {
    let device = Arc::new(SimulatedUsbKey::new(store.clone()));
    PrivacyController::new(store, device, watcher, Arc::new(StaticPrompt(true)))
}

#[test]
fn mode_survives_a_restart() {
    let tmp = tempdir().unwrap();
    let watcher = ConnectivityWatcher::new(false);

    {
        let store = StoreHandle::json_file(tmp.path());
        let key = SimulatedUsbKey::new(store.clone());
        key.set_present(true).unwrap();
        let controller = controller(store, watcher.clone());
        assert!(controller.set_mode(PrivacyMode::Name));
        assert!(controller.names_visible());
    }

    // A fresh process reloads the same settings file.
    let store = StoreHandle::json_file(tmp.path());
    let controller = controller(store, watcher);
    assert_eq!(controller.mode(), PrivacyMode::Name);
    assert!(controller.names_visible());
}

#[test]
fn unplugging_the_key_hides_names_without_changing_the_mode() {
    let tmp = tempdir().unwrap();
    let store = StoreHandle::json_file(tmp.path());
    let key = SimulatedUsbKey::new(store.clone());
    key.set_present(true).unwrap();

    let controller = controller(store.clone(), ConnectivityWatcher::new(false));
    assert!(controller.set_mode(PrivacyMode::Name));
    assert!(controller.names_visible());

    key.set_present(false).unwrap();
    assert!(!controller.names_visible());
    assert_eq!(controller.mode(), PrivacyMode::Name);

    key.set_present(true).unwrap();
    assert!(controller.names_visible());
}

#[test]
fn going_online_hides_names_immediately() {
    let tmp = tempdir().unwrap();
    let store = StoreHandle::json_file(tmp.path());
    let key = SimulatedUsbKey::new(store.clone());
    key.set_present(true).unwrap();

    let watcher = ConnectivityWatcher::new(false);
    let controller = controller(store, watcher.clone());
    assert!(controller.set_mode(PrivacyMode::Name));
    assert!(controller.names_visible());

    watcher.set_online(true);
    assert!(!controller.names_visible());

    watcher.set_online(false);
    assert!(controller.names_visible());
}
