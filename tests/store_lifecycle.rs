//! Store and host lifecycle scenarios using the pass-through drivers.

use hostkit::host::CONFIG_FILENAME;
use hostkit::{DriverOptions, Error, HostConfig, Registry, Settings, State, Store};
use std::path::Path;

const SOCKET_URL: &str = "unix:///var/run/docker.sock";

fn store(root: &Path) -> Store {
    let registry = Registry::builtin(&Settings::default()).unwrap();
    Store::new(root.join("hosts"), registry)
}

fn url_option(url: &str) -> DriverOptions {
    DriverOptions::from([("url".to_string(), url.to_string())])
}

#[test]
fn test_store_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    assert!(!store.exists("test").unwrap());
    assert!(store.list().unwrap().is_empty());

    let host = store.create("test", "none", &url_option(SOCKET_URL)).unwrap();
    assert_eq!(host.name, "test");
    assert!(store.path().join("test").is_dir());
    assert!(store.exists("test").unwrap());

    let hosts = store.list().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].name, "test");

    let loaded = store.load("test").unwrap();
    assert_eq!(loaded.url().unwrap(), SOCKET_URL);
    assert_eq!(loaded.state().unwrap(), State::Unknown);

    store.remove("test").unwrap();
    assert!(!store.path().join("test").exists());
    assert!(!store.exists("test").unwrap());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn test_active_host() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    assert!(store.get_active().unwrap().is_none());
    assert_eq!(store.active_or_default().unwrap().name, "default");

    let host = store.create("test", "none", &url_option(SOCKET_URL)).unwrap();
    store.set_active(&host).unwrap();

    let active = store.get_active().unwrap().expect("active host");
    assert_eq!(active.name, "test");
    assert_eq!(
        std::fs::read_to_string(store.path().join(".active")).unwrap(),
        "test"
    );
}

#[test]
fn test_persisted_config_rebuilds_same_driver() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let created = store
        .create("remote", "socket", &url_option("10.11.12.13:2375"))
        .unwrap();

    let raw = std::fs::read(store.path().join("remote").join(CONFIG_FILENAME)).unwrap();
    let config: HostConfig = serde_json::from_slice(&raw).unwrap();
    assert_eq!(config.driver_name, "socket");
    assert_eq!(config.driver_options, created.driver.get_options());

    let loaded = store.load("remote").unwrap();
    assert_eq!(loaded.driver.get_options(), created.driver.get_options());
    assert_eq!(loaded.url().unwrap(), "tcp://10.11.12.13:2375");
    assert_eq!(loaded.driver.get_ip().unwrap(), "10.11.12.13");
}

#[test]
fn test_pass_through_lifecycle_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let mut host = store
        .create("test", "none", &url_option("tcp://10.11.12.13:2375"))
        .unwrap();

    for _ in 0..2 {
        host.start().unwrap();
        host.stop().unwrap();
        host.restart().unwrap();
        host.kill().unwrap();
        assert_eq!(host.state().unwrap(), State::Unknown);
        assert_eq!(host.url().unwrap(), "tcp://10.11.12.13:2375");
    }
}

#[test]
fn test_create_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let err = store
        .create("bad-name", "none", &url_option(SOCKET_URL))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidHostName(_)));

    let err = store
        .create("test", "hyperv", &DriverOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::DriverNotFound(_)));

    let err = store.create("test", "none", &DriverOptions::new()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    assert!(!store.exists("test").unwrap());
}

#[test]
fn test_missing_host_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let err = store.load("ghost").unwrap_err();
    assert!(err.is_not_found());
    assert!(store.remove("ghost").unwrap_err().is_not_found());
}
