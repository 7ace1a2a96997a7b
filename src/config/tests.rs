use serial_test::serial;

use super::load_config;
use super::settings::{DatastoreBackend, Settings};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.broker.ack_timeout_secs, 10);
    assert_eq!(settings.broker.max_pull_messages, 100);
    assert_eq!(settings.broker.prune_interval_secs, 60);
    assert_eq!(settings.datastore.backend, DatastoreBackend::Memory);
    assert_eq!(settings.datastore.path, "pubstate_db");
    assert_eq!(settings.datastore.busy_timeout_ms, 5000);
    assert_eq!(settings.log.level, "info");
    assert!(settings.log.ansi);
}

#[test]
#[serial]
fn test_env_overrides_defaults() {
    temp_env::with_vars(
        [
            ("PUBSTATE__BROKER__ACK_TIMEOUT_SECS", Some("30")),
            ("PUBSTATE__DATASTORE__BACKEND", Some("sqlite")),
            ("PUBSTATE__DATASTORE__PATH", Some("/tmp/pubstate.sqlite3")),
            ("PUBSTATE__LOG__LEVEL", Some("debug")),
            ("PUBSTATE__LOG__ANSI", Some("false")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.broker.ack_timeout_secs, 30);
            assert_eq!(cfg.datastore.backend, DatastoreBackend::Sqlite);
            assert_eq!(cfg.datastore.path, "/tmp/pubstate.sqlite3");
            assert_eq!(cfg.log.level, "debug");
            assert!(!cfg.log.ansi);

            // untouched values keep their defaults
            assert_eq!(cfg.broker.max_pull_messages, 100);
            assert_eq!(cfg.datastore.busy_timeout_ms, 5000);
        },
    );
}

#[test]
#[serial]
fn test_partial_broker_section_keeps_other_defaults() {
    temp_env::with_vars(
        [
            ("PUBSTATE__BROKER__PRUNE_INTERVAL_SECS", Some("0")),
            ("PUBSTATE__DATASTORE__BACKEND", None::<&str>),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.broker.prune_interval_secs, 0);
            assert_eq!(cfg.broker.ack_timeout_secs, 10);
            assert_eq!(cfg.datastore.backend, DatastoreBackend::Memory);
        },
    );
}

#[test]
#[serial]
fn test_unknown_backend_is_rejected() {
    temp_env::with_var("PUBSTATE__DATASTORE__BACKEND", Some("mysql"), || {
        assert!(load_config().is_err());
    });
}
