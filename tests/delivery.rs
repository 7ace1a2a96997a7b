use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pubstate::broker::{Attributes, Broker, DeliveryState};
use pubstate::config::{DatastoreBackend, DatastoreSettings, Settings};
use pubstate::persistence::open_datastore;
use tempfile::tempdir;

fn open_broker(backend: DatastoreBackend, path: &str) -> Broker {
    let datastore = open_datastore(&DatastoreSettings {
        backend,
        path: path.to_string(),
        busy_timeout_ms: 1000,
    })
    .expect("open datastore");
    Broker::new(datastore, Settings::default().broker)
}

fn setup(broker: &Broker) {
    broker.create_topic("orders").unwrap();
    for sub in ["billing", "shipping"] {
        broker
            .create_subscription(sub, "orders", Some(Duration::from_secs(30)))
            .unwrap();
    }
}

#[test]
fn integration_publish_pull_ack_on_every_backend() {
    for backend in [
        DatastoreBackend::Memory,
        DatastoreBackend::Sqlite,
        DatastoreBackend::Sled,
    ] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let broker = open_broker(backend, path.to_str().unwrap());
        setup(&broker);

        let id = broker
            .publish(
                "orders",
                b"order-1".to_vec(),
                Attributes::from([("kind".to_string(), "created".to_string())]),
            )
            .unwrap();
        let t0 = Utc::now();

        let pulled = broker.pull_at("billing", 10, t0).unwrap();
        assert_eq!(pulled.len(), 1, "{backend:?}");
        assert_eq!(pulled[0].data, b"order-1".to_vec());
        assert_eq!(pulled[0].attributes["kind"], "created");

        // hidden inside the window, visible after it
        assert!(broker.pull_at("billing", 10, t0 + TimeDelta::seconds(10)).unwrap().is_empty());
        assert_eq!(
            broker.pull_at("billing", 10, t0 + TimeDelta::seconds(31)).unwrap().len(),
            1
        );

        broker.ack("billing", &[&id]).unwrap();
        assert_eq!(broker.prune().unwrap(), 0, "shipping has not acked yet");

        assert_eq!(broker.pull("shipping", 10).unwrap().len(), 1);
        broker.ack("shipping", &[&id]).unwrap();
        assert_eq!(broker.prune().unwrap(), 1, "{backend:?}");
        assert!(broker.messages().datastore().keys().unwrap().is_empty());
    }
}

#[test]
fn integration_restore_after_restart() {
    for backend in [DatastoreBackend::Sqlite, DatastoreBackend::Sled] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let path = path.to_str().unwrap();

        let id = {
            let broker = open_broker(backend, path);
            setup(&broker);
            let id = broker.publish("orders", b"order-2".to_vec(), Attributes::new()).unwrap();
            broker.pull("billing", 10).unwrap();
            broker.messages().datastore().flush().unwrap();
            id
        };

        let broker = open_broker(backend, path);
        assert_eq!(broker.restore().unwrap(), 1, "{backend:?}");

        let message = broker.messages().get(&id).unwrap();
        assert_eq!(message.state("billing"), Some(DeliveryState::Delivered));
        assert_eq!(message.state("shipping"), Some(DeliveryState::Waiting));
        assert_eq!(message.data, b"order-2".to_vec());
    }
}
