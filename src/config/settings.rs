use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub datastore: DatastoreSettings,
    pub log: LogSettings,
}

/// Delivery parameters of the broker.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Visibility timeout given to subscriptions created without one.
    pub ack_timeout_secs: u64,
    /// Upper bound on the number of messages returned by one pull.
    pub max_pull_messages: usize,
    /// Period of the prune loop in the binary; `0` disables it.
    pub prune_interval_secs: u64,
}

/// Which key/value backend holds message records.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreBackend {
    Memory,
    Sqlite,
    Sled,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatastoreSettings {
    pub backend: DatastoreBackend,
    /// Database file (sqlite) or directory (sled). Unused for memory.
    pub path: String,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
    /// Colour escape codes in log lines. Turn off when output goes to a file.
    pub ansi: bool,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from [`Settings::default`].
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub datastore: Option<PartialDatastoreSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub ack_timeout_secs: Option<u64>,
    pub max_pull_messages: Option<usize>,
    pub prune_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDatastoreSettings {
    pub backend: Option<DatastoreBackend>,
    pub path: Option<String>,
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
    pub ansi: Option<bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                ack_timeout_secs: 10,
                max_pull_messages: 100,
                prune_interval_secs: 60,
            },
            datastore: DatastoreSettings {
                backend: DatastoreBackend::Memory,
                path: "pubstate_db".to_string(),
                busy_timeout_ms: 5000,
            },
            log: LogSettings {
                level: "info".to_string(),
                ansi: true,
            },
        }
    }
}

impl PartialSettings {
    /// Merge over `default`, field by field.
    pub fn merge(self, default: Settings) -> Settings {
        let broker = self.broker;
        let datastore = self.datastore;
        let log = self.log;

        Settings {
            broker: BrokerSettings {
                ack_timeout_secs: broker
                    .as_ref()
                    .and_then(|b| b.ack_timeout_secs)
                    .unwrap_or(default.broker.ack_timeout_secs),
                max_pull_messages: broker
                    .as_ref()
                    .and_then(|b| b.max_pull_messages)
                    .unwrap_or(default.broker.max_pull_messages),
                prune_interval_secs: broker
                    .as_ref()
                    .and_then(|b| b.prune_interval_secs)
                    .unwrap_or(default.broker.prune_interval_secs),
            },
            datastore: DatastoreSettings {
                backend: datastore
                    .as_ref()
                    .and_then(|d| d.backend)
                    .unwrap_or(default.datastore.backend),
                path: datastore
                    .as_ref()
                    .and_then(|d| d.path.clone())
                    .unwrap_or(default.datastore.path),
                busy_timeout_ms: datastore
                    .as_ref()
                    .and_then(|d| d.busy_timeout_ms)
                    .unwrap_or(default.datastore.busy_timeout_ms),
            },
            log: LogSettings {
                level: log
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.log.level),
                ansi: log
                    .as_ref()
                    .and_then(|l| l.ansi)
                    .unwrap_or(default.log.ansi),
            },
        }
    }
}
