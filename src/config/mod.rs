mod settings;

use config::{Config, ConfigError, Environment, File};
use settings::PartialSettings;

pub use settings::{BrokerSettings, DatastoreBackend, DatastoreSettings, LogSettings, Settings};

/// Prefix of the environment variables read by [`load_config`], e.g.
/// `PUBSTATE__DATASTORE__BACKEND=sqlite`.
pub const ENV_PREFIX: &str = "PUBSTATE";

/// Loads the configuration from `config/default` (if present), a `.env`
/// file (if present) and `PUBSTATE__*` environment variables, then merges
/// the result over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
