//! Configuration loading.
//!
//! Sources, lowest priority first: built-in defaults, an optional
//! `config/default.{toml,yaml,json}` file, then `PUSHRELAY_*` environment
//! variables (a `.env` file is loaded into the environment first). Nested
//! keys use a double underscore, e.g. `PUSHRELAY_BROKER__MAX_PAYLOAD_BYTES`.

mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, DEFAULT_IDLE_CHANNEL_SECS, LoggingSettings, ServerSettings, Settings,
};

pub const ENV_PREFIX: &str = "PUSHRELAY";

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] but reads the (optional) file at `path`.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
