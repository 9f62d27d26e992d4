mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    IdleDelete, KafkaSettings, LogSettings, ServerSettings, SessionSettings, Settings,
};

/// Loads the configuration from `config/default.*` and `CHAT_*` environment
/// variables, then merges it onto the defaults.
///
/// Nested keys use a double underscore: `CHAT_SERVER__PORT=9000`,
/// `CHAT_KAFKA__BROKERS=a:9092,b:9092`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("kafka.brokers")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
