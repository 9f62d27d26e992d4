use serde::Deserialize;

/// Top-level configuration settings for the gateway.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub kafka: KafkaSettings,
    pub session: SessionSettings,
    pub log: LogSettings,
}

/// Where the gateway listens and which path accepts upgrades.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub route: String,
}

/// Connection parameters for the log broker.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub operation_timeout_ms: u64,
}

/// What an idle timeout does to the session's topic.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdleDelete {
    /// Delete the topic whenever a session's idle timer fires, even if other
    /// sessions still use it.
    #[default]
    Always,
    /// Delete only when no other session in this process holds the topic.
    LastSession,
    Never,
}

/// Timings and buffer sizes of one connection session.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    pub idle_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub write_deadline_secs: u64,
    pub channel_capacity: usize,
    pub idle_delete: IdleDelete,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
    pub format: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub kafka: Option<PartialKafkaSettings>,
    pub session: Option<PartialSessionSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub route: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialKafkaSettings {
    pub brokers: Option<Vec<String>>,
    pub client_id: Option<String>,
    pub operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSessionSettings {
    pub idle_timeout_secs: Option<u64>,
    pub ping_interval_secs: Option<u64>,
    pub write_deadline_secs: Option<u64>,
    pub channel_capacity: Option<usize>,
    pub idle_delete: Option<IdleDelete>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                route: "/chat/subscribe".to_string(),
            },
            kafka: KafkaSettings {
                brokers: vec!["localhost:9092".to_string()],
                client_id: "chat-client".to_string(),
                operation_timeout_ms: 10_000,
            },
            session: SessionSettings {
                idle_timeout_secs: 15 * 60,
                ping_interval_secs: 10,
                write_deadline_secs: 15,
                channel_capacity: 256,
                idle_delete: IdleDelete::Always,
            },
            log: LogSettings {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every missing value of `partial` from the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let kafka = partial.kafka.unwrap_or_default();
        let session = partial.session.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                route: server.route.unwrap_or(default.server.route),
            },
            kafka: KafkaSettings {
                brokers: kafka
                    .brokers
                    .filter(|b| !b.is_empty())
                    .unwrap_or(default.kafka.brokers),
                client_id: kafka.client_id.unwrap_or(default.kafka.client_id),
                operation_timeout_ms: kafka
                    .operation_timeout_ms
                    .unwrap_or(default.kafka.operation_timeout_ms),
            },
            session: SessionSettings {
                idle_timeout_secs: session
                    .idle_timeout_secs
                    .unwrap_or(default.session.idle_timeout_secs),
                ping_interval_secs: session
                    .ping_interval_secs
                    .unwrap_or(default.session.ping_interval_secs),
                write_deadline_secs: session
                    .write_deadline_secs
                    .unwrap_or(default.session.write_deadline_secs),
                channel_capacity: session
                    .channel_capacity
                    .unwrap_or(default.session.channel_capacity),
                idle_delete: session.idle_delete.unwrap_or(default.session.idle_delete),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
                format: log.format.unwrap_or(default.log.format),
            },
        }
    }
}
