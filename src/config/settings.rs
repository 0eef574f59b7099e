use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL. Without one the service serves empty snapshots from the
    /// memory aggregator.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_db_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// First path segment of the WebSocket and snapshot routes.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Disconnect a session with no inbound activity for this long. Must
    /// stay above the client's 25s ping cadence; the 5s margin absorbs
    /// clock and scheduling jitter.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: u64,
    /// Seconds between scheduled broadcast rounds.
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval: u64,
    /// Outbound frame buffer per session.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    #[serde(default = "default_max_sessions_per_guild")]
    pub max_sessions_per_guild: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_db_connect_timeout() -> u64 {
    10
}

fn default_namespace() -> String {
    "realtime".to_string()
}

fn default_heartbeat_timeout() -> u64 {
    30
}

fn default_broadcast_interval() -> u64 {
    30
}

fn default_channel_buffer() -> usize {
    32
}

fn default_max_sessions_per_guild() -> usize {
    512
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("realtime.namespace", "realtime")?
            .set_default("realtime.heartbeat_timeout", 30)?
            .set_default("realtime.broadcast_interval", 30)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER_HOST, SERVER_PORT, DATABASE_URL, REALTIME_NAMESPACE, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_db_max_connections(),
            connect_timeout_seconds: default_db_connect_timeout(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            heartbeat_timeout: default_heartbeat_timeout(),
            broadcast_interval: default_broadcast_interval(),
            channel_buffer: default_channel_buffer(),
            max_sessions_per_guild: default_max_sessions_per_guild(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8082);
        assert_eq!(settings.realtime.namespace, "realtime");
        assert_eq!(settings.realtime.heartbeat_timeout, 30);
        assert_eq!(settings.realtime.broadcast_interval, 30);
        assert!(settings.database.url.is_none());
    }

    #[test]
    fn test_server_addr() {
        let settings = Settings::default();
        assert_eq!(settings.server_addr(), "0.0.0.0:8082");
    }
}
