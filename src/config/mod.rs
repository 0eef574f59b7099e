mod settings;

pub use settings::{DatabaseConfig, RealtimeConfig, ServerConfig, Settings};
