pub mod settings;

pub use settings::{AiConfig, Config, ConfigError, GitConfig, LimitsConfig, ModelId, SecurityConfig};
