use crate::git::InvokerSettings;
use crate::llm::context::PromptLimits;
use crate::llm::retry::RetryPolicy;
use crate::security::{ArgLimits, SecurityLevel, SecurityPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const ENV_AI_BINARY: &str = "GITWARD_AI_BINARY";
pub const ENV_MODEL: &str = "GITWARD_MODEL";
pub const ENV_TIMEOUT_MS: &str = "GITWARD_TIMEOUT_MS";
pub const ENV_MAX_RETRIES: &str = "GITWARD_MAX_RETRIES";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "GITWARD_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "GITWARD_RETRY_MAX_DELAY_MS";
pub const ENV_MAX_PROMPT_LENGTH: &str = "GITWARD_MAX_PROMPT_LENGTH";
pub const ENV_MAX_DIFF_LENGTH: &str = "GITWARD_MAX_DIFF_LENGTH";
pub const ENV_MAX_FILENAME_LENGTH: &str = "GITWARD_MAX_FILENAME_LENGTH";
pub const ENV_SECURITY_LEVEL: &str = "GITWARD_SECURITY_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    DirectoryNotFound,

    #[error("Invalid config value: {0}")]
    InvalidValue(String),

    #[error("{key} = {value} is out of range ({min}..={max})")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Backend model, restricted to a fixed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    Sonnet,
    Opus,
    Haiku,
}

impl ModelId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Sonnet => "sonnet",
            ModelId::Opus => "opus",
            ModelId::Haiku => "haiku",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sonnet" => Ok(ModelId::Sonnet),
            "opus" => Ok(ModelId::Opus),
            "haiku" => Ok(ModelId::Haiku),
            other => Err(ConfigError::InvalidValue(format!(
                "Unsupported model: {:?}. Expected one of sonnet, opus, haiku",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub ai: AiConfig,
    pub limits: LimitsConfig,
    pub git: GitConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AiConfig {
    pub binary: String,
    pub model: ModelId,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub max_prompt_length: usize,
    pub max_diff_length: usize,
    pub max_filename_length: usize,
    pub max_file_count: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitConfig {
    pub timeout_seconds: u64,
    pub batch_size: usize,
    pub max_files_per_operation: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    pub level: SecurityLevel,
    pub allow_symlinks: bool,
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::DirectoryNotFound)?;
        Ok(PathBuf::from(home).join(".config").join("gitward"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the user config file when present, then apply environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let base = match Self::config_path() {
            Ok(path) if path.exists() => Self::read_file(&path)?,
            _ => Self::default_config(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Load configuration from a specific TOML file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Defaults overlaid with `GITWARD_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default_config().with_overrides(lookup)
    }

    /// Apply overrides and validate the result
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(binary) = lookup(ENV_AI_BINARY) {
            self.ai.binary = binary;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.ai.model = model.parse()?;
        }
        if let Some(level) = lookup(ENV_SECURITY_LEVEL) {
            self.security.level = level.parse().map_err(ConfigError::InvalidValue)?;
        }

        override_number(&lookup, ENV_TIMEOUT_MS, &mut self.ai.timeout_ms)?;
        override_number(&lookup, ENV_MAX_RETRIES, &mut self.ai.max_retries)?;
        override_number(&lookup, ENV_RETRY_BASE_DELAY_MS, &mut self.ai.retry_base_delay_ms)?;
        override_number(&lookup, ENV_RETRY_MAX_DELAY_MS, &mut self.ai.retry_max_delay_ms)?;
        override_number(&lookup, ENV_MAX_PROMPT_LENGTH, &mut self.limits.max_prompt_length)?;
        override_number(&lookup, ENV_MAX_DIFF_LENGTH, &mut self.limits.max_diff_length)?;
        override_number(&lookup, ENV_MAX_FILENAME_LENGTH, &mut self.limits.max_filename_length)?;

        self.validate()?;
        Ok(self)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        // Validate before saving
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)?;

        let path = Self::config_path()?;
        fs::write(&path, self.to_toml()?)?;

        // Set permissions to 600 (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Config {
            ai: AiConfig {
                binary: "claude".to_string(),
                model: ModelId::Sonnet,
                timeout_ms: 120_000,
                max_retries: 3,
                retry_base_delay_ms: 1000,
                retry_max_delay_ms: 30_000,
            },
            limits: LimitsConfig {
                max_prompt_length: 100_000,
                max_diff_length: 50_000,
                max_filename_length: 255,
                max_file_count: 100,
            },
            git: GitConfig {
                timeout_seconds: 30,
                batch_size: 100,
                max_files_per_operation: 10_000,
            },
            security: SecurityConfig {
                level: SecurityLevel::Strict,
                allow_symlinks: false,
            },
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_binary_name(&self.ai.binary) {
            return Err(ConfigError::InvalidValue(format!(
                "Invalid AI binary name: {:?}. Use a bare executable name",
                self.ai.binary
            )));
        }

        check_range("ai.timeout_ms", self.ai.timeout_ms, 1_000, 600_000)?;
        check_range("ai.max_retries", self.ai.max_retries as u64, 0, 10)?;
        check_range("ai.retry_base_delay_ms", self.ai.retry_base_delay_ms, 100, 30_000)?;
        check_range(
            "ai.retry_max_delay_ms",
            self.ai.retry_max_delay_ms,
            self.ai.retry_base_delay_ms,
            120_000,
        )?;
        check_range("limits.max_prompt_length", self.limits.max_prompt_length as u64, 1_000, 1_000_000)?;
        check_range("limits.max_diff_length", self.limits.max_diff_length as u64, 100, 500_000)?;
        check_range("limits.max_filename_length", self.limits.max_filename_length as u64, 1, 4_096)?;
        check_range("limits.max_file_count", self.limits.max_file_count as u64, 1, 10_000)?;
        check_range("git.timeout_seconds", self.git.timeout_seconds, 1, 3_600)?;
        check_range("git.batch_size", self.git.batch_size as u64, 1, 1_000)?;
        check_range(
            "git.max_files_per_operation",
            self.git.max_files_per_operation as u64,
            1,
            100_000,
        )?;

        if self.limits.max_diff_length > self.limits.max_prompt_length {
            return Err(ConfigError::InvalidValue(
                "max_diff_length must not exceed max_prompt_length".to_string(),
            ));
        }

        Ok(())
    }

    pub fn security_policy<P: AsRef<Path>>(&self, root: P) -> SecurityPolicy {
        SecurityPolicy::new(self.security.level)
            .with_allowed_root(root)
            .with_symlinks(self.security.allow_symlinks)
    }

    pub fn arg_limits(&self) -> ArgLimits {
        ArgLimits {
            path: SecurityPolicy::new(self.security.level).max_path_length(),
            prompt: self.limits.max_prompt_length,
            ..ArgLimits::default()
        }
    }

    pub fn invoker_settings(&self) -> InvokerSettings {
        InvokerSettings {
            batch_size: self.git.batch_size,
            max_items_per_operation: self.git.max_files_per_operation,
            ..InvokerSettings::default()
        }
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git.timeout_seconds)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_millis(self.ai.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.ai.max_retries,
            base_delay: Duration::from_millis(self.ai.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.ai.retry_max_delay_ms),
        }
    }

    pub fn prompt_limits(&self) -> PromptLimits {
        PromptLimits {
            max_prompt_length: self.limits.max_prompt_length,
            max_diff_length: self.limits.max_diff_length,
            max_filename_length: self.limits.max_filename_length,
            max_file_count: self.limits.max_file_count,
        }
    }
}

fn is_valid_binary_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && name.len() <= 64
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn override_number<T, F>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{} must be a non-negative integer, got {:?}", key, raw))
        })?;
    }
    Ok(())
}
