//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use openair_core::{DEFAULT_BASE_URL, SingleInstanceGuard};
use openair_types::{LocationError, LocationKey};

/// Environment variable that supplies the API token.
pub const TOKEN_ENV_VAR: &str = "OPENAIR_TOKEN";

/// Place used when none is configured and auto-detection fails.
pub const FALLBACK_LOCATION: &str = "San Francisco";

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote API settings.
    pub api: ApiConfig,
    /// Polling cadence.
    pub schedule: ScheduleConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Which place to monitor.
    pub location: LocationConfig,
    /// Single-instance lock settings.
    pub lock: LockConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Take the API token from [`TOKEN_ENV_VAR`] if it is set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR)
            && !token.trim().is_empty()
        {
            self.api.token = token;
        }
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - The API base URL is http(s) and a token is present
    /// - Poll interval is within bounds (10s - 1 hour) and the tick fits inside it
    /// - Paths are not empty
    /// - The configured location, if any, parses
    ///
    /// # Example
    ///
    /// ```
    /// use openair_service::Config;
    ///
    /// let mut config = Config::default();
    /// config.api.token = "my-token".to_string();
    /// config.validate().expect("Default config with a token should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.api.validate());
        errors.extend(self.schedule.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.location.validate());
        errors.extend(self.lock.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Whole-request timeout for API calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Minimum age of the last success before a tick fetches again.
    pub fn poll_interval(&self) -> time::Duration {
        time::Duration::seconds(self.schedule.poll_interval_secs as i64)
    }

    /// How often the scheduler wakes up.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.schedule.tick_secs)
    }

    /// The configured location, `None` when it should be auto-detected.
    pub fn location_key(&self) -> Result<Option<LocationKey>, LocationError> {
        self.location
            .query
            .as_deref()
            .map(LocationKey::parse)
            .transpose()
    }
}

/// Remote API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API root URL.
    pub base_url: String,
    /// API token. May be left empty here and supplied through `OPENAIR_TOKEN`.
    pub token: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Maximum request timeout in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 120;

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: String::new(),
            timeout_secs: 10,
        }
    }
}

impl ApiConfig {
    /// Validate API configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!(
                    "invalid base URL '{}': must start with http:// or https://",
                    self.base_url
                ),
            });
        }

        if self.token.trim().is_empty() {
            errors.push(ValidationError {
                field: "api.token".to_string(),
                message: format!("API token cannot be empty (set it here or in {})", TOKEN_ENV_VAR),
            });
        }

        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            errors.push(ValidationError {
                field: "api.timeout_secs".to_string(),
                message: format!(
                    "timeout {} is out of range (1-{} seconds)",
                    self.timeout_secs, MAX_TIMEOUT_SECS
                ),
            });
        }

        errors
    }
}

/// Minimum poll interval in seconds (10 seconds).
pub const MIN_POLL_INTERVAL: u64 = 10;
/// Maximum poll interval in seconds (1 hour).
pub const MAX_POLL_INTERVAL: u64 = 3600;

/// Scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds that must pass after a successful fetch before the next one.
    pub poll_interval_secs: u64,
    /// Seconds between scheduler wake-ups.
    pub tick_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            tick_secs: 60,
        }
    }
}

impl ScheduleConfig {
    /// Validate scheduling configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.poll_interval_secs < MIN_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "schedule.poll_interval_secs".to_string(),
                message: format!(
                    "poll interval {} is too short (minimum {} seconds)",
                    self.poll_interval_secs, MIN_POLL_INTERVAL
                ),
            });
        } else if self.poll_interval_secs > MAX_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "schedule.poll_interval_secs".to_string(),
                message: format!(
                    "poll interval {} is too long (maximum {} seconds / 1 hour)",
                    self.poll_interval_secs, MAX_POLL_INTERVAL
                ),
            });
        }

        if self.tick_secs == 0 {
            errors.push(ValidationError {
                field: "schedule.tick_secs".to_string(),
                message: "tick cannot be 0".to_string(),
            });
        } else if self.tick_secs > self.poll_interval_secs {
            errors.push(ValidationError {
                field: "schedule.tick_secs".to_string(),
                message: format!(
                    "tick {} is longer than the poll interval {}",
                    self.tick_secs, self.poll_interval_secs
                ),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: openair_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Location configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Place name or `lat,lon`. Omit to detect the location from the IP.
    pub query: Option<String>,
    /// Place used when detection fails.
    pub fallback: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            query: None,
            fallback: FALLBACK_LOCATION.to_string(),
        }
    }
}

impl LocationConfig {
    /// Validate location configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(query) = &self.query
            && let Err(e) = LocationKey::parse(query)
        {
            errors.push(ValidationError {
                field: "location.query".to_string(),
                message: format!("invalid location '{}': {}", query, e),
            });
        }

        if let Err(e) = LocationKey::parse(&self.fallback) {
            errors.push(ValidationError {
                field: "location.fallback".to_string(),
                message: format!("invalid location '{}': {}", self.fallback, e),
            });
        }

        errors
    }
}

/// Single-instance lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Marker file path.
    pub path: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: SingleInstanceGuard::default_path(),
        }
    }
}

impl LockConfig {
    /// Validate lock configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "lock.path".to_string(),
                message: "lock file path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `api.token` or `schedule.tick_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("openair")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.api.token = "test-token".to_string();
        config
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "https://api.waqi.info");
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.schedule.poll_interval_secs, 300);
        assert_eq!(config.schedule.tick_secs, 60);
        assert_eq!(config.location.query, None);
        assert_eq!(config.location.fallback, "San Francisco");
    }

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.path, openair_store::default_db_path());
    }

    #[test]
    fn test_lock_config_default() {
        let config = LockConfig::default();
        assert!(config.path.ends_with("openair.lock"));
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), time::Duration::minutes(5));
        assert_eq!(config.tick_period(), Duration::from_secs(60));
    }

    #[test]
    fn test_location_key() {
        let mut config = Config::default();
        assert_eq!(config.location_key().unwrap(), None);

        config.location.query = Some("37.77493,-122.41942".to_string());
        assert_eq!(
            config.location_key().unwrap().unwrap().to_string(),
            "37.775;-122.419"
        );

        config.location.query = Some("   ".to_string());
        assert!(config.location_key().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("openair").join("config.toml");

        let mut config = valid_config();
        config.schedule.poll_interval_secs = 600;
        config.storage.path = PathBuf::from("/tmp/test.db");
        config.location.query = Some("Paris".to_string());

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.api.token, "test-token");
        assert_eq!(loaded.schedule.poll_interval_secs, 600);
        assert_eq!(loaded.storage.path, PathBuf::from("/tmp/test.db"));
        assert_eq!(loaded.location.query, Some("Paris".to_string()));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_config_partial_toml() {
        let toml = r#"
            [api]
            token = "abc"

            [location]
            query = "Beijing"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.api.token, "abc");
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.schedule.poll_interval_secs, 300);
        assert_eq!(config.location.query, Some("Beijing".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("openair/config.toml"));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Read {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let display = format!("{}", error);
        assert!(display.contains("/test/path"));
        assert!(display.contains("not found"));
    }

    // ==========================================================================
    // Validation tests
    // ==========================================================================

    #[test]
    fn test_default_config_needs_token() {
        let result = Config::default().validate();
        match result {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "api.token");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_api_validation() {
        let bad_url = ApiConfig {
            base_url: "api.waqi.info".to_string(),
            token: "t".to_string(),
            timeout_secs: 10,
        };
        let errors = bad_url.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("http://"));

        let bad_timeout = ApiConfig {
            timeout_secs: 0,
            token: "t".to_string(),
            ..ApiConfig::default()
        };
        let errors = bad_timeout.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("out of range"));
    }

    #[test]
    fn test_schedule_validation() {
        assert!(ScheduleConfig::default().validate().is_empty());

        let short_poll = ScheduleConfig {
            poll_interval_secs: 5,
            tick_secs: 5,
        };
        let errors = short_poll.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("too short"));

        let long_poll = ScheduleConfig {
            poll_interval_secs: 7200,
            tick_secs: 60,
        };
        let errors = long_poll.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("too long"));

        let slow_tick = ScheduleConfig {
            poll_interval_secs: 60,
            tick_secs: 120,
        };
        let errors = slow_tick.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "schedule.tick_secs");
    }

    #[test]
    fn test_retention_is_not_configurable() {
        // History is always kept for RETENTION_WINDOW; a retention key is ignored.
        let toml = r#"
            [api]
            token = "test-token"

            [schedule]
            poll_interval_secs = 600
            retention_hours = 9223372036854775807
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.schedule.poll_interval_secs, 600);
        config.validate().unwrap();

        let saved = toml::to_string_pretty(&config).unwrap();
        assert!(!saved.contains("retention"));
    }

    #[test]
    fn test_location_validation() {
        let bad = LocationConfig {
            query: Some("91.0,10.0".to_string()),
            fallback: FALLBACK_LOCATION.to_string(),
        };
        let errors = bad.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "location.query");

        let blank_fallback = LocationConfig {
            query: None,
            fallback: " ".to_string(),
        };
        assert_eq!(blank_fallback.validate().len(), 1);
    }

    #[test]
    fn test_paths_validation() {
        let empty = StorageConfig {
            path: PathBuf::new(),
        };
        assert!(empty.validate()[0].message.contains("cannot be empty"));

        let empty = LockConfig {
            path: PathBuf::new(),
        };
        assert!(empty.validate()[0].message.contains("cannot be empty"));
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = Config::default();
        config.api.timeout_secs = 0;
        config.schedule.tick_secs = 0;
        config.storage.path = PathBuf::new();

        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError {
            field: "api.token".to_string(),
            message: "cannot be empty".to_string(),
        };
        assert_eq!(format!("{}", error), "api.token: cannot be empty");
    }

    #[test]
    fn test_config_validation_error_display() {
        let errors = vec![
            ValidationError {
                field: "api.token".to_string(),
                message: "cannot be empty".to_string(),
            },
            ValidationError {
                field: "schedule.tick_secs".to_string(),
                message: "tick cannot be 0".to_string(),
            },
        ];
        let error = ConfigError::Validation(errors);
        let display = format!("{}", error);
        assert!(display.contains("api.token"));
        assert!(display.contains("schedule.tick_secs"));
    }
}
