//! Configuration for the platform clients and the job flows.
//!
//! Configuration can be loaded from:
//! - a TOML file (default: `<config dir>/discovery/discovery.toml`)
//! - environment variables (`DISCOVERY_*`)
//!
//! # Example
//!
//! ```toml
//! [api]
//! base_url = "https://westeurope-1.cognitedata.com"
//! project = "publicdata"
//! token = "${DISCOVERY_TOKEN}"
//!
//! [poll]
//! interval_ms = 1000
//! max_interval_ms = 10000
//! timeout_secs = 900
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use discovery_core::defaults;

/// Resumable upload chunks must be a multiple of this size.
const UPLOAD_CHUNK_GRANULARITY: usize = 256 * 1024;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for discovery_core::Error {
    fn from(e: ConfigError) -> Self {
        discovery_core::Error::Config(e.to_string())
    }
}

fn default_timeout() -> u64 {
    defaults::HTTP_TIMEOUT_SECS
}

fn default_chunk_bytes() -> usize {
    defaults::UPLOAD_CHUNK_BYTES
}

/// Connection settings for the platform REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Cluster base URL, without the `/api/v1` suffix.
    pub base_url: String,
    /// Project name.
    pub project: String,
    /// Bearer token (optional for local mocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Uploads larger than this are sent as a chunked resumable session.
    #[serde(default = "default_chunk_bytes")]
    pub upload_chunk_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            project: String::new(),
            token: None,
            timeout_seconds: defaults::HTTP_TIMEOUT_SECS,
            upload_chunk_bytes: defaults::UPLOAD_CHUNK_BYTES,
        }
    }
}

impl ApiConfig {
    /// Root URL for project-scoped endpoints.
    pub fn project_url(&self) -> String {
        format!(
            "{}/api/v1/projects/{}",
            self.base_url.trim_end_matches('/'),
            self.project
        )
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "api.base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }

        if self.project.trim().is_empty() {
            return Err(ConfigError::Validation(
                "api.project cannot be empty".to_string(),
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "api.timeout_seconds must be positive".to_string(),
            ));
        }

        if self.upload_chunk_bytes == 0 || self.upload_chunk_bytes % UPLOAD_CHUNK_GRANULARITY != 0
        {
            return Err(ConfigError::Validation(format!(
                "api.upload_chunk_bytes must be a positive multiple of {}, got: {}",
                UPLOAD_CHUNK_GRANULARITY, self.upload_chunk_bytes
            )));
        }

        Ok(())
    }
}

/// Status polling policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    /// `0` disables the timeout.
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: defaults::POLL_INTERVAL_MS,
            max_interval_ms: defaults::POLL_MAX_INTERVAL_MS,
            multiplier: defaults::POLL_BACKOFF_MULTIPLIER,
            timeout_secs: defaults::POLL_TIMEOUT_SECS,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll.interval_ms must be positive".to_string(),
            ));
        }
        if self.max_interval_ms < self.interval_ms {
            return Err(ConfigError::Validation(format!(
                "poll.max_interval_ms ({}) is below poll.interval_ms ({})",
                self.max_interval_ms, self.interval_ms
            )));
        }
        if !self.multiplier.is_finite()
            || !(1.0..=defaults::POLL_MAX_BACKOFF_MULTIPLIER).contains(&self.multiplier)
        {
            return Err(ConfigError::Validation(format!(
                "poll.multiplier must be between 1.0 and {}, got: {}",
                defaults::POLL_MAX_BACKOFF_MULTIPLIER,
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// Artifact post-processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingConfig {
    pub link_attempts: u32,
    pub link_retry_delay_ms: u64,
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            link_attempts: defaults::LINK_ATTEMPTS,
            link_retry_delay_ms: defaults::LINK_RETRY_DELAY_MS,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub post_processing: PostProcessingConfig,
}

impl DiscoveryConfig {
    /// Returns: `<config dir>/discovery/discovery.toml`
    pub fn default_config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        path.push("discovery");
        path.push("discovery.toml");
        path
    }

    /// Load from the default path, falling back to environment variables.
    pub fn load() -> ConfigResult<Self> {
        let path = Self::default_config_path();

        if path.exists() {
            info!("Loading config from: {}", path.display());
            Self::from_file(&path)
        } else {
            debug!(
                "Config file not found at {}, using environment variables",
                path.display()
            );
            let config = Self::from_env();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load from a TOML file. `${VAR}` placeholders are replaced with the
    /// variable's value when it is set.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&Self::substitute_env_vars(&content))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `DISCOVERY_*` environment variables. Unset variables keep
    /// their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var(defaults::ENV_BASE_URL) {
            config.api.base_url = url;
        }
        if let Ok(project) = env::var(defaults::ENV_PROJECT) {
            config.api.project = project;
        }
        config.api.token = env::var(defaults::ENV_TOKEN).ok().filter(|t| !t.is_empty());
        if let Some(secs) = env_parse(defaults::ENV_TIMEOUT) {
            config.api.timeout_seconds = secs;
        }
        if let Some(bytes) = env_parse(defaults::ENV_UPLOAD_CHUNK_BYTES) {
            config.api.upload_chunk_bytes = bytes;
        }
        if let Some(ms) = env_parse(defaults::ENV_POLL_INTERVAL_MS) {
            config.poll.interval_ms = ms;
        }
        if let Some(ms) = env_parse(defaults::ENV_POLL_MAX_INTERVAL_MS) {
            config.poll.max_interval_ms = ms;
        }
        if let Some(secs) = env_parse(defaults::ENV_POLL_TIMEOUT_SECS) {
            config.poll.timeout_secs = secs;
        }
        if let Some(attempts) = env_parse(defaults::ENV_LINK_ATTEMPTS) {
            config.post_processing.link_attempts = attempts;
        }

        config
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.api.validate()?;
        self.poll.validate()?;
        if self.post_processing.link_attempts == 0 {
            return Err(ConfigError::Validation(
                "post_processing.link_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn substitute_env_vars(content: &str) -> String {
        let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");
        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_api() -> ApiConfig {
        ApiConfig {
            project: "publicdata".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_project_url() {
        let api = ApiConfig {
            base_url: "https://example.com/".to_string(),
            ..valid_api()
        };
        assert_eq!(api.project_url(), "https://example.com/api/v1/projects/publicdata");
    }

    #[test]
    fn test_api_validate_ok() {
        assert!(valid_api().validate().is_ok());
    }

    #[test]
    fn test_api_validate_rejects_bad_url() {
        let api = ApiConfig {
            base_url: "ftp://example.com".to_string(),
            ..valid_api()
        };
        assert!(matches!(api.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_api_validate_rejects_empty_project() {
        assert!(ApiConfig::default().validate().is_err());
    }

    #[test]
    fn test_api_validate_rejects_unaligned_chunk() {
        let api = ApiConfig {
            upload_chunk_bytes: 1000,
            ..valid_api()
        };
        let err = api.validate().unwrap_err();
        assert!(err.to_string().contains("upload_chunk_bytes"));
    }

    #[test]
    fn test_poll_validate() {
        assert!(PollConfig::default().validate().is_ok());
        let bad = PollConfig {
            max_interval_ms: 10,
            interval_ms: 100,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PollConfig {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_poll_validate_rejects_runaway_multiplier() {
        for multiplier in [1e20, 10.5, f64::INFINITY, f64::NAN] {
            let config = PollConfig {
                multiplier,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("poll.multiplier"), "{}", err);
        }
        let config = PollConfig {
            multiplier: 10.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_rejects_infinite_multiplier() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[api]
project = "test"

[poll]
multiplier = inf
"#
        )
        .unwrap();
        let err = DiscoveryConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("poll.multiplier"), "{}", err);
    }

    #[test]
    fn test_from_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[api]
base_url = "http://localhost:8080"
project = "test"

[poll]
interval_ms = 250
"#
        )
        .unwrap();

        let config = DiscoveryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api.project, "test");
        assert_eq!(config.api.timeout_seconds, defaults::HTTP_TIMEOUT_SECS);
        assert_eq!(config.poll.interval_ms, 250);
        assert_eq!(config.poll.max_interval_ms, defaults::POLL_MAX_INTERVAL_MS);
        assert_eq!(config.post_processing.link_attempts, defaults::LINK_ATTEMPTS);
    }

    #[test]
    fn test_from_file_invalid_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nbase_url = \"http://x\"\nproject = \"\"").unwrap();
        assert!(matches!(
            DiscoveryConfig::from_file(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_from_file_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api\nproject =").unwrap();
        assert!(matches!(
            DiscoveryConfig::from_file(file.path()),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_env_var_substitution_with_value() {
        env::set_var("DISCOVERY_TEST_SUBSTITUTION_VAR", "secret");
        let result =
            DiscoveryConfig::substitute_env_vars("token = \"${DISCOVERY_TEST_SUBSTITUTION_VAR}\"");
        env::remove_var("DISCOVERY_TEST_SUBSTITUTION_VAR");
        assert_eq!(result, "token = \"secret\"");
    }

    #[test]
    fn test_env_var_substitution_missing() {
        let content = "token = \"${DISCOVERY_NONEXISTENT_VAR_12345}\"";
        assert_eq!(DiscoveryConfig::substitute_env_vars(content), content);
    }

    #[test]
    fn test_config_error_into_core_error() {
        let err: discovery_core::Error = ConfigError::Validation("bad".to_string()).into();
        assert!(matches!(err, discovery_core::Error::Config(_)));
    }
}
