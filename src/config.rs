//! Configuration Management
//!
//! A [`PipelineConfig`] value describes everything the default pipeline is
//! built from. There is no process-wide default pipeline; callers load or
//! construct a config and pass it to [`Pipeline::from_config`].
//!
//! [`Pipeline::from_config`]: crate::pipeline::Pipeline::from_config

use crate::error::{Error, Result};
use crate::pipeline::headers::DEFAULT_REQUEST_ID_HEADER;
use crate::pipeline::HttpLogDetail;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Application id prepended to the user agent
    pub user_agent: Option<String>,
    /// Header carrying the client request id
    pub request_id_header: String,
    /// Default service endpoint, bound to the `endpoint` host placeholder
    pub endpoint: Option<String>,
    /// Static headers added to every request
    pub headers: BTreeMap<String, String>,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    /// Keep a per-host cookie jar
    pub cookies: bool,
    /// Install the decoding policy
    pub decode: bool,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub token: TokenConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
            endpoint: None,
            headers: BTreeMap::new(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            cookies: false,
            decode: true,
            timeout_secs: 30,
            token: TokenConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 800,
            max_delay_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: HttpLogDetail,
    /// Extra headers whose values may be logged
    pub allowed_headers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Refresh tokens this long before they expire
    pub refresh_offset_secs: u64,
    /// Minimum spacing between refresh attempts
    pub retry_delay_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_offset_secs: 300,
            retry_delay_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Get the default config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudrest").join("config.yaml"))
    }

    /// Load the config file from the user's config dir, or defaults if there is none
    pub fn discover() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load a config file; `.json` files are read as JSON, anything else as YAML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            message: format!("failed to read config {}", path.display()),
            source: Box::new(e),
        })?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            _ => serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline could not be built from
    pub fn validate(&self) -> Result<()> {
        if HeaderName::from_bytes(self.request_id_header.as_bytes()).is_err() {
            return Err(Error::Config(format!(
                "invalid request id header `{}`",
                self.request_id_header
            )));
        }
        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(Error::Config(format!("invalid header name `{name}`")));
            }
            if HeaderValue::from_str(value).is_err() {
                return Err(Error::Config(format!("invalid value for header `{name}`")));
            }
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::Config(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }
        if let Some(endpoint) = &self.endpoint {
            let absolute = if endpoint.contains("://") {
                endpoint.clone()
            } else {
                format!("https://{endpoint}")
            };
            url::Url::parse(&absolute)
                .map_err(|e| Error::Config(format!("invalid endpoint `{endpoint}`: {e}")))?;
        }
        Ok(())
    }

    /// Render the effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: PipelineConfig = serde_yaml::from_str(
            r#"
user_agent: registry-cli/1.0
retry:
  max_retries: 5
logging:
  level: headers
"#,
        )
        .unwrap();
        assert_eq!(config.user_agent.as_deref(), Some("registry-cli/1.0"));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 800);
        assert_eq!(config.logging.level, HttpLogDetail::Headers);
        assert_eq!(config.request_id_header, "x-ms-client-request-id");
        assert!(config.decode);
        assert_eq!(config.token.refresh_offset_secs, 300);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.retry.max_delay_ms = 10;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = PipelineConfig::default();
        config.headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = PipelineConfig::default();
        config.endpoint = Some("not a url".to_string());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_json_and_yaml_files() {
        let dir = std::env::temp_dir().join(format!("cloudrest-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let json = dir.join("config.json");
        std::fs::write(&json, r#"{"cookies": true, "timeout_secs": 5}"#).unwrap();
        let config = PipelineConfig::load(&json).unwrap();
        assert!(config.cookies);
        assert_eq!(config.timeout_secs, 5);

        let yaml = dir.join("config.yaml");
        std::fs::write(&yaml, "endpoint: https://myregistry.azurecr.io\n").unwrap();
        let config = PipelineConfig::load(&yaml).unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("https://myregistry.azurecr.io"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = PipelineConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed: PipelineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
