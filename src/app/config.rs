//! TOML configuration file loading
//!
//! An explicitly named file must exist. Otherwise the default
//! `<config_dir>/Workline/workline.toml` is used when present, and built-in
//! defaults apply when it is not. Every field is optional.

use crate::core::error_handling::ContextualError;
use crate::core::retry::RetryPolicy;
use crate::pipeline::PipelineOptions;
use crate::queue::api::{IdScheme, QueueOptions, StoreBackend, StoreOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("The specified configuration file does not exist: {}", path.display())]
    Missing { path: PathBuf },

    #[error("Error reading configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ContextualError for ConfigError {
    fn is_user_actionable(&self) -> bool {
        true
    }

    fn user_message(&self) -> Option<String> {
        Some(self.to_string())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    /// `-1` waits indefinitely
    pub timeout_ms: i64,
    pub ack_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub verify_put: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            timeout_ms: -1,
            ack_timeout_ms: 30_000,
            poll_interval_ms: 10,
            heartbeat_interval_ms: 1_000,
            verify_put: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub backend: String,
    pub path: PathBuf,
    pub id_scheme: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: PathBuf::from("workline.db"),
            id_scheme: "unique".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub pipeline: PipelineSection,
    pub store: StoreSection,
    pub retry: RetrySection,
    pub logging: LoggingSection,
}

impl EngineConfig {
    /// `<config_dir>/Workline/workline.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Workline").join("workline.toml"))
    }

    /// Load from `explicit`, else from the default path if it exists
    ///
    /// Returns the configuration and the file it came from, if any.
    pub async fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigError::Missing {
                    path: path.to_path_buf(),
                })
            }
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok((Self::default(), None)),
            },
        };

        let contents =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.clone(),
                source,
            },
            other => other,
        })?;
        Ok((config, Some(path)))
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline_options()?;
        self.store_options()?;
        self.retry_policy()?;
        if let Some(format) = &self.logging.format {
            if !["text", "ext", "json"].contains(&format.as_str()) {
                return Err(invalid(format!(
                    "logging.format must be text, ext or json, not '{}'",
                    format
                )));
            }
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions, ConfigError> {
        let p = &self.pipeline;
        let timeout = match p.timeout_ms {
            -1 => None,
            ms if ms > 0 => Some(Duration::from_millis(ms as u64)),
            ms => {
                return Err(invalid(format!(
                    "pipeline.timeout_ms must be positive or -1, not {}",
                    ms
                )))
            }
        };
        for (field, value) in [
            ("ack_timeout_ms", p.ack_timeout_ms),
            ("poll_interval_ms", p.poll_interval_ms),
            ("heartbeat_interval_ms", p.heartbeat_interval_ms),
        ] {
            if value == 0 {
                return Err(invalid(format!("pipeline.{} must be positive", field)));
            }
        }

        Ok(PipelineOptions {
            queue: QueueOptions {
                timeout,
                poll_interval: Duration::from_millis(p.poll_interval_ms),
                heartbeat_interval: Duration::from_millis(p.heartbeat_interval_ms),
                verify_put: p.verify_put,
            },
            ack_timeout: Duration::from_millis(p.ack_timeout_ms),
            retry: self.retry_policy()?,
        })
    }

    pub fn store_options(&self) -> Result<StoreOptions, ConfigError> {
        let backend = match self.store.backend.as_str() {
            "memory" => StoreBackend::Memory,
            "sqlite" => StoreBackend::Sqlite(self.store.path.clone()),
            other => {
                return Err(invalid(format!(
                    "store.backend must be memory or sqlite, not '{}'",
                    other
                )))
            }
        };
        let id_scheme = IdScheme::from_str(&self.store.id_scheme).map_err(|_| {
            invalid(format!(
                "store.id_scheme must be unique or content, not '{}'",
                self.store.id_scheme
            ))
        })?;
        Ok(StoreOptions { backend, id_scheme })
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        Ok(RetryPolicy {
            max_attempts: self.retry.max_attempts,
            delay: Duration::from_millis(self.retry.delay_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());

        let options = config.pipeline_options().unwrap();
        assert_eq!(options.queue.timeout, None);
        assert_eq!(options.ack_timeout, Duration::from_secs(30));
        assert_eq!(options.queue.poll_interval, Duration::from_millis(10));
        assert_eq!(config.store_options().unwrap(), StoreOptions::default());
    }

    #[test]
    fn test_full_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            [pipeline]
            timeout_ms = 2500
            ack_timeout_ms = 900
            verify_put = true

            [store]
            backend = "sqlite"
            path = "/tmp/queues.db"
            id_scheme = "content"

            [retry]
            max_attempts = 5
            delay_ms = 20

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        let options = config.pipeline_options().unwrap();
        assert_eq!(options.queue.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(options.ack_timeout, Duration::from_millis(900));
        assert!(options.queue.verify_put);
        assert_eq!(options.retry.max_attempts, 5);

        let store = config.store_options().unwrap();
        assert_eq!(
            store.backend,
            StoreBackend::Sqlite(PathBuf::from("/tmp/queues.db"))
        );
        assert_eq!(store.id_scheme, IdScheme::Content);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        for doc in [
            "[pipeline]\ntimeout_ms = 0",
            "[pipeline]\ntimeout_ms = -5",
            "[pipeline]\nack_timeout_ms = 0",
            "[store]\nbackend = \"redis\"",
            "[store]\nid_scheme = \"random\"",
            "[retry]\nmax_attempts = 0",
            "[logging]\nformat = \"xml\"",
        ] {
            let err = EngineConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{}", doc);
            assert!(err.is_user_actionable());
        }
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = EngineConfig::from_toml_str("[pipeline]\ntimeout = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\ndelay_ms = 7").unwrap();

        let (config, source) = EngineConfig::load(Some(file.path())).await.unwrap();
        assert_eq!(config.retry.delay_ms, 7);
        assert_eq!(source.as_deref(), Some(file.path()));
    }

    #[tokio::test]
    async fn test_load_missing_explicit_file() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/workline.toml")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }
}
