use anyhow::{Context, Result};
use query::{GroundingConfig, RetrievalConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub server: ServerConfig,
    pub llm: LlmSettings,
    pub concurrency: ConcurrencyConfig,
    pub retrieval: RetrievalConfig,
    pub grounding: GroundingConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub rules: RulesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // Cache aggressively, short timeouts
    Accurate, // Always fresh, long timeouts
    Balanced, // Default: cache when available
}

impl std::str::FromStr for OperationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "accurate" => Ok(Self::Accurate),
            "balanced" => Ok(Self::Balanced),
            other => anyhow::bail!("Unknown operation mode: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub extraction_model: String,
    pub answer_model: String,
    pub request_timeout_secs: u64,
    /// Longest document prefix sent for extraction.
    pub context_limit_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_llm_calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// TOML or JSON rule file. Built-in rules when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    /// Used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            extraction_model: "llama3".to_string(),
            answer_model: "llama3".to_string(),
            request_timeout_secs: 120,
            context_limit_chars: extract::DEFAULT_CONTEXT_LIMIT_CHARS,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_llm_calls: 3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
            ttl_secs: 3600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info,api=debug,graph=debug,query=debug".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            server: ServerConfig::default(),
            llm: LlmSettings::default(),
            concurrency: ConcurrencyConfig::default(),
            retrieval: RetrievalConfig::default(),
            grounding: GroundingConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            rules: RulesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        Self::default().with_mode(OperationMode::Fast)
    }

    pub fn accurate_mode() -> Self {
        Self::default().with_mode(OperationMode::Accurate)
    }

    /// Apply a mode preset over timeouts, retries, concurrency and cache.
    pub fn with_mode(mut self, mode: OperationMode) -> Self {
        self.mode = mode;
        match mode {
            OperationMode::Fast => {
                self.llm.request_timeout_secs = 30;
                self.grounding.answer_timeout_secs = 20;
                self.concurrency.max_concurrent_llm_calls = 10;
                self.retry = RetryConfig {
                    max_retries: 2,
                    initial_backoff_ms: 500,
                    max_backoff_ms: 5000,
                };
                self.cache = CacheConfig {
                    enabled: true,
                    max_entries: 50000,
                    ttl_secs: 6 * 3600,
                };
            }
            OperationMode::Accurate => {
                self.llm.request_timeout_secs = 300;
                self.grounding.answer_timeout_secs = 120;
                self.concurrency.max_concurrent_llm_calls = 2;
                self.retry = RetryConfig {
                    max_retries: 5,
                    initial_backoff_ms: 2000,
                    max_backoff_ms: 20000,
                };
                self.cache = CacheConfig {
                    enabled: false,
                    max_entries: 0,
                    ttl_secs: 0,
                };
            }
            OperationMode::Balanced => {}
        }
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.retrieval
            .validate()
            .context("Invalid [retrieval] settings")?;
        Ok(())
    }

    /// Read `path` if it exists, otherwise defaults; then apply `mode` if given.
    pub fn load(path: Option<&Path>, mode: Option<OperationMode>) -> Result<Self> {
        let config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                Self::from_toml_str(&content)?
            }
            _ => Self::default(),
        };

        Ok(match mode {
            Some(mode) => config.with_mode(mode),
            None => config,
        })
    }

    /// Settings for the extraction client.
    pub fn extraction_llm(&self) -> extract::LlmConfig {
        extract::LlmConfig {
            base_url: self.llm.base_url.clone(),
            model: self.llm.extraction_model.clone(),
            timeout_secs: self.llm.request_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            bind_addr = "127.0.0.1:8080"

            [retrieval]
            direct_weight = 1.0
            hop_weight = 0.25
            finding_boost = 0.5
            fallback_top_n = 3

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.retrieval.hop_weight, 0.25);
        assert!(config.logging.json);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.llm.context_limit_chars, 10_000);
        assert_eq!(config.mode, OperationMode::Balanced);
    }

    #[test]
    fn test_hop_weight_must_stay_below_direct_weight() {
        let err = AppConfig::from_toml_str(
            r#"
            [retrieval]
            direct_weight = 1.0
            hop_weight = 1.0
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("hop_weight"));

        assert!(AppConfig::from_toml_str("[retrieval]\nhop_weight = -0.5\n").is_err());
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_mode_presets() {
        let fast = AppConfig::fast_mode();
        assert_eq!(fast.retry.max_retries, 2);
        assert!(fast.cache.enabled);

        let accurate = AppConfig::accurate_mode();
        assert!(!accurate.cache.enabled);
        assert!(accurate.llm.request_timeout_secs > fast.llm.request_timeout_secs);

        assert_eq!("Fast".parse::<OperationMode>().unwrap(), OperationMode::Fast);
        assert!("turbo".parse::<OperationMode>().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = AppConfig::load(
            Some(Path::new("/nonexistent/lexgraph.toml")),
            Some(OperationMode::Accurate),
        )
        .unwrap();
        assert_eq!(config.mode, OperationMode::Accurate);
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }
}
