//! Global configuration stored in `~/.remora/config.toml`.
//!
//! Every field has a serde default so a missing or partial file behaves like
//! the built-in defaults. `load` never fails on a missing file, only on a
//! present-but-unparseable one.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::embeddings::WorkerConfig;
use crate::paths;
use crate::resilience::{BreakerConfig, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Ring buffer capacity in lines; also bounds the output preview.
    pub buffer_lines: usize,
    /// Lines of captured output kept on each stored record.
    pub preview_lines: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            buffer_lines: 1000,
            preview_lines: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Persist the cache snapshot on shutdown and warm-load it on start.
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub refill_interval_secs: u64,
    pub refill_batch: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        let d = WorkerConfig::default();
        Self {
            workers: d.workers,
            queue_capacity: d.queue_capacity,
            max_retries: d.max_retries,
            retry_delay_secs: d.retry_delay.as_secs(),
            refill_interval_secs: d.refill_interval.as_secs(),
            refill_batch: d.refill_batch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider; currently only "gemini" is recognized.
    pub provider: String,
    pub model: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "text-embedding-004".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub limit: usize,
    /// Minimum cosine similarity for semantic hits.
    pub threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub max_failures: u32,
    pub breaker_timeout_secs: u64,
    pub half_open_requests: u32,
    pub retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            breaker_timeout_secs: 30,
            half_open_requests: 1,
            retry_attempts: 3,
            retry_initial_delay_ms: 100,
        }
    }
}

impl Config {
    /// Load from `~/.remora/config.toml`, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Write the config to `~/.remora/config.toml`, creating the directory.
    pub fn save(&self) -> Result<()> {
        let path = paths::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.worker.workers,
            queue_capacity: self.worker.queue_capacity,
            max_retries: self.worker.max_retries,
            retry_delay: Duration::from_secs(self.worker.retry_delay_secs),
            refill_interval: Duration::from_secs(self.worker.refill_interval_secs),
            refill_batch: self.worker.refill_batch,
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            max_failures: self.resilience.max_failures,
            timeout: Duration::from_secs(self.resilience.breaker_timeout_secs),
            max_requests: self.resilience.half_open_requests,
            on_state_change: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.resilience.retry_attempts,
            initial_delay: Duration::from_millis(self.resilience.retry_initial_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_worker_defaults() {
        let config = Config::default();
        let worker = config.worker_config();
        assert_eq!(worker.workers, 2);
        assert_eq!(worker.queue_capacity, 1000);
        assert_eq!(worker.max_retries, 3);
        assert_eq!(worker.retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn partial_file_fills_missing_sections_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [cache]
            max_entries = 50
            persist = false
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.max_entries, 50);
        assert!(!config.cache.persist);
        assert_eq!(config.worker.workers, 2);
        assert_eq!(config.search.limit, 10);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[history]"));
        assert!(toml_str.contains("[embedding]"));
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.cache.max_entries, config.cache.max_entries);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.history.buffer_lines, 1000);
    }
}
