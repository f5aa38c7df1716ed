//! Configuration
//!
//! Loads the node's TOML configuration: worker counts, pass intervals, the
//! fetcher's HTTP identity, and how the node learns its partition
//! assignment. Every section has defaults so a missing file or section
//! still yields a runnable configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerSection,
    #[serde(default)]
    pub pagerank: PageRankSection,
    #[serde(default)]
    pub partition: PartitionSection,
    #[serde(default)]
    pub fetcher: FetcherSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerSection {
    /// Number of concurrent fetch workers.
    pub fetch_workers: usize,
    /// Seconds between crawl passes.
    pub update_interval_secs: u64,
    /// Minimum age in seconds before a link is re-crawled.
    pub reindex_threshold_secs: u64,
}

impl Default for CrawlerSection {
    fn default() -> Self {
        Self {
            fetch_workers: 4,
            update_interval_secs: 300,
            reindex_threshold_secs: 7 * 24 * 3600,
        }
    }
}

impl CrawlerSection {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn reindex_threshold(&self) -> Duration {
        Duration::from_secs(self.reindex_threshold_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PageRankSection {
    /// Number of BSP compute workers.
    pub compute_workers: usize,
    pub damping_factor: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Seconds between score update passes.
    pub update_interval_secs: u64,
}

impl Default for PageRankSection {
    fn default() -> Self {
        Self {
            compute_workers: 2,
            damping_factor: 0.85,
            tolerance: 1e-6,
            max_iterations: 100,
            update_interval_secs: 3600,
        }
    }
}

impl PageRankSection {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// How the node learns its partition assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionMode {
    /// Use the static `partition` / `num_partitions` values below.
    Fixed,
    /// Read the assignment from the environment on every pass.
    Env,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartitionSection {
    pub mode: PartitionMode,
    pub partition: u32,
    pub num_partitions: u32,
}

impl Default for PartitionSection {
    fn default() -> Self {
        Self {
            mode: PartitionMode::Fixed,
            partition: 0,
            num_partitions: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherSection {
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for FetcherSection {
    fn default() -> Self {
        Self {
            user_agent: concat!("trawler/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl FetcherSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Loads and validates a configuration file.
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    let raw = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.crawler.fetch_workers == 0 {
            return Err(ConfigError::Validation(
                "crawler.fetch_workers must be > 0".to_string(),
            ));
        }
        if self.crawler.update_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "crawler.update_interval_secs must be > 0".to_string(),
            ));
        }
        if self.crawler.reindex_threshold_secs == 0 {
            return Err(ConfigError::Validation(
                "crawler.reindex_threshold_secs must be > 0".to_string(),
            ));
        }
        if self.pagerank.compute_workers == 0 {
            return Err(ConfigError::Validation(
                "pagerank.compute_workers must be > 0".to_string(),
            ));
        }
        if !(self.pagerank.damping_factor > 0.0 && self.pagerank.damping_factor < 1.0) {
            return Err(ConfigError::Validation(
                "pagerank.damping_factor must be in (0, 1)".to_string(),
            ));
        }
        if self.pagerank.update_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "pagerank.update_interval_secs must be > 0".to_string(),
            ));
        }
        if self.partition.mode == PartitionMode::Fixed {
            if self.partition.num_partitions == 0
                || self.partition.partition >= self.partition.num_partitions
            {
                return Err(ConfigError::Validation(format!(
                    "partition.partition {} is not valid for {} partitions",
                    self.partition.partition, self.partition.num_partitions
                )));
            }
        }
        if self.fetcher.user_agent.is_empty() {
            return Err(ConfigError::Validation(
                "fetcher.user_agent must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.crawler.fetch_workers, 4);
        assert_eq!(config.partition.mode, PartitionMode::Fixed);
    }

    #[test]
    fn test_parse_overrides_sections() {
        let config: Config = toml::from_str(
            r#"
            [crawler]
            fetch_workers = 16
            update_interval_secs = 60

            [pagerank]
            compute_workers = 8
            damping_factor = 0.9

            [partition]
            mode = "env"

            [fetcher]
            user_agent = "custom-bot/1.0"
            "#,
        )
        .unwrap();

        assert_eq!(config.crawler.fetch_workers, 16);
        assert_eq!(config.crawler.update_interval(), Duration::from_secs(60));
        // Unset keys keep their defaults.
        assert_eq!(config.crawler.reindex_threshold_secs, 7 * 24 * 3600);
        assert_eq!(config.pagerank.compute_workers, 8);
        assert!((config.pagerank.damping_factor - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.partition.mode, PartitionMode::Env);
        assert_eq!(config.fetcher.user_agent, "custom-bot/1.0");
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let config: Config = toml::from_str("[crawler]\nfetch_workers = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_out_of_range_partition() {
        let config: Config = toml::from_str(
            "[partition]\nmode = \"fixed\"\npartition = 3\nnum_partitions = 3\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_damping_factor() {
        let config: Config = toml::from_str("[pagerank]\ndamping_factor = 1.5\n").unwrap();
        assert!(config.validate().is_err());
    }
}
