// src/config.rs

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_slice_size")]
    pub slice_size: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_slice_size() -> u64 { 1_000_000 }
fn default_page_size() -> u64 { 1000 }
fn default_request_timeout() -> u64 { 30 }
fn default_retry_delay() -> u64 { 500 }

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            slice_size: default_slice_size(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DecoderConfig {
    #[serde(default = "default_allowed_suffixes")]
    pub allowed_suffixes: Vec<String>,
}

fn default_allowed_suffixes() -> Vec<String> {
    vec![
        ".be".to_string(),
        ".vlaanderen".to_string(),
        ".brussels".to_string(),
    ]
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            allowed_suffixes: default_allowed_suffixes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    /// Link hops followed from the seed page; negative disables crawling
    #[serde(default = "default_max_depth")]
    pub max_depth: i32,
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_depth() -> i32 { 5 }
fn default_page_timeout() -> u64 { 5 }
fn default_user_agent() -> String {
    format!("ct-vat/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            page_timeout_secs: default_page_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_slice_workers")]
    pub slice_workers: usize,
    #[serde(default = "default_decode_workers")]
    pub decode_workers: usize,
    #[serde(default = "default_scrape_workers")]
    pub scrape_workers: usize,
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

fn default_slice_workers() -> usize { 4 }
fn default_decode_workers() -> usize { 4 }
fn default_scrape_workers() -> usize { 16 }
fn default_status_interval() -> u64 { 60 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slice_workers: default_slice_workers(),
            decode_workers: default_decode_workers(),
            scrape_workers: default_scrape_workers(),
            status_interval_secs: default_status_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub enabled: bool,
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgresql://localhost/ctvat".to_string()
}

fn default_max_connections() -> u32 {
    20
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// A log server registered at startup when not yet known
#[derive(Debug, Deserialize, Clone)]
pub struct ServerEntry {
    pub url: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.download.slice_size == 0 {
            anyhow::bail!("download.slice_size must be greater than 0");
        }
        if self.download.page_size == 0 {
            anyhow::bail!("download.page_size must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_valid_toml() {
        let toml_content = r#"
[download]
slice_size = 5000
page_size = 250
request_timeout_secs = 10

[decoder]
allowed_suffixes = [".be"]

[crawler]
max_depth = 2
user_agent = "test-agent"

[pipeline]
slice_workers = 2
scrape_workers = 8

[logging]
level = "debug"

[[servers]]
url = "https://ct.example.com/2024/"
nickname = "Example 2024"

[[servers]]
url = "https://ct.example.org/"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.download.slice_size, 5000);
        assert_eq!(config.download.page_size, 250);
        assert_eq!(config.download.request_timeout_secs, 10);
        assert_eq!(config.download.retry_delay_ms, 500);
        assert_eq!(config.decoder.allowed_suffixes, vec![".be".to_string()]);
        assert_eq!(config.crawler.max_depth, 2);
        assert_eq!(config.crawler.page_timeout_secs, 5);
        assert_eq!(config.crawler.user_agent, "test-agent");
        assert_eq!(config.pipeline.slice_workers, 2);
        assert_eq!(config.pipeline.decode_workers, 4);
        assert_eq!(config.pipeline.scrape_workers, 8);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.database.enabled);
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].nickname.as_deref(), Some("Example 2024"));
        assert!(config.servers[1].nickname.is_none());
    }

    #[test]
    fn test_config_minimal_toml() {
        let config = Config::from_toml("[logging]\nlevel = \"info\"\n").unwrap();

        assert_eq!(config.download.slice_size, 1_000_000);
        assert_eq!(config.download.page_size, 1000);
        assert_eq!(config.download.request_timeout_secs, 30);
        assert_eq!(config.decoder.allowed_suffixes.len(), 3);
        assert_eq!(config.crawler.max_depth, 5);
        assert_eq!(config.pipeline.status_interval_secs, 60);
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_config_requires_logging() {
        assert!(Config::from_toml("[download]\nslice_size = 10\n").is_err());
    }

    #[test]
    fn test_config_rejects_zero_page_size() {
        let err = Config::from_toml("[download]\npage_size = 0\n[logging]\nlevel = \"info\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_database_section() {
        let toml_content = r#"
[database]
enabled = true
url = "postgresql://user:pass@db/ctvat"

[logging]
level = "info"
        "#;

        let config = Config::from_toml(toml_content).unwrap();
        assert!(config.database.enabled);
        assert_eq!(config.database.url, "postgresql://user:pass@db/ctvat");
        assert_eq!(config.database.max_connections, 20);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::from_file(Path::new("/nonexistent/ct-vat.toml")).is_err());
    }
}
