use crate::jobs::JobKind;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://dict.variants.moe.edu.tw/";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub retries: u32,
    pub timeout_seconds: u64,
    pub backoff_ms: u64,
    pub politeness_min_ms: u64,
    pub politeness_max_ms: u64,
    /// The target site serves an untrusted certificate. Off unless the
    /// config turns it on; `config.example.json` does.
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_seconds: 20,
            backoff_ms: 2000,
            politeness_min_ms: 100,
            politeness_max_ms: 500,
            accept_invalid_certs: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub workers: usize,
    pub batch_size: usize,
    /// Re-fetches allowed when a page comes back without the expected structure.
    pub shape_retries: u32,
    pub shape_retry_delay_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            batch_size: 50,
            shape_retries: 1,
            shape_retry_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub base_url: String,
    pub image_dir: Option<PathBuf>,
    pub jobs: Vec<JobKind>,
    pub index_pages: u32,
    pub index_appendix_id: String,
    pub fetch: FetchConfig,
    pub crawl: CrawlConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("dictionary.db"),
            base_url: DEFAULT_BASE_URL.to_string(),
            image_dir: None,
            jobs: vec![JobKind::Standard],
            index_pages: 300,
            index_appendix_id: "1".to_string(),
            fetch: FetchConfig::default(),
            crawl: CrawlConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url {}: {}", self.base_url, e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.crawl.workers == 0 {
            return Err(ConfigError::Invalid("crawl.workers must be at least 1".into()));
        }
        if self.crawl.batch_size == 0 {
            return Err(ConfigError::Invalid("crawl.batch_size must be at least 1".into()));
        }
        if self.fetch.retries == 0 {
            return Err(ConfigError::Invalid("fetch.retries must be at least 1".into()));
        }
        if self.fetch.politeness_min_ms > self.fetch.politeness_max_ms {
            return Err(ConfigError::Invalid(
                "fetch.politeness_min_ms exceeds fetch.politeness_max_ms".into(),
            ));
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.crawl.workers, 5);
        assert_eq!(config.crawl.batch_size, 50);
        assert_eq!(config.fetch.retries, 3);
        assert!(!config.fetch.accept_invalid_certs);
        assert_eq!(config.jobs, vec![JobKind::Standard]);
        assert_eq!(config.database_path, PathBuf::from("dictionary.db"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"{"jobs": ["index", "variant-list", "appendix"],
                "fetch": {"accept_invalid_certs": true},
                "crawl": {"workers": 8}}"#,
        )
        .unwrap();
        assert_eq!(
            config.jobs,
            vec![JobKind::Index, JobKind::VariantList, JobKind::Appendix]
        );
        assert!(config.fetch.accept_invalid_certs);
        assert_eq!(config.fetch.timeout_seconds, 20);
        assert_eq!(config.crawl.workers, 8);
        assert_eq!(config.crawl.batch_size, 50);
    }

    #[test]
    fn sample_config_opts_into_invalid_certs() {
        let config = parse_config(include_str!("../config.example.json")).unwrap();
        assert!(config.fetch.accept_invalid_certs);
        assert_eq!(config.image_dir, Some(PathBuf::from("images")));
        assert_eq!(config.jobs.len(), 6);
        assert_eq!(config.crawl.shape_retries, 1);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = parse_config(r#"{"crawl": {"workers": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_politeness_window() {
        let err = parse_config(
            r#"{"fetch": {"politeness_min_ms": 900, "politeness_max_ms": 100}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_job() {
        assert!(matches!(
            parse_config(r#"{"jobs": ["everything"]}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/config.json"));
    }
}
