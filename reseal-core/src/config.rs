//! Configuration management for reseal
//!
//! This module provides:
//! - The TOML configuration file (`[job]`, `[retry]`, `[logging]`)
//! - Validation and defaults
//! - The runtime `JobConfig` handed to the orchestrator

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::RotationError;
use crate::logging::LoggingConfig;
use crate::orchestrator::RetryPolicy;
use crate::record::{LabelSelector, RecordId, Scope};

/// Reseal configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResealConfig {
    /// Job settings
    pub job: JobSettings,
    /// Retry settings
    pub retry: RetrySettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// `"all"` or a single namespace
    pub scope: String,
    /// Optional `k=v,k2=v2` label selector
    pub label_selector: Option<String>,
    /// Validate only, never write
    pub dry_run: bool,
    /// Concurrent workers
    pub concurrency: usize,
    /// Records per store page
    pub page_size: usize,
    /// Per-record timeout in seconds
    pub record_timeout_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            scope: "all".to_string(),
            label_selector: None,
            dry_run: false,
            concurrency: 10,
            page_size: 100,
            record_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Randomize delays
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

impl ResealConfig {
    /// Load configuration; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ResealConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.job
            .scope
            .parse::<Scope>()
            .map_err(|e| anyhow::anyhow!("Invalid scope: {}", e))?;

        if let Some(selector) = &self.job.label_selector {
            selector
                .parse::<LabelSelector>()
                .map_err(|e| anyhow::anyhow!("Invalid label selector: {}", e))?;
        }

        if self.job.concurrency == 0 {
            return Err(anyhow::anyhow!("Concurrency cannot be 0"));
        }

        if self.job.page_size == 0 {
            return Err(anyhow::anyhow!("Page size cannot be 0"));
        }

        if self.job.record_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Record timeout cannot be 0"));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow::anyhow!(
                "Retry base delay ({}ms) exceeds max delay ({}ms)",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            ));
        }

        Ok(())
    }

    /// Runtime job configuration from the file settings
    pub fn job_config(&self) -> Result<JobConfig> {
        self.validate()?;

        let scope = self
            .job
            .scope
            .parse::<Scope>()
            .map_err(|e| anyhow::anyhow!("Invalid scope: {}", e))?;
        let label_selector = match &self.job.label_selector {
            Some(selector) => Some(
                selector
                    .parse::<LabelSelector>()
                    .map_err(|e| anyhow::anyhow!("Invalid label selector: {}", e))?,
            ),
            None => None,
        };

        Ok(JobConfig {
            scope,
            label_selector,
            dry_run: self.job.dry_run,
            concurrency: self.job.concurrency,
            page_size: self.job.page_size,
            record_timeout: Duration::from_secs(self.job.record_timeout_secs),
            retry: self.retry.to_policy(),
            resume_cursor: None,
            job_id: None,
        })
    }
}

/// Parameters of one orchestration run
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub scope: Scope,
    pub label_selector: Option<LabelSelector>,
    pub dry_run: bool,
    pub concurrency: usize,
    pub page_size: usize,
    pub record_timeout: Duration,
    pub retry: RetryPolicy,
    /// Records at or before this identity are skipped
    pub resume_cursor: Option<RecordId>,
    /// Fixed job id; a fresh one is generated per run when unset
    pub job_id: Option<Uuid>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            scope: Scope::All,
            label_selector: None,
            dry_run: false,
            concurrency: 10,
            page_size: 100,
            record_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            resume_cursor: None,
            job_id: None,
        }
    }
}

impl JobConfig {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_label_selector(mut self, selector: LabelSelector) -> Self {
        self.label_selector = Some(selector);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_record_timeout(mut self, timeout: Duration) -> Self {
        self.record_timeout = timeout;
        self
    }

    pub fn with_resume_cursor(mut self, cursor: Option<RecordId>) -> Self {
        self.resume_cursor = cursor;
        self
    }

    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn validate(&self) -> Result<(), RotationError> {
        if self.concurrency == 0 {
            return Err(RotationError::Config("concurrency must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(RotationError::Config("page size must be at least 1".into()));
        }
        if self.record_timeout.is_zero() {
            return Err(RotationError::Config("record timeout must be positive".into()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(RotationError::Config(
                "retry base delay exceeds max delay".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ResealConfig::default();
        assert_eq!(config.job.concurrency, 10);
        assert_eq!(config.job.page_size, 100);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.validate().is_ok());

        let job = config.job_config().unwrap();
        assert_eq!(job, JobConfig::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ResealConfig::load(&dir.path().join("reseal.toml")).unwrap();
        assert_eq!(config, ResealConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("reseal.toml");

        let mut config = ResealConfig::default();
        config.job.scope = "payments".to_string();
        config.job.label_selector = Some("tier=backend".to_string());
        config.job.concurrency = 4;
        config.logging.json_format = true;
        config.save(&path).unwrap();

        let loaded = ResealConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let job = loaded.job_config().unwrap();
        assert_eq!(job.scope, Scope::Namespace("payments".to_string()));
        assert_eq!(job.concurrency, 4);
        assert!(job.label_selector.is_some());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reseal.toml");
        std::fs::write(&path, "[job]\ndry_run = true\n\n[retry]\nmax_retries = 5\n").unwrap();

        let config = ResealConfig::load(&path).unwrap();
        assert!(config.job.dry_run);
        assert_eq!(config.job.concurrency, 10);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ResealConfig::default();
        config.job.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = ResealConfig::default();
        config.retry.base_delay_ms = 20_000;
        assert!(config.validate().is_err());

        let mut config = ResealConfig::default();
        config.job.label_selector = Some("novalue".to_string());
        assert!(config.validate().is_err());

        let mut config = ResealConfig::default();
        config.job.scope = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_job_config_validation() {
        assert!(JobConfig::default().validate().is_ok());
        assert!(matches!(
            JobConfig::default().with_concurrency(0).validate(),
            Err(RotationError::Config(_))
        ));
        assert!(JobConfig::default()
            .with_record_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
