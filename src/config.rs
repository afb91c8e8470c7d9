use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub ship: ShipConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub ci: CiConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Deserialize, Clone, Default)]
pub struct GitHubConfig {
    /// Personal access token; falls back to `GITHUB_TOKEN` / `GH_TOKEN`.
    pub token: Option<String>,
    /// Base URI for GitHub Enterprise installations.
    pub api_url: Option<String>,
    /// `owner/name`; parsed from the `origin` remote when absent.
    pub repository: Option<String>,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("api_url", &self.api_url)
            .field("repository", &self.repository)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Squash,
    Merge,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Squash => "squash",
            MergeMethod::Merge => "merge",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl std::str::FromStr for MergeMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "squash" => Ok(MergeMethod::Squash),
            "merge" => Ok(MergeMethod::Merge),
            "rebase" => Ok(MergeMethod::Rebase),
            other => Err(AppError::Config(format!(
                "Unknown merge method '{other}' (expected squash, merge or rebase)"
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShipConfig {
    #[serde(default)]
    pub skip_verify: bool,
    #[serde(default)]
    pub skip_security: bool,
    #[serde(default)]
    pub skip_ci: bool,
    #[serde(default = "default_true")]
    pub merge: bool,
    #[serde(default)]
    pub merge_method: MergeMethod,
    #[serde(default = "default_true")]
    pub delete_branch: bool,
    #[serde(default)]
    pub draft: bool,
    pub base: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
}

impl Default for ShipConfig {
    fn default() -> Self {
        Self {
            skip_verify: false,
            skip_security: false,
            skip_ci: false,
            merge: true,
            merge_method: MergeMethod::default(),
            delete_branch: true,
            draft: false,
            base: None,
            title: None,
            body: None,
        }
    }
}

/// Shell commands for the local phases. A missing command skips the phase.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScriptsConfig {
    pub verify: Option<String>,
    pub security: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CiConfig {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_secs: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    #[serde(default = "default_ci_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default = "default_max_fetch_retries")]
    pub max_fetch_retries: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: default_initial_interval(),
            max_interval_secs: default_max_interval(),
            backoff_factor: default_backoff_factor(),
            grace_secs: default_grace(),
            timeout_secs: default_ci_timeout(),
            cache_ttl_ms: default_cache_ttl(),
            fail_fast: true,
            max_fetch_retries: default_max_fetch_retries(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl CiConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: bool,
}

fn default_true() -> bool {
    true
}

fn default_initial_interval() -> u64 {
    3
}

fn default_max_interval() -> u64 {
    30
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_grace() -> u64 {
    20
}

fn default_ci_timeout() -> u64 {
    30 * 60
}

fn default_cache_ttl() -> u64 {
    2000
}

fn default_max_fetch_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("shipflow").required(false));
        }

        // Environment variable overrides with SHIPFLOW_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("SHIPFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ci = &self.ci;
        if ci.initial_interval_secs == 0 {
            return Err(AppError::Config(
                "ci.initial_interval_secs must be at least 1".to_string(),
            ));
        }
        if ci.max_interval_secs < ci.initial_interval_secs {
            return Err(AppError::Config(
                "ci.max_interval_secs must not be below ci.initial_interval_secs".to_string(),
            ));
        }
        if !(1.0..=10.0).contains(&ci.backoff_factor) {
            return Err(AppError::Config(format!(
                "ci.backoff_factor must be between 1.0 and 10.0, got {}",
                ci.backoff_factor
            )));
        }
        if ci.cache_ttl_ms >= ci.initial_interval_secs * 1000 {
            return Err(AppError::Config(
                "ci.cache_ttl_ms must be shorter than the initial poll interval".to_string(),
            ));
        }
        Ok(())
    }

    /// Token from config, then `GITHUB_TOKEN`, then `GH_TOKEN`.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()))
            .or_else(|| std::env::var("GH_TOKEN").ok().filter(|t| !t.is_empty()))
    }
}
