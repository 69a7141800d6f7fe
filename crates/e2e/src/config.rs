//! Harness configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::Viewport;
use crate::environment::DEFAULT_BREAKPOINT;
use crate::error::{E2eError, E2eResult};

/// Browser engine the Playwright bridge launches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Per-kind wait bounds, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// `assert_visible` / `assert_hidden`
    pub assert_ms: u64,
    /// Waiting for a click/fill/press target to become actionable
    pub action_ms: u64,
    /// Waiting for the post-upload state
    pub upload_ms: u64,
    pub navigation_ms: u64,
    pub poll_interval_ms: u64,
    /// Whole-scenario wall clock; none means unbounded
    pub scenario_budget_ms: Option<u64>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            assert_ms: 5000,
            action_ms: 5000,
            upload_ms: 10000,
            navigation_ms: 30000,
            poll_interval_ms: 100,
            scenario_budget_ms: None,
        }
    }
}

impl Timeouts {
    pub fn assert(&self) -> Duration {
        Duration::from_millis(self.assert_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_millis(self.upload_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Origin of the application under test
    pub base_url: String,
    /// Path prefix for relative navigations, e.g. `ja`
    pub locale: Option<String>,
    pub browser: Browser,
    pub headless: bool,
    pub viewport: Viewport,
    /// Minimum desktop width in CSS pixels
    pub breakpoint: u32,
    pub timeouts: Timeouts,
    pub evidence_dir: PathBuf,
    pub fixture_dir: PathBuf,
    pub results_path: PathBuf,
    /// Scenarios run at once, each with its own session
    pub concurrency: usize,
    /// How long the runner waits for `base_url` to answer
    pub ready_timeout_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            locale: Some("ja".to_string()),
            browser: Browser::Chromium,
            headless: true,
            viewport: Viewport::default(),
            breakpoint: DEFAULT_BREAKPOINT,
            timeouts: Timeouts::default(),
            evidence_dir: PathBuf::from("test-results/evidence"),
            fixture_dir: PathBuf::from("test-results/fixtures"),
            results_path: PathBuf::from("test-results/test-results.json"),
            concurrency: 1,
            ready_timeout_ms: 60000,
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> E2eResult<()> {
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| E2eError::Config(format!("base_url '{}': {}", self.base_url, e)))?;
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(E2eError::Config(format!("viewport {} has a zero side", self.viewport)));
        }
        if self.breakpoint == 0 {
            return Err(E2eError::Config("breakpoint must be positive".to_string()));
        }
        if self.concurrency == 0 {
            return Err(E2eError::Config("concurrency must be at least 1".to_string()));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(E2eError::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.viewport, Viewport::new(1280, 720));
        assert_eq!(config.breakpoint, 1024);
        assert_eq!(config.timeouts.assert(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = HarnessConfig::from_yaml(
            r#"
base_url: http://localhost:3006
browser: firefox
timeouts:
  assert_ms: 30000
"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:3006");
        assert_eq!(config.browser, Browser::Firefox);
        assert_eq!(config.timeouts.assert_ms, 30000);
        assert_eq!(config.timeouts.upload_ms, 10000);
        assert_eq!(config.locale.as_deref(), Some("ja"));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = HarnessConfig::from_yaml("concurrency: 0").unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
    }
}
