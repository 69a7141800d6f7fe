//! Suite runner: discovers scenarios, runs them, aggregates and reports

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app;
use crate::error::{E2eError, E2eResult};
use crate::executor::{ScenarioExecutor, ScenarioOutcome};
use crate::spec::Scenario;

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioOutcome>,
}

impl SuiteResult {
    /// Logical AND of all outcomes
    pub fn success(&self) -> bool {
        self.results.iter().all(ScenarioOutcome::is_completed)
    }
}

/// Main scenario runner
pub struct TestRunner {
    executor: ScenarioExecutor,

    /// Scenario specs directory
    scenarios_dir: PathBuf,

    /// Parent of every run's cancellation token
    cancel: CancellationToken,
}

impl TestRunner {
    pub fn new(executor: ScenarioExecutor, scenarios_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            scenarios_dir: scenarios_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts every in-flight scenario when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the application under test to answer on its base URL
    pub async fn wait_for_app(&self) -> E2eResult<()> {
        let config = self.executor.config();
        app::wait_until_ready(
            &config.base_url,
            config.ready_timeout(),
            config.timeouts.poll_interval(),
        )
        .await
    }

    /// Run all scenarios in the scenarios directory
    pub async fn run_all(&self) -> E2eResult<SuiteResult> {
        let scenarios = Scenario::load_all(&self.scenarios_dir)?;
        Ok(self.run_scenarios(&scenarios).await)
    }

    /// Run scenarios matching a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<SuiteResult> {
        let scenarios = Scenario::load_all(&self.scenarios_dir)?;
        let filtered: Vec<Scenario> = Scenario::filter_by_tag(&scenarios, tag)
            .into_iter()
            .cloned()
            .collect();
        Ok(self.run_scenarios(&filtered).await)
    }

    /// Run a specific scenario by name
    pub async fn run_named(&self, name: &str) -> E2eResult<SuiteResult> {
        let scenario = Scenario::load_all(&self.scenarios_dir)?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Scenario not found: {}", name)))?;
        Ok(self.run_scenarios(std::slice::from_ref(&scenario)).await)
    }

    /// Run a list of scenarios. A failing scenario never stops its siblings.
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        let concurrency = self.executor.config().concurrency.max(1);
        info!("Running {} scenario(s), {} at a time...", scenarios.len(), concurrency);

        let results: Vec<ScenarioOutcome> = if concurrency == 1 {
            let mut results = Vec::with_capacity(scenarios.len());
            for scenario in scenarios {
                let cancel = self.cancel.child_token();
                results.push(self.executor.run_with_cancel(scenario, cancel).await);
            }
            results
        } else {
            let mut indexed: Vec<(usize, ScenarioOutcome)> =
                stream::iter(scenarios.iter().enumerate())
                    .map(|(i, scenario)| {
                        let cancel = self.cancel.child_token();
                        async move { (i, self.executor.run_with_cancel(scenario, cancel).await) }
                    })
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;
            indexed.sort_by_key(|(i, _)| *i);
            indexed.into_iter().map(|(_, outcome)| outcome).collect()
        };

        let passed = results.iter().filter(|r| r.is_completed()).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        for result in results.iter().filter(|r| !r.is_completed()) {
            error!("✗ {} - {}", result.name, result.failure_reason().unwrap_or("unknown error"));
        }
        info!("Scenario Results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        SuiteResult {
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Write suite results to a JSON file
    pub fn write_results(&self, results: &SuiteResult, path: &Path) -> E2eResult<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::sim::{SimDocument, SimDriver, SimElement};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn runner(root: &TempDir, concurrency: usize) -> (TestRunner, SimDriver) {
        let document = SimDocument::new().route("/", vec![SimElement::heading("Lumina")]);
        let driver = SimDriver::new(document);
        let config = HarnessConfig {
            locale: None,
            concurrency,
            evidence_dir: root.path().join("evidence"),
            fixture_dir: root.path().join("fixtures"),
            ..HarnessConfig::default()
        };
        let executor = ScenarioExecutor::new(Arc::new(driver.clone()), config);
        (TestRunner::new(executor, root.path().join("scenarios")), driver)
    }

    fn scenario(name: &str, heading: &str) -> Scenario {
        Scenario::from_yaml(&format!(
            r#"
name: {name}
steps:
  - action: navigate
    url: /
  - action: assert_visible
    target: {{ role: heading, name: {heading} }}
    timeout_ms: 200
"#
        ))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_siblings() {
        let root = TempDir::new().unwrap();
        let (runner, driver) = runner(&root, 1);
        let scenarios = vec![
            scenario("a", "Lumina"),
            scenario("b", "Missing"),
            scenario("c", "Lumina"),
        ];

        let result = runner.run_scenarios(&scenarios).await;
        assert_eq!((result.total, result.passed, result.failed), (3, 2, 1));
        assert!(!result.success());
        assert_eq!(driver.stats().opened, 3);
        assert_eq!(driver.stats().closed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_keep_input_order() {
        let root = TempDir::new().unwrap();
        let (runner, driver) = runner(&root, 3);
        let scenarios: Vec<_> = (0..5).map(|i| scenario(&format!("s{i}"), "Lumina")).collect();

        let result = runner.run_scenarios(&scenarios).await;
        assert!(result.success());
        let names: Vec<_> = result.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["s0", "s1", "s2", "s3", "s4"]);
        assert_eq!(driver.stats().closed, 5);
    }

    #[tokio::test]
    async fn test_run_tagged_and_write_results() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("scenarios");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("smoke.yaml"),
            "name: smoke\ntags: [smoke]\nsteps:\n  - action: navigate\n    url: /\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("other.yml"),
            "name: other\nsteps:\n  - action: navigate\n    url: /\n",
        )
        .unwrap();

        let (runner, _driver) = runner(&root, 1);
        let result = runner.run_tagged("smoke").await.unwrap();
        assert_eq!(result.total, 1);
        assert!(result.success());

        let path = runner
            .write_results(&result, &root.path().join("out/test-results.json"))
            .unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(json["results"][0]["status"]["status"], "completed");
    }

    #[tokio::test]
    async fn test_run_named_unknown() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("scenarios")).unwrap();
        let (runner, _driver) = runner(&root, 1);
        assert!(matches!(runner.run_named("nope").await, Err(E2eError::SpecParse(_))));
    }
}
