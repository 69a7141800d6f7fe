//! Scenario execution
//!
//! ```text
//! Idle -> SessionAcquired -> Running -> Completed -> TornDown
//!                                    \-> Failed ---/
//! ```
//!
//! One session per run. The steps run strictly in order; waiting happens
//! only inside condition polls. The first failing step ends the run: the
//! executor captures failure evidence from the still-live session, restores
//! the environment, closes the session once and removes the run's fixtures.
//! Budget expiry and external cancellation take the same path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::driver::{Driver, Locator, Viewport};
use crate::environment::{EnvironmentController, EnvironmentState};
use crate::error::{E2eError, E2eResult};
use crate::evidence::{Evidence, EvidenceKind, EvidenceRecorder};
use crate::fixtures::FixtureSynthesizer;
use crate::locator::{ElementRef, Regions, Resolution, Resolver};
use crate::poller::{wait_for, Observation, PollOutcome, PollPolicy, Probe};
use crate::session::Session;
use crate::spec::{Scenario, Step, Target, UploadSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    SessionAcquired,
    Running,
    Completed,
    Failed,
    TornDown,
}

/// Final verdict of one scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioStatus {
    Completed,
    Failed {
        /// [`E2eError::kind`] of the failure
        kind: String,
        reason: String,
        /// None when the run never reached its first step
        step_index: Option<usize>,
        evidence_path: Option<PathBuf>,
    },
}

/// Result of executing one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub step_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub evidence_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub run_id: String,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    pub evidence: Vec<Evidence>,
    /// Phases in the order they were entered
    pub phases: Vec<RunPhase>,
    /// URLs loaded during the run
    pub history: Vec<String>,
}

impl ScenarioOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, ScenarioStatus::Completed)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            ScenarioStatus::Completed => None,
            ScenarioStatus::Failed { reason, .. } => Some(reason),
        }
    }
}

/// What an element wait is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Visible,
    Hidden,
    /// First picked match visible, ready for input
    Actionable,
    /// Picked match present in the document, visible or not
    Attached,
}

impl Expect {
    fn as_str(&self) -> &'static str {
        match self {
            Expect::Visible => "visible",
            Expect::Hidden => "hidden",
            Expect::Actionable => "actionable",
            Expect::Attached => "attached",
        }
    }
}

/// Picked matches of a successful element wait
struct Found {
    resolution: Resolution,
    indices: Vec<usize>,
}

impl Found {
    fn target(&self) -> (&Locator, usize) {
        (&self.resolution.locator, self.indices.first().copied().unwrap_or(0))
    }
}

enum Interrupt {
    Budget,
    Cancelled,
}

/// Resolves at `deadline`, or never without one
async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs scenarios against sessions opened from one driver
#[derive(Clone)]
pub struct ScenarioExecutor {
    driver: Arc<dyn Driver>,
    config: Arc<HarnessConfig>,
}

impl ScenarioExecutor {
    pub fn new(driver: Arc<dyn Driver>, config: HarnessConfig) -> Self {
        Self {
            driver,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub async fn run(&self, scenario: &Scenario) -> ScenarioOutcome {
        self.run_with_cancel(scenario, CancellationToken::new()).await
    }

    /// Run `scenario` to a terminal state. Never returns before the session
    /// is torn down, whatever ends the run.
    pub async fn run_with_cancel(
        &self,
        scenario: &Scenario,
        cancel: CancellationToken,
    ) -> ScenarioOutcome {
        let start = Instant::now();
        let run_id = Uuid::new_v4().simple().to_string();
        let mut phases = vec![RunPhase::Idle];
        info!(
            scenario = %scenario.name,
            run = %run_id,
            driver = self.driver.name(),
            "starting scenario"
        );

        // The budget covers the whole run, session acquisition included.
        let budget = scenario
            .budget_ms
            .or(self.config.timeouts.scenario_budget_ms)
            .map(Duration::from_millis);
        let budget_ms = budget.map_or(0, |b| b.as_millis() as u64);
        let deadline = budget.map(|b| start + b);

        let viewport = scenario.viewport.unwrap_or(self.config.viewport);
        let initial = EnvironmentState::new(self.config.base_url.clone(), viewport)
            .with_locale(scenario.locale.clone().or_else(|| self.config.locale.clone()))
            .with_breakpoint(self.config.breakpoint);

        let acquire = async {
            let recorder =
                EvidenceRecorder::new(&self.config.evidence_dir, &scenario.name, &run_id)?;
            let page = self.driver.open_page(viewport).await?;
            Ok::<_, E2eError>((recorder, page))
        };
        // A page that has been opened is always handed over for teardown.
        let acquired = tokio::select! {
            biased;
            acquired = acquire => acquired,
            _ = cancel.cancelled() => Err(E2eError::Aborted { step_index: None }),
            _ = expire(deadline) => Err(E2eError::ExecutionTimeout { budget_ms, step_index: None }),
        };
        let (mut recorder, page) = match acquired {
            Ok(acquired) => acquired,
            Err(e) => {
                error!(scenario = %scenario.name, "failed to acquire session: {}", e);
                phases.extend([RunPhase::Failed, RunPhase::TornDown]);
                return ScenarioOutcome {
                    name: scenario.name.clone(),
                    run_id,
                    status: ScenarioStatus::Failed {
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                        step_index: None,
                        evidence_path: None,
                    },
                    duration_ms: start.elapsed().as_millis() as u64,
                    steps: Vec::new(),
                    evidence: Vec::new(),
                    phases,
                    history: Vec::new(),
                };
            }
        };

        let mut session = Session::new(page, initial.clone());
        phases.push(RunPhase::SessionAcquired);
        let controller = EnvironmentController::new(self.config.timeouts.navigation());
        let fixtures = FixtureSynthesizer::new(&self.config.fixture_dir, &run_id);

        phases.push(RunPhase::Running);
        let mut records = Vec::new();
        let mut current = 0usize;

        let finished = {
            let work = self.run_steps(
                scenario,
                &controller,
                &fixtures,
                &mut session,
                &mut recorder,
                &mut records,
                &mut current,
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Interrupt::Cancelled),
                _ = expire(deadline) => Err(Interrupt::Budget),
                result = work => Ok(result),
            }
        };

        let failure = match finished {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(interrupt) => {
                let e = match interrupt {
                    Interrupt::Budget => E2eError::ExecutionTimeout {
                        budget_ms,
                        step_index: Some(current),
                    },
                    Interrupt::Cancelled => E2eError::Aborted { step_index: Some(current) },
                };
                let recorded = records.last().map_or(false, |r: &StepRecord| r.index == current);
                if let (false, Some(step)) = (recorded, scenario.steps.get(current)) {
                    records.push(StepRecord {
                        index: current,
                        step_name: step.name(),
                        success: false,
                        duration_ms: 0,
                        error: Some(e.to_string()),
                        evidence_path: None,
                    });
                }
                Some(e)
            }
        };

        let status = match failure {
            None => {
                phases.push(RunPhase::Completed);
                ScenarioStatus::Completed
            }
            Some(e) => {
                phases.push(RunPhase::Failed);
                error!(
                    scenario = %scenario.name,
                    step = current,
                    kind = e.kind(),
                    "step failed: {}", e
                );
                let label = format!("failure-step-{}", current);
                let evidence_path = match recorder
                    .capture(&session, &label, EvidenceKind::Failure, Some(current))
                    .await
                {
                    Ok(evidence) => Some(evidence.path),
                    Err(capture_err) => {
                        warn!(
                            scenario = %scenario.name,
                            "failure evidence not captured: {}", capture_err
                        );
                        None
                    }
                };
                ScenarioStatus::Failed {
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                    step_index: Some(current),
                    evidence_path,
                }
            }
        };

        self.teardown(&controller, &mut session, &initial).await;
        fixtures.cleanup();
        phases.push(RunPhase::TornDown);

        let duration_ms = start.elapsed().as_millis() as u64;
        match &status {
            ScenarioStatus::Completed => info!("✓ {} ({} ms)", scenario.name, duration_ms),
            ScenarioStatus::Failed { reason, .. } => error!("✗ {} - {}", scenario.name, reason),
        }

        ScenarioOutcome {
            name: scenario.name.clone(),
            run_id,
            status,
            duration_ms,
            steps: records,
            evidence: recorder.records().to_vec(),
            phases,
            history: session.history().to_vec(),
        }
    }

    /// Restore the environment, then close. Each part is bounded so a wedged
    /// engine cannot hold the run open.
    async fn teardown(
        &self,
        controller: &EnvironmentController,
        session: &mut Session,
        initial: &EnvironmentState,
    ) {
        let bound = self.config.timeouts.navigation();
        if timeout(bound, controller.revert(session, initial)).await.is_err() {
            warn!(session = %session.id(), "environment revert timed out");
        }
        match timeout(bound, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = %session.id(), "session close failed: {}", e),
            Err(_) => warn!(session = %session.id(), "session close timed out"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_steps(
        &self,
        scenario: &Scenario,
        controller: &EnvironmentController,
        fixtures: &FixtureSynthesizer,
        session: &mut Session,
        recorder: &mut EvidenceRecorder,
        records: &mut Vec<StepRecord>,
        current: &mut usize,
    ) -> E2eResult<()> {
        for (index, step) in scenario.steps.iter().enumerate() {
            *current = index;
            let started = Instant::now();
            debug!(scenario = %scenario.name, step = index, "Executing step: {}", step.name());

            let result = self
                .execute_step(scenario, controller, fixtures, session, recorder, index, step)
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(evidence_path) => records.push(StepRecord {
                    index,
                    step_name: step.name(),
                    success: true,
                    duration_ms,
                    error: None,
                    evidence_path,
                }),
                Err(e) => {
                    records.push(StepRecord {
                        index,
                        step_name: step.name(),
                        success: false,
                        duration_ms,
                        error: Some(e.to_string()),
                        evidence_path: None,
                    });
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        scenario: &Scenario,
        controller: &EnvironmentController,
        fixtures: &FixtureSynthesizer,
        session: &mut Session,
        recorder: &mut EvidenceRecorder,
        index: usize,
        step: &Step,
    ) -> E2eResult<Option<PathBuf>> {
        let timeouts = &self.config.timeouts;
        let bound = |ms: &Option<u64>, default: Duration| {
            ms.map(Duration::from_millis).unwrap_or(default)
        };
        let regions = &scenario.regions;

        match step {
            Step::Navigate { url } => {
                controller.navigate(session, url).await?;
            }
            Step::SetViewport { width, height } => {
                controller
                    .apply_viewport(session, Viewport::new(*width, *height))
                    .await?;
            }
            Step::SetNetwork { online } => {
                controller.apply_network(session, *online).await?;
            }
            Step::Locate { name, descriptor } => {
                let resolution = Resolver::new(regions, session.env())
                    .resolve(session.page(), descriptor)
                    .await?;
                debug!(name = %name, matches = resolution.count, "bound element reference");
                session.observe(descriptor, resolution.count);
                session.bind(name, descriptor.clone());
            }
            Step::AssertVisible { target, timeout_ms } => {
                let element = element(session, target)?;
                let bound = bound(timeout_ms, timeouts.assert());
                self.assert_state(regions, session, &element, Expect::Visible, bound)
                    .await?;
            }
            Step::AssertHidden { target, timeout_ms } => {
                let element = element(session, target)?;
                let bound = bound(timeout_ms, timeouts.assert());
                self.assert_state(regions, session, &element, Expect::Hidden, bound)
                    .await?;
            }
            Step::Click { target, timeout_ms } => {
                let element = element(session, target)?;
                let bound = bound(timeout_ms, timeouts.action());
                let found = self.actionable(regions, session, &element, bound).await?;
                let (locator, i) = found.target();
                session.page_mut().click(locator, i).await?;
            }
            Step::Fill {
                target,
                text,
                timeout_ms,
            } => {
                let element = element(session, target)?;
                let bound = bound(timeout_ms, timeouts.action());
                let found = self.actionable(regions, session, &element, bound).await?;
                let (locator, i) = found.target();
                session.page_mut().fill(locator, i, text).await?;
            }
            Step::UploadFile {
                target,
                file,
                expect,
                timeout_ms,
            } => {
                let intake = element(session, target)?;
                let expect = match expect {
                    Some(t) => Some(element(session, t)?),
                    None => None,
                };
                self.upload(
                    regions,
                    session,
                    fixtures,
                    &intake,
                    file,
                    expect.as_ref(),
                    bound(timeout_ms, timeouts.upload()),
                )
                .await?;
            }
            Step::Press {
                key,
                target,
                timeout_ms,
            } => match target {
                Some(target) => {
                    let element = element(session, target)?;
                    let bound = bound(timeout_ms, timeouts.action());
                    let found = self.actionable(regions, session, &element, bound).await?;
                    let (locator, i) = found.target();
                    session.page_mut().press(Some((locator, i)), key).await?;
                }
                None => session.page_mut().press(None, key).await?,
            },
            Step::Capture { label } => {
                let evidence = recorder
                    .capture(session, label, EvidenceKind::Checkpoint, Some(index))
                    .await?;
                return Ok(Some(evidence.path));
            }
        }
        Ok(None)
    }

    fn policy(&self, bound: Duration) -> PollPolicy {
        PollPolicy::new(bound, self.config.timeouts.poll_interval())
    }

    /// One condition poll over resolve + pick + visibility for `element`.
    async fn wait_element(
        &self,
        regions: &Regions,
        session: &Session,
        element: &ElementRef,
        expect: Expect,
        bound: Duration,
    ) -> E2eResult<PollOutcome<Found>> {
        let resolver = Resolver::new(regions, session.env());
        let resolver = &resolver;
        let page = session.page();
        let descriptor = element.descriptor();
        let last_count = AtomicUsize::new(session.last_observed(descriptor).unwrap_or(0));
        let last_count = &last_count;

        wait_for(self.policy(bound), move || async move {
            let seen = || Observation::new(last_count.load(Ordering::Relaxed), "query failed");
            let resolution = match resolver.resolve(page, descriptor).await {
                Ok(resolution) => resolution,
                Err(e) => return Probe::from_error(e, &seen()),
            };
            last_count.store(resolution.count, Ordering::Relaxed);

            let indices = match Resolver::select(descriptor, &resolution) {
                Ok(indices) => indices,
                Err(E2eError::ElementNotFound { .. }) if expect == Expect::Hidden => {
                    return Probe::Ready(Found { resolution, indices: Vec::new() })
                }
                Err(E2eError::ElementNotFound { .. }) => {
                    return Probe::Pending(Observation::new(resolution.count, "never matched"))
                }
                Err(e) => return Probe::from_error(e, &seen()),
            };

            let checked = match expect {
                Expect::Attached => return Probe::Ready(Found { resolution, indices }),
                Expect::Actionable => &indices[..1],
                Expect::Visible | Expect::Hidden => &indices[..],
            };
            let mut visible = 0;
            for &i in checked {
                match page.is_visible(&resolution.locator, i).await {
                    Ok(true) => visible += 1,
                    Ok(false) => {}
                    Err(e) => return Probe::from_error(e, &seen()),
                }
            }

            let all_visible = visible == checked.len();
            match expect {
                Expect::Hidden if visible == 0 => Probe::Ready(Found { resolution, indices }),
                Expect::Hidden => {
                    Probe::Pending(Observation::new(resolution.count, "still visible"))
                }
                _ if all_visible => Probe::Ready(Found { resolution, indices }),
                _ => Probe::Pending(Observation::new(resolution.count, "found but not visible")),
            }
        })
        .await
    }

    async fn assert_state(
        &self,
        regions: &Regions,
        session: &mut Session,
        element: &ElementRef,
        expect: Expect,
        bound: Duration,
    ) -> E2eResult<()> {
        match self.wait_element(regions, session, element, expect, bound).await? {
            PollOutcome::Ok(found) => {
                debug!(element = %element, matches = found.resolution.count, "{}", expect.as_str());
                session.observe(element.descriptor(), found.resolution.count);
                Ok(())
            }
            PollOutcome::TimedOut(t) => {
                session.observe(element.descriptor(), t.last.count);
                Err(E2eError::VerificationTimeout {
                    descriptor: element.to_string(),
                    expected: expect.as_str(),
                    last_count: t.last.count,
                    elapsed_ms: t.elapsed_ms(),
                    detail: t.last.detail,
                })
            }
        }
    }

    async fn actionable(
        &self,
        regions: &Regions,
        session: &Session,
        element: &ElementRef,
        bound: Duration,
    ) -> E2eResult<Found> {
        match self.wait_element(regions, session, element, Expect::Actionable, bound).await? {
            PollOutcome::Ok(found) => Ok(found),
            PollOutcome::TimedOut(t) if t.last.count == 0 => Err(E2eError::ElementNotFound {
                descriptor: element.to_string(),
                elapsed_ms: t.elapsed_ms(),
            }),
            PollOutcome::TimedOut(t) => Err(E2eError::VerificationTimeout {
                descriptor: element.to_string(),
                expected: Expect::Actionable.as_str(),
                last_count: t.last.count,
                elapsed_ms: t.elapsed_ms(),
                detail: t.last.detail,
            }),
        }
    }

    /// Attach a file to the intake control, then wait for the post-upload
    /// state if one is named.
    #[allow(clippy::too_many_arguments)]
    async fn upload(
        &self,
        regions: &Regions,
        session: &mut Session,
        fixtures: &FixtureSynthesizer,
        element: &ElementRef,
        source: &UploadSource,
        expect: Option<&ElementRef>,
        bound: Duration,
    ) -> E2eResult<()> {
        let upload_failure = |reason: String| E2eError::UploadFailure {
            descriptor: element.to_string(),
            reason,
        };

        let action_bound = self.config.timeouts.action();
        let attached = self
            .wait_element(regions, session, element, Expect::Attached, action_bound)
            .await?;
        let found = match attached {
            PollOutcome::Ok(found) => found,
            PollOutcome::TimedOut(t) => {
                return Err(upload_failure(format!(
                    "no intake control matched within {} ms",
                    t.elapsed_ms()
                )))
            }
        };

        let path = match source {
            UploadSource::Fixture(kind) => fixtures.synthesize(*kind)?.path,
            UploadSource::Path(path) if path.is_file() => path.clone(),
            UploadSource::Path(path) => {
                return Err(upload_failure(format!("no such file: {}", path.display())))
            }
        };

        let (locator, i) = found.target();
        session
            .page_mut()
            .set_input_files(locator, i, &path)
            .await
            .map_err(|e| upload_failure(format!("file input rejected {}: {}", path.display(), e)))?;
        info!(file = %path.display(), element = %element, "file attached");

        if let Some(expected) = expect {
            self.assert_state(regions, session, expected, Expect::Visible, bound)
                .await
                .map_err(|e| match e {
                    E2eError::VerificationTimeout { .. } => {
                        upload_failure(format!("no post-upload state: {}", e))
                    }
                    other => other,
                })?;
        }
        Ok(())
    }
}

fn element(session: &Session, target: &Target) -> E2eResult<ElementRef> {
    match target {
        Target::Ref(name) => Ok(ElementRef::named(name, session.lookup(name)?.clone())),
        Target::Descriptor(descriptor) => Ok(ElementRef::inline(descriptor.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDocument, SimDriver, SimElement};
    use tempfile::TempDir;

    fn config(root: &TempDir) -> HarnessConfig {
        HarnessConfig {
            locale: None,
            evidence_dir: root.path().join("evidence"),
            fixture_dir: root.path().join("fixtures"),
            ..HarnessConfig::default()
        }
    }

    fn executor(document: SimDocument, root: &TempDir) -> (ScenarioExecutor, SimDriver) {
        let driver = SimDriver::new(document);
        (ScenarioExecutor::new(Arc::new(driver.clone()), config(root)), driver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_run_walks_every_phase() {
        let root = TempDir::new().unwrap();
        let document = SimDocument::new().route("/", vec![SimElement::heading("Lumina")]);
        let (executor, driver) = executor(document, &root);
        let scenario = Scenario::from_yaml(
            r#"
name: smoke
steps:
  - action: navigate
    url: /
  - action: assert_visible
    target: { role: heading, name: Lumina }
"#,
        )
        .unwrap();

        let outcome = executor.run(&scenario).await;
        assert!(outcome.is_completed(), "{:?}", outcome.status);
        assert_eq!(
            outcome.phases,
            vec![
                RunPhase::Idle,
                RunPhase::SessionAcquired,
                RunPhase::Running,
                RunPhase::Completed,
                RunPhase::TornDown
            ]
        );
        assert_eq!(outcome.history, vec!["http://localhost:3000/".to_string()]);
        assert_eq!(driver.stats().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_on_missing_element_is_not_found() {
        let root = TempDir::new().unwrap();
        let (executor, driver) = executor(SimDocument::new().route("/", vec![]), &root);
        let scenario = Scenario::from_yaml(
            r#"
name: missing
steps:
  - action: navigate
    url: /
  - action: click
    target: { role: button, name: Shelf }
    timeout_ms: 300
"#,
        )
        .unwrap();

        let outcome = executor.run(&scenario).await;
        match &outcome.status {
            ScenarioStatus::Failed { kind, step_index, evidence_path, .. } => {
                assert_eq!(kind, "element_not_found");
                assert_eq!(*step_index, Some(1));
                assert!(evidence_path.is_some());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(driver.stats().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_element_times_out_as_verification_failure() {
        let root = TempDir::new().unwrap();
        let document = SimDocument::new().route("/", vec![SimElement::text("Dock").desktop_only()]);
        let (executor, _driver) = executor(document, &root);
        let scenario = Scenario::from_yaml(
            r#"
name: not-visible
viewport: { width: 375, height: 812 }
steps:
  - action: navigate
    url: /
  - action: assert_visible
    target: { text: Dock }
    timeout_ms: 500
"#,
        )
        .unwrap();

        let outcome = executor.run(&scenario).await;
        let reason = outcome.failure_reason().unwrap();
        assert!(reason.contains("last observed 1 match(es), found but not visible"), "{}", reason);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_match_fails_without_waiting() {
        let root = TempDir::new().unwrap();
        let document = SimDocument::new().route(
            "/",
            vec![SimElement::button("Shelf"), SimElement::button("Shelf")],
        );
        let (executor, _driver) = executor(document, &root);
        let scenario = Scenario::from_yaml(
            r#"
name: ambiguous
steps:
  - action: navigate
    url: /
  - action: click
    target: { text: Shelf }
"#,
        )
        .unwrap();

        let started = Instant::now();
        let outcome = executor.run(&scenario).await;
        assert!(matches!(
            &outcome.status,
            ScenarioStatus::Failed { kind, .. } if kind == "ambiguous_match"
        ));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_unwritable_evidence_dir_fails_capture_step() {
        let root = TempDir::new().unwrap();
        // A file where the evidence directory should be
        std::fs::write(root.path().join("blocked"), b"").unwrap();
        let config = HarnessConfig {
            evidence_dir: root.path().join("blocked"),
            ..config(&root)
        };
        let driver = SimDriver::new(SimDocument::new());
        let executor = ScenarioExecutor::new(Arc::new(driver.clone()), config);
        let scenario =
            Scenario::from_yaml("name: x\nsteps:\n  - action: capture\n    label: a\n").unwrap();

        let outcome = executor.run(&scenario).await;
        assert!(matches!(
            &outcome.status,
            ScenarioStatus::Failed { kind, step_index: Some(0), evidence_path: None, .. }
                if kind == "io"
        ));
        assert_eq!(outcome.phases.last(), Some(&RunPhase::TornDown));
        assert_eq!(driver.stats().closed, 1);
    }
}
