//! Step executor.
//!
//! Runs one scenario's steps strictly in order on a single session and turns
//! every failure into a [`StepOutcome`]. Nothing here returns an error:
//! - action failures record `Failed`, capture a diagnostic and abort the scenario
//! - wait timeouts record `TimedOut` and execution continues
//! - failed expectations and comparisons record `Failed` and execution continues
//! - artifact store failures are harness faults and abort the scenario

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

use crate::artifact::{Artifact, ArtifactId, ArtifactStore, Provenance, StoreError};
use crate::browser::{AdapterError, BrowserSession, Viewport};
use crate::poller::{self, PollSettings};
use crate::scenario::{Comparison, Scenario, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    TimedOut,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::TimedOut => "timed_out",
            StepStatus::Failed => "failed",
        }
    }
}

/// Cause of a non-successful step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// URL unreachable or not settled in time
    Navigation,
    ElementNotFound,
    /// Action rejected by the page or the browser
    Action,
    ConditionTimeout,
    /// One-shot check or capture comparison did not hold
    Expectation,
    /// Failure inside the harness itself, never the application's fault
    Harness,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Navigation => "navigation",
            FailureKind::ElementNotFound => "element_not_found",
            FailureKind::Action => "action",
            FailureKind::ConditionTimeout => "condition_timeout",
            FailureKind::Expectation => "expectation",
            FailureKind::Harness => "harness",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: FailureKind,
    pub message: String,
}

impl StepError {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn harness(err: StoreError) -> Self {
        Self::new(FailureKind::Harness, err.to_string())
    }
}

impl From<AdapterError> for StepError {
    fn from(err: AdapterError) -> Self {
        let kind = match &err {
            AdapterError::Navigation { .. } => FailureKind::Navigation,
            AdapterError::ElementNotFound { .. } => FailureKind::ElementNotFound,
            _ => FailureKind::Action,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result of executing one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Position of the step in its scenario (0-based)
    pub index: usize,
    pub action: String,
    pub summary: String,
    pub status: StepStatus,
    pub elapsed_ms: u64,

    /// A timeout on this step fails the scenario
    #[serde(default)]
    pub mandatory: bool,

    /// Artifact written by a capture step
    #[serde(default)]
    pub artifact: Option<ArtifactId>,

    /// Screenshot taken after this step aborted the scenario
    #[serde(default)]
    pub diagnostic: Option<ArtifactId>,

    #[serde(default)]
    pub error: Option<StepError>,

    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Every step was attempted
    Completed,
    /// A step failure stopped the scenario early
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub status: ScenarioStatus,

    /// In step order; truncated after an aborting step
    pub outcomes: Vec<StepOutcome>,

    /// Captures and diagnostics in the order they were taken
    pub artifacts: Vec<Artifact>,

    /// Harness-side error that stopped the scenario
    #[serde(default)]
    pub fault: Option<String>,

    pub elapsed_ms: u64,
}

impl ScenarioResult {
    /// Result for a scenario whose session could not be opened
    pub fn launch_failure(name: &str, err: &AdapterError) -> Self {
        Self {
            name: name.to_string(),
            status: ScenarioStatus::Aborted,
            outcomes: Vec::new(),
            artifacts: Vec::new(),
            fault: Some(err.to_string()),
            elapsed_ms: 0,
        }
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn is_harness_fault(&self) -> bool {
        self.fault.is_some()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(|a| a.diagnostic)
    }
}

/// How a step ended, before timing and bookkeeping are attached
enum Execution {
    Done {
        detail: Option<String>,
        artifact: Option<ArtifactId>,
    },
    TimedOut(StepError),
    /// Failed, later steps still run
    Failed(StepError),
    /// Failed, the scenario stops here
    Fatal(StepError),
}

impl Execution {
    fn done() -> Self {
        Execution::Done {
            detail: None,
            artifact: None,
        }
    }

    fn detail(detail: impl Into<String>) -> Self {
        Execution::Done {
            detail: Some(detail.into()),
            artifact: None,
        }
    }
}

/// Mutable state of one scenario execution
#[derive(Default)]
struct ScenarioState {
    outcomes: Vec<StepOutcome>,
    artifacts: Vec<Artifact>,
    captures: HashMap<String, ArtifactId>,
}

/// Executes scenarios against browser sessions
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    store: Arc<ArtifactStore>,
    poll: PollSettings,
    base_url: String,
    /// `None` when `base_url` does not parse; relative navigations then fail
    base: Option<Url>,
    test_data_dir: PathBuf,
    wait_timeout: Duration,
    navigation_timeout: Duration,
    timeout_overrides: BTreeMap<String, u64>,
}

impl ScenarioRunner {
    pub fn new(store: Arc<ArtifactStore>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            store,
            poll: PollSettings::default(),
            base: crate::config::parse_base_url(&base_url).ok(),
            base_url,
            test_data_dir: PathBuf::from(crate::config::DEFAULT_TEST_DATA_DIR),
            wait_timeout: Duration::from_millis(crate::config::DEFAULT_WAIT_TIMEOUT_MS),
            navigation_timeout: Duration::from_millis(crate::config::DEFAULT_NAV_TIMEOUT_MS),
            timeout_overrides: BTreeMap::new(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_test_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.test_data_dir = dir.into();
        self
    }

    /// Timeouts for waits and navigations that do not set their own
    pub fn with_default_timeouts(mut self, wait: Duration, navigation: Duration) -> Self {
        self.wait_timeout = wait;
        self.navigation_timeout = navigation;
        self
    }

    /// Per-step timeouts keyed `"<scenario>/<step index>"`
    pub fn with_timeout_overrides(mut self, overrides: BTreeMap<String, u64>) -> Self {
        self.timeout_overrides = overrides;
        self
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Run every step of `scenario` in order; always returns a result
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        session: &mut dyn BrowserSession,
    ) -> ScenarioResult {
        let span = info_span!("scenario", name = %scenario.name);
        self.run_steps(scenario, session).instrument(span).await
    }

    async fn run_steps(&self, scenario: &Scenario, session: &mut dyn BrowserSession) -> ScenarioResult {
        let start = Instant::now();
        let mut state = ScenarioState::default();
        let mut status = ScenarioStatus::Completed;
        let mut fault = None;
        info!(steps = scenario.steps.len(), "scenario started");

        for (index, step) in scenario.steps.iter().enumerate() {
            let step_start = Instant::now();
            let execution = self.execute(scenario, index, step, session, &mut state).await;

            let mut outcome = StepOutcome {
                index,
                action: step.kind().to_string(),
                summary: step.summary(),
                status: StepStatus::Succeeded,
                elapsed_ms: step_start.elapsed().as_millis() as u64,
                mandatory: matches!(step, Step::Wait { mandatory: true, .. }),
                artifact: None,
                diagnostic: None,
                error: None,
                detail: None,
            };

            let abort = match execution {
                Execution::Done { detail, artifact } => {
                    outcome.detail = detail;
                    outcome.artifact = artifact;
                    false
                }
                Execution::TimedOut(err) => {
                    warn!(step = index, error = %err.message, "wait timed out, continuing");
                    outcome.status = StepStatus::TimedOut;
                    outcome.error = Some(err);
                    false
                }
                Execution::Failed(err) => {
                    warn!(step = index, error = %err.message, "check failed, continuing");
                    outcome.status = StepStatus::Failed;
                    outcome.error = Some(err);
                    false
                }
                Execution::Fatal(err) => {
                    warn!(step = index, kind = err.kind.as_str(), error = %err.message, "step failed, aborting scenario");
                    if err.kind == FailureKind::Harness {
                        fault = Some(err.message.clone());
                    }
                    outcome.status = StepStatus::Failed;
                    outcome.error = Some(err);
                    true
                }
            };
            debug!(step = index, status = outcome.status.as_str(), elapsed_ms = outcome.elapsed_ms, "{}", outcome.summary);

            if abort {
                self.capture_diagnostic(scenario, session, &mut outcome, &mut state).await;
                state.outcomes.push(outcome);
                status = ScenarioStatus::Aborted;
                break;
            }
            state.outcomes.push(outcome);
        }

        let result = ScenarioResult {
            name: scenario.name.clone(),
            status,
            outcomes: state.outcomes,
            artifacts: state.artifacts,
            fault,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            status = ?result.status,
            succeeded = result.count(StepStatus::Succeeded),
            timed_out = result.count(StepStatus::TimedOut),
            failed = result.count(StepStatus::Failed),
            "scenario finished"
        );
        result
    }

    async fn execute(
        &self,
        scenario: &Scenario,
        index: usize,
        step: &Step,
        session: &mut dyn BrowserSession,
        state: &mut ScenarioState,
    ) -> Execution {
        match step {
            Step::Navigate { url, timeout_ms } => {
                let url = match self.resolve_url(url) {
                    Ok(url) => url,
                    Err(err) => return Execution::Fatal(err),
                };
                let timeout = self.timeout_for(scenario, index, *timeout_ms, self.navigation_timeout);
                let navigation = tokio::time::timeout(timeout, session.navigate(url.as_str(), timeout)).await;
                match navigation {
                    Ok(Ok(())) => Execution::done(),
                    Ok(Err(err)) => Execution::Fatal(err.into()),
                    Err(_) => Execution::Fatal(StepError::new(
                        FailureKind::Navigation,
                        format!("navigation to {} did not settle within {}ms", url, timeout.as_millis()),
                    )),
                }
            }

            Step::Click { target, optional } => match session.click(target).await {
                Ok(()) => Execution::done(),
                Err(AdapterError::ElementNotFound { .. }) if *optional => {
                    Execution::detail(format!("skipped: {} not present", target))
                }
                Err(err) => Execution::Fatal(err.into()),
            },

            Step::Fill { target, value } => match session.fill(target, value).await {
                Ok(()) => Execution::done(),
                Err(err) => Execution::Fatal(err.into()),
            },

            Step::UploadFile { target, path } => {
                let path = self.resolve_path(path);
                if !path.is_file() {
                    return Execution::Fatal(StepError::new(
                        FailureKind::Action,
                        format!("upload file not found: {}", path.display()),
                    ));
                }
                match session.set_files(target, std::slice::from_ref(&path)).await {
                    Ok(()) => Execution::detail(path.display().to_string()),
                    Err(err) => Execution::Fatal(err.into()),
                }
            }

            Step::Wait {
                until, timeout_ms, ..
            } => {
                let timeout = self.timeout_for(scenario, index, *timeout_ms, self.wait_timeout);
                let outcome = poller::wait_for(session, until, timeout, self.poll).await;
                if outcome.satisfied {
                    Execution::detail(format!(
                        "satisfied after {} check(s) in {}ms",
                        outcome.attempts, outcome.elapsed_ms
                    ))
                } else {
                    let mut message = format!("{} not met within {}ms", until, timeout.as_millis());
                    if let Some(last) = outcome.last_error {
                        message.push_str(&format!(" (last error: {})", last));
                    }
                    Execution::TimedOut(StepError::new(FailureKind::ConditionTimeout, message))
                }
            }

            Step::Capture { label, full_page } => {
                let bytes = match session.screenshot(*full_page).await {
                    Ok(bytes) => bytes,
                    Err(err) => return Execution::Fatal(err.into()),
                };
                let provenance = Provenance {
                    scenario: Some(&scenario.name),
                    diagnostic: false,
                };
                match self.store.save_with(&bytes, label, provenance) {
                    Ok(artifact) => {
                        let id = artifact.id.clone();
                        let detail = format!("hash {}", artifact.content_hash.short());
                        state.captures.insert(label.clone(), id.clone());
                        state.artifacts.push(artifact);
                        Execution::Done {
                            detail: Some(detail),
                            artifact: Some(id),
                        }
                    }
                    Err(err) => Execution::Fatal(StepError::harness(err)),
                }
            }

            Step::Resize { width, height } => {
                match session.set_viewport(Viewport::new(*width, *height)).await {
                    Ok(()) => Execution::done(),
                    Err(err) => Execution::Fatal(err.into()),
                }
            }

            Step::Pause { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Execution::done()
            }

            Step::Evaluate { script } => match session.evaluate(script).await {
                Ok(value) if value.is_null() => Execution::done(),
                Ok(value) => Execution::detail(value.to_string()),
                Err(err) => Execution::Fatal(StepError::new(FailureKind::Action, err.to_string())),
            },

            Step::Expect { predicate } => match predicate.evaluate(session).await {
                Ok(true) => Execution::done(),
                Ok(false) => Execution::Failed(StepError::new(
                    FailureKind::Expectation,
                    format!("expected {}", predicate),
                )),
                Err(err) => Execution::Failed(StepError::new(
                    FailureKind::Expectation,
                    format!("could not check {}: {}", predicate, err),
                )),
            },

            Step::CompareCaptures {
                first,
                second,
                expect,
            } => self.compare(first, second, *expect, state),
        }
    }

    fn compare(&self, first: &str, second: &str, expect: Comparison, state: &ScenarioState) -> Execution {
        let hash = |label: &str| {
            state
                .captures
                .get(label)
                .and_then(|id| self.store.hash_of(id))
        };
        let (Some(a), Some(b)) = (hash(first), hash(second)) else {
            return Execution::Failed(StepError::new(
                FailureKind::Expectation,
                format!("no capture of both '{}' and '{}' in this scenario", first, second),
            ));
        };

        let identical = a == b;
        let relation = if identical { "identical" } else { "distinct" };
        match (expect, identical) {
            (Comparison::Distinct, true) | (Comparison::Identical, false) => {
                Execution::Failed(StepError::new(
                    FailureKind::Expectation,
                    format!(
                        "expected {} and {} to be {}, but they are {} ({} / {})",
                        first,
                        second,
                        expect.as_str(),
                        relation,
                        a.short(),
                        b.short()
                    ),
                ))
            }
            _ => Execution::detail(format!("{} ({} / {})", relation, a.short(), b.short())),
        }
    }

    async fn capture_diagnostic(
        &self,
        scenario: &Scenario,
        session: &mut dyn BrowserSession,
        outcome: &mut StepOutcome,
        state: &mut ScenarioState,
    ) {
        let label = format!("{}_error", scenario.name);
        let saved = match session.screenshot(true).await {
            Ok(bytes) => {
                let provenance = Provenance {
                    scenario: Some(&scenario.name),
                    diagnostic: true,
                };
                self.store
                    .save_with(&bytes, &label, provenance)
                    .map_err(|e| e.to_string())
            }
            Err(err) => Err(err.to_string()),
        };

        match saved {
            Ok(artifact) => {
                outcome.diagnostic = Some(artifact.id.clone());
                state.artifacts.push(artifact);
            }
            Err(err) => {
                warn!(error = %err, "diagnostic capture failed");
                outcome.detail = Some(format!("diagnostic capture failed: {}", err));
            }
        }
    }

    fn timeout_for(&self, scenario: &Scenario, index: usize, step: Option<u64>, default: Duration) -> Duration {
        let key = format!("{}/{}", scenario.name, index);
        self.timeout_overrides
            .get(&key)
            .copied()
            .or(step)
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    /// Absolute URLs pass through; anything else is joined to the base URL
    fn resolve_url(&self, url: &str) -> Result<Url, StepError> {
        let invalid = |reason: String| StepError::new(FailureKind::Navigation, reason);
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base.as_ref().ok_or_else(|| {
                    invalid(format!("cannot resolve {} against base URL '{}'", url, self.base_url))
                })?;
                base.join(url)
                    .map_err(|e| invalid(format!("invalid URL {}: {}", url, e)))
            }
            Err(e) => Err(invalid(format!("invalid URL {}: {}", url, e))),
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.test_data_dir.join(path)
        }
    }
}
