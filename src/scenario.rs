//! Scenario definitions.
//!
//! A [`Scenario`] is an immutable, ordered list of [`Step`]s. Steps are pure
//! descriptions; the runner gives them meaning. Scenarios come from the
//! built-in catalog or from a JSON suite file:
//!
//! ```json
//! {
//!   "base_url": "http://localhost:3001",
//!   "timeout_overrides": { "batch_grading/7": 60000 },
//!   "scenarios": [
//!     {
//!       "name": "tabs",
//!       "steps": [
//!         { "action": "navigate", "url": "/" },
//!         { "action": "click", "target": { "text": "Batch Grade" } },
//!         { "action": "capture", "label": "batch" },
//!         { "action": "wait", "until": { "body_contains": "Start Batch Grading" }, "timeout_ms": 5000 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::browser::{AdapterResult, BrowserSession, Target, Viewport};

/// Errors in scenario definitions, detected before any scenario runs
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cannot read suite file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed suite file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid scenario '{scenario}': {reason}")]
    Invalid { scenario: String, reason: String },
}

/// A named, ordered script of steps representing one user journey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Initial viewport; the harness default applies when absent
    #[serde(default)]
    pub viewport: Option<Viewport>,

    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            viewport: None,
            steps,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }
}

/// A single scripted action, wait, capture or check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load a URL; relative URLs resolve against the base URL
    Navigate {
        url: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Click an element; an optional click is skipped when the target is absent
    Click {
        target: Target,
        #[serde(default)]
        optional: bool,
    },

    Fill { target: Target, value: String },

    /// Set a file input; relative paths resolve against the test-data directory
    UploadFile { target: Target, path: PathBuf },

    /// Poll until the predicate holds or the timeout elapses
    Wait {
        until: Predicate,
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// A timeout on a mandatory wait fails the scenario
        #[serde(default)]
        mandatory: bool,
    },

    Capture {
        label: String,
        #[serde(default = "default_full_page")]
        full_page: bool,
    },

    Resize { width: u32, height: u32 },

    /// Fixed settle delay
    Pause { ms: u64 },

    /// Run a script for its effect (e.g., scrolling)
    Evaluate { script: String },

    /// Check the predicate once; a false result fails the step without aborting
    Expect { predicate: Predicate },

    /// Compare the content hashes of two earlier captures of this scenario
    CompareCaptures {
        first: String,
        second: String,
        #[serde(default)]
        expect: Comparison,
    },
}

fn default_full_page() -> bool {
    true
}

impl Step {
    pub fn navigate(url: impl Into<String>) -> Self {
        Step::Navigate {
            url: url.into(),
            timeout_ms: None,
        }
    }

    pub fn click(target: impl Into<Target>) -> Self {
        Step::Click {
            target: target.into(),
            optional: false,
        }
    }

    pub fn click_if_present(target: impl Into<Target>) -> Self {
        Step::Click {
            target: target.into(),
            optional: true,
        }
    }

    pub fn fill(target: impl Into<Target>, value: impl Into<String>) -> Self {
        Step::Fill {
            target: target.into(),
            value: value.into(),
        }
    }

    pub fn upload(target: impl Into<Target>, path: impl Into<PathBuf>) -> Self {
        Step::UploadFile {
            target: target.into(),
            path: path.into(),
        }
    }

    pub fn wait(until: Predicate, timeout_ms: u64) -> Self {
        Step::Wait {
            until,
            timeout_ms: Some(timeout_ms),
            mandatory: false,
        }
    }

    pub fn wait_mandatory(until: Predicate, timeout_ms: u64) -> Self {
        Step::Wait {
            until,
            timeout_ms: Some(timeout_ms),
            mandatory: true,
        }
    }

    pub fn capture(label: impl Into<String>) -> Self {
        Step::Capture {
            label: label.into(),
            full_page: true,
        }
    }

    pub fn resize(viewport: Viewport) -> Self {
        Step::Resize {
            width: viewport.width,
            height: viewport.height,
        }
    }

    pub fn pause(ms: u64) -> Self {
        Step::Pause { ms }
    }

    pub fn evaluate(script: impl Into<String>) -> Self {
        Step::Evaluate {
            script: script.into(),
        }
    }

    pub fn expect(predicate: Predicate) -> Self {
        Step::Expect { predicate }
    }

    pub fn compare(first: impl Into<String>, second: impl Into<String>, expect: Comparison) -> Self {
        Step::CompareCaptures {
            first: first.into(),
            second: second.into(),
            expect,
        }
    }

    /// Short action name, matching the JSON `action` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Navigate { .. } => "navigate",
            Step::Click { .. } => "click",
            Step::Fill { .. } => "fill",
            Step::UploadFile { .. } => "upload_file",
            Step::Wait { .. } => "wait",
            Step::Capture { .. } => "capture",
            Step::Resize { .. } => "resize",
            Step::Pause { .. } => "pause",
            Step::Evaluate { .. } => "evaluate",
            Step::Expect { .. } => "expect",
            Step::CompareCaptures { .. } => "compare_captures",
        }
    }

    /// One-line human description for reports and logs
    pub fn summary(&self) -> String {
        match self {
            Step::Navigate { url, .. } => format!("navigate {}", url),
            Step::Click { target, optional: false } => format!("click {}", target),
            Step::Click { target, optional: true } => format!("click {} (if present)", target),
            Step::Fill { target, value } => format!("fill {} with {:?}", target, value),
            Step::UploadFile { target, path } => format!("upload {} to {}", path.display(), target),
            Step::Wait { until, .. } => format!("wait until {}", until),
            Step::Capture { label, .. } => format!("capture {}", label),
            Step::Resize { width, height } => format!("resize to {}x{}", width, height),
            Step::Pause { ms } => format!("pause {}ms", ms),
            Step::Evaluate { script } => format!("evaluate {}", script),
            Step::Expect { predicate } => format!("expect {}", predicate),
            Step::CompareCaptures { first, second, expect } => {
                format!("compare {} and {} ({})", first, second, expect.as_str())
            }
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::parse(s)
    }
}

/// Expected relation between two captures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Distinct,
    Identical,
    /// Record whether they differ, never fail
    #[default]
    Either,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Distinct => "distinct",
            Comparison::Identical => "identical",
            Comparison::Either => "either",
        }
    }
}

/// Boolean condition over live page state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Body text contains the literal string
    BodyContains(String),
    AnyOf(Vec<Predicate>),
    AllOf(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Script expression; truthy result means true
    Script(String),
}

impl Predicate {
    pub fn body_contains(text: impl Into<String>) -> Self {
        Predicate::BodyContains(text.into())
    }

    /// Body text contains at least one of the strings
    pub fn any_text(texts: &[&str]) -> Self {
        Predicate::AnyOf(texts.iter().map(|t| Predicate::body_contains(*t)).collect())
    }

    pub fn all_of(predicates: Vec<Predicate>) -> Self {
        Predicate::AllOf(predicates)
    }

    /// Evaluate against the session, reading the body text at most once
    pub async fn evaluate(&self, session: &mut dyn BrowserSession) -> AdapterResult<bool> {
        let body = if self.needs_body() {
            Some(session.read_body_text().await?)
        } else {
            None
        };

        let mut script_results = Vec::new();
        for script in self.scripts() {
            let value = session.evaluate(script).await?;
            script_results.push(is_truthy(&value));
        }

        let mut scripts = script_results.into_iter();
        Ok(self.holds(body.as_deref(), &mut scripts))
    }

    fn needs_body(&self) -> bool {
        match self {
            Predicate::BodyContains(_) => true,
            Predicate::AnyOf(ps) | Predicate::AllOf(ps) => ps.iter().any(Predicate::needs_body),
            Predicate::Not(p) => p.needs_body(),
            Predicate::Script(_) => false,
        }
    }

    /// Script expressions in evaluation (depth-first) order
    fn scripts(&self) -> Vec<&str> {
        match self {
            Predicate::Script(s) => vec![s.as_str()],
            Predicate::AnyOf(ps) | Predicate::AllOf(ps) => {
                ps.iter().flat_map(Predicate::scripts).collect()
            }
            Predicate::Not(p) => p.scripts(),
            Predicate::BodyContains(_) => Vec::new(),
        }
    }

    fn holds(&self, body: Option<&str>, scripts: &mut impl Iterator<Item = bool>) -> bool {
        match self {
            Predicate::BodyContains(text) => body.is_some_and(|b| b.contains(text.as_str())),
            // every child must consume its scripts, so no short-circuiting
            Predicate::AnyOf(ps) => ps
                .iter()
                .map(|p| p.holds(body, scripts))
                .fold(false, |acc, v| acc || v),
            Predicate::AllOf(ps) => ps
                .iter()
                .map(|p| p.holds(body, scripts))
                .fold(true, |acc, v| acc && v),
            Predicate::Not(p) => !p.holds(body, scripts),
            Predicate::Script(_) => scripts.next().unwrap_or(false),
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |ps: &[Predicate], sep: &str| {
            ps.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(sep)
        };
        match self {
            Predicate::BodyContains(text) => write!(f, "body contains {:?}", text),
            Predicate::AnyOf(ps) => write!(f, "({})", join(ps, " or ")),
            Predicate::AllOf(ps) => write!(f, "({})", join(ps, " and ")),
            Predicate::Not(p) => write!(f, "not {}", p),
            Predicate::Script(s) => write!(f, "script `{}`", s),
        }
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

/// Contents of a JSON suite file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteFile {
    #[serde(default)]
    pub base_url: Option<String>,

    /// Initial viewport preset or `WxH`
    #[serde(default)]
    pub viewport: Option<String>,

    /// Wait/navigation timeouts keyed `"<scenario>/<step index>"`
    #[serde(default)]
    pub timeout_overrides: BTreeMap<String, u64>,

    pub scenarios: Vec<Scenario>,
}

/// Read and validate a suite file
pub fn load_suite(path: &Path) -> Result<SuiteFile, ScenarioError> {
    let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let suite: SuiteFile =
        serde_json::from_str(&content).map_err(|source| ScenarioError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
    validate(&suite.scenarios)?;
    Ok(suite)
}

/// Check a set of scenarios for definition errors
pub fn validate(scenarios: &[Scenario]) -> Result<(), ScenarioError> {
    if scenarios.is_empty() {
        return Err(invalid("<suite>", "no scenarios defined"));
    }

    let mut names = HashSet::new();
    for scenario in scenarios {
        let name = scenario.name.as_str();
        if name.trim().is_empty() {
            return Err(invalid("<unnamed>", "scenario name is empty"));
        }
        if !names.insert(name) {
            return Err(invalid(name, "duplicate scenario name"));
        }
        if scenario.steps.is_empty() {
            return Err(invalid(name, "scenario has no steps"));
        }
        validate_steps(scenario)?;
    }
    Ok(())
}

fn validate_steps(scenario: &Scenario) -> Result<(), ScenarioError> {
    let name = scenario.name.as_str();
    let mut captured: HashSet<&str> = HashSet::new();

    for (index, step) in scenario.steps.iter().enumerate() {
        match step {
            Step::Capture { label, .. } => {
                if label.trim().is_empty() {
                    return Err(invalid(name, &format!("step {}: empty capture label", index)));
                }
                if !captured.insert(label.as_str()) {
                    return Err(invalid(
                        name,
                        &format!("step {}: capture label '{}' used twice", index, label),
                    ));
                }
            }
            Step::CompareCaptures { first, second, .. } => {
                for label in [first, second] {
                    if !captured.contains(label.as_str()) {
                        return Err(invalid(
                            name,
                            &format!("step {}: no earlier capture labeled '{}'", index, label),
                        ));
                    }
                }
            }
            Step::Resize { width, height } if *width == 0 || *height == 0 => {
                return Err(invalid(name, &format!("step {}: zero-sized viewport", index)));
            }
            Step::Click { target, .. }
            | Step::Fill { target, .. }
            | Step::UploadFile { target, .. } => {
                let empty = match target {
                    Target::Text(text) => text.trim().is_empty(),
                    Target::Css { selector, .. } => selector.trim().is_empty(),
                };
                if empty {
                    return Err(invalid(name, &format!("step {}: empty target", index)));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn invalid(scenario: &str, reason: &str) -> ScenarioError {
    ScenarioError::Invalid {
        scenario: scenario.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockApp, MockBrowser};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_step_json_roundtrip_shape() {
        let json = r#"[
            {"action": "navigate", "url": "/"},
            {"action": "click", "target": {"text": "Batch Grade"}},
            {"action": "upload_file", "target": {"css": {"selector": "input[type=file]", "index": 1}}, "path": "sheet.jpg"},
            {"action": "wait", "until": {"any_of": [{"body_contains": "채점 결과"}, {"body_contains": "Grading Results"}]}, "timeout_ms": 45000},
            {"action": "capture", "label": "result"},
            {"action": "compare_captures", "first": "result", "second": "result", "expect": "identical"}
        ]"#;
        let steps: Vec<Step> = serde_json::from_str(json).unwrap();

        assert_eq!(steps[0], Step::navigate("/"));
        assert_eq!(steps[1], Step::click("text=Batch Grade"));
        assert_eq!(steps[2], Step::upload(Target::nth("input[type=file]", 1), "sheet.jpg"));
        assert_eq!(
            steps[3],
            Step::wait(Predicate::any_text(&["채점 결과", "Grading Results"]), 45_000)
        );
        assert_eq!(steps[4], Step::capture("result"));
        assert_eq!(steps[5], Step::compare("result", "result", Comparison::Identical));
    }

    #[test]
    fn test_validate_rejects_unknown_capture_label() {
        let scenario = Scenario::new(
            "tabs",
            vec![Step::capture("a"), Step::compare("a", "b", Comparison::Distinct)],
        );
        let err = validate(&[scenario]).unwrap_err();
        assert!(err.to_string().contains("no earlier capture labeled 'b'"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let a = Scenario::new("same", vec![Step::pause(1)]);
        let b = Scenario::new("same", vec![Step::pause(1)]);
        assert!(validate(&[a, b]).is_err());

        let twice = Scenario::new("twice", vec![Step::capture("x"), Step::capture("x")]);
        assert!(validate(&[twice]).is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate(&[]).is_err());
        assert!(validate(&[Scenario::new("empty", vec![])]).is_err());
        assert!(validate(&[Scenario::new("zero", vec![Step::Resize { width: 0, height: 10 }])]).is_err());
    }

    #[test]
    fn test_load_suite_unreadable_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(load_suite(&missing), Err(ScenarioError::Unreadable { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(load_suite(&broken), Err(ScenarioError::Malformed { .. })));
    }

    #[test]
    fn test_load_suite_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(
            &path,
            r#"{"timeout_overrides": {"tabs/1": 500},
                "scenarios": [{"name": "tabs", "steps": [{"action": "navigate", "url": "/"}]}]}"#,
        )
        .unwrap();
        let suite = load_suite(&path).unwrap();
        assert_eq!(suite.scenarios.len(), 1);
        assert_eq!(suite.timeout_overrides.get("tabs/1"), Some(&500));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&serde_json::json!(null)));
        assert!(!is_truthy(&serde_json::json!(0)));
        assert!(!is_truthy(&serde_json::json!("")));
        assert!(is_truthy(&serde_json::json!(1)));
        assert!(is_truthy(&serde_json::json!("yes")));
    }

    #[tokio::test]
    async fn test_predicate_evaluation() {
        let app = MockApp::grader_demo("http://app")
            .script("window.ready", serde_json::json!(true))
            .script("window.busy", serde_json::json!(0));
        let browser = MockBrowser::new(app);
        let mut session = browser.session(Viewport::DESKTOP);
        session.navigate("http://app", Duration::from_secs(1)).await.unwrap();

        let smart = Predicate::all_of(vec![
            Predicate::body_contains("SMART-GRADER"),
            Predicate::any_text(&["Single Scan", "Batch Grade"]),
        ]);
        assert!(smart.evaluate(&mut session).await.unwrap());
        assert!(!Predicate::body_contains("Grading Results").evaluate(&mut session).await.unwrap());

        let scripted = Predicate::AllOf(vec![
            Predicate::Script("window.ready".into()),
            Predicate::Not(Box::new(Predicate::Script("window.busy".into()))),
        ]);
        assert!(scripted.evaluate(&mut session).await.unwrap());
    }
}
