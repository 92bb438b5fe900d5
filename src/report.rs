//! Result aggregation and rendering.
//!
//! [`aggregate`] is pure: identical scenario results and duplicate summaries
//! always produce the same [`Report`]. Writing the report is the harness's job.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::artifact::{Artifact, ArtifactId, DuplicatePolicy, DuplicateSummary};
use crate::runner::{FailureKind, ScenarioResult, ScenarioStatus, StepOutcome, StepStatus};

const RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub succeeded: usize,
    pub timed_out: usize,
    pub failed: usize,
}

impl StepCounts {
    fn of(outcomes: &[StepOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome.status {
                StepStatus::Succeeded => counts.succeeded += 1,
                StepStatus::TimedOut => counts.timed_out += 1,
                StepStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn add(&mut self, other: StepCounts) {
        self.succeeded += other.succeeded;
        self.timed_out += other.timed_out;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.timed_out + self.failed
    }
}

/// Scenario verdict; harness faults are kept apart from application failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    HarnessFault,
}

impl Verdict {
    pub fn tag(&self) -> &'static str {
        match self {
            Verdict::Passed => "PASS",
            Verdict::Failed => "FAIL",
            Verdict::HarnessFault => "FAULT",
        }
    }
}

/// Artifact as listed in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub id: ArtifactId,
    pub label: String,
    pub hash: String,
    pub path: String,
    pub diagnostic: bool,
}

impl From<&Artifact> for ArtifactEntry {
    fn from(artifact: &Artifact) -> Self {
        Self {
            id: artifact.id.clone(),
            label: artifact.label.clone(),
            hash: artifact.content_hash.to_string(),
            path: artifact.path.display().to_string(),
            diagnostic: artifact.diagnostic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub verdict: Verdict,
    pub status: ScenarioStatus,
    pub counts: StepCounts,
    /// Timed-out waits that were marked mandatory
    pub mandatory_timeouts: usize,
    pub fault: Option<String>,
    pub elapsed_ms: u64,
    pub steps: Vec<StepOutcome>,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }
}

/// Final document of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub run_id: Option<String>,
    pub scenarios: Vec<ScenarioReport>,
    pub totals: StepCounts,
    pub scenarios_passed: usize,
    pub scenarios_failed: usize,
    pub harness_faults: usize,
    pub duplicates: DuplicateSummary,
    pub duplicate_tolerance: usize,
    pub visual_coverage_adequate: bool,
    pub passed: bool,
}

impl Report {
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

fn verdict(result: &ScenarioResult, counts: &StepCounts, mandatory_timeouts: usize) -> Verdict {
    let harness_step = result
        .outcomes
        .iter()
        .any(|o| o.error.as_ref().is_some_and(|e| e.kind == FailureKind::Harness));
    if result.fault.is_some() || harness_step {
        Verdict::HarnessFault
    } else if counts.failed > 0 || mandatory_timeouts > 0 {
        Verdict::Failed
    } else {
        Verdict::Passed
    }
}

/// Combine scenario results and the duplicate summary into a report
pub fn aggregate(
    results: &[ScenarioResult],
    duplicates: DuplicateSummary,
    policy: DuplicatePolicy,
) -> Report {
    let mut totals = StepCounts::default();
    let scenarios: Vec<ScenarioReport> = results
        .iter()
        .map(|result| {
            let counts = StepCounts::of(&result.outcomes);
            totals.add(counts);
            let mandatory_timeouts = result
                .outcomes
                .iter()
                .filter(|o| o.mandatory && o.status == StepStatus::TimedOut)
                .count();
            ScenarioReport {
                name: result.name.clone(),
                verdict: verdict(result, &counts, mandatory_timeouts),
                status: result.status,
                counts,
                mandatory_timeouts,
                fault: result.fault.clone(),
                elapsed_ms: result.elapsed_ms,
                steps: result.outcomes.clone(),
                artifacts: result.artifacts.iter().map(ArtifactEntry::from).collect(),
            }
        })
        .collect();

    let count = |v: Verdict| scenarios.iter().filter(|s| s.verdict == v).count();
    let scenarios_passed = count(Verdict::Passed);
    let scenarios_failed = count(Verdict::Failed);
    let harness_faults = count(Verdict::HarnessFault);
    let visual_coverage_adequate = policy.is_adequate(&duplicates);

    Report {
        run_id: None,
        passed: scenarios_passed == scenarios.len() && visual_coverage_adequate,
        scenarios,
        totals,
        scenarios_passed,
        scenarios_failed,
        harness_faults,
        duplicates,
        duplicate_tolerance: policy.tolerance,
        visual_coverage_adequate,
    }
}

fn step_tag(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Succeeded => "PASS",
        StepStatus::TimedOut => "TIME",
        StepStatus::Failed => "FAIL",
    }
}

/// Human-readable summary
pub fn render_text(report: &Report) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{}", rule);
    match &report.run_id {
        Some(id) => {
            let _ = writeln!(out, "TEST RESULTS  {}", id);
        }
        None => {
            let _ = writeln!(out, "TEST RESULTS");
        }
    }
    let _ = writeln!(out, "{}", rule);

    for scenario in &report.scenarios {
        let _ = writeln!(
            out,
            "\n[{}] {} ({} steps, {}ms{})",
            scenario.verdict.tag(),
            scenario.name,
            scenario.counts.total(),
            scenario.elapsed_ms,
            if scenario.status == ScenarioStatus::Aborted { ", aborted" } else { "" },
        );
        if let Some(fault) = &scenario.fault {
            let _ = writeln!(out, "  harness fault: {}", fault);
        }
        for step in &scenario.steps {
            let _ = write!(
                out,
                "  [{}] {:>2}. {} ({}ms)",
                step_tag(step.status),
                step.index,
                step.summary,
                step.elapsed_ms
            );
            if let Some(error) = &step.error {
                let _ = write!(out, " - {}: {}", error.kind.as_str(), error.message);
            } else if let Some(detail) = &step.detail {
                let _ = write!(out, " - {}", detail);
            }
            let _ = writeln!(out);
        }
        for artifact in &scenario.artifacts {
            let short = artifact.hash.get(..8).unwrap_or(&artifact.hash);
            let marker = if artifact.diagnostic { " (diagnostic)" } else { "" };
            let _ = writeln!(out, "    {} {}{}", short, artifact.path, marker);
        }
    }

    let duplicates = &report.duplicates;
    let _ = writeln!(out, "\n{}", "-".repeat(RULE_WIDTH));
    let _ = writeln!(
        out,
        "Steps: {} succeeded, {} timed out, {} failed",
        report.totals.succeeded, report.totals.timed_out, report.totals.failed
    );
    let _ = writeln!(
        out,
        "Scenarios: {} passed, {} failed, {} harness faults",
        report.scenarios_passed, report.scenarios_failed, report.harness_faults
    );
    let _ = writeln!(
        out,
        "[{}] Screenshots: {} total, {} unique (tolerance {})",
        if report.visual_coverage_adequate { "PASS" } else { "FAIL" },
        duplicates.total_artifacts,
        duplicates.unique_hash_count,
        report.duplicate_tolerance
    );
    for group in &duplicates.duplicate_groups {
        let _ = writeln!(out, "  duplicate {}: {}", group.hash.short(), group.labels.join(", "));
    }
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "RESULT: {}", if report.passed { "PASS" } else { "FAIL" });
    out
}
