//! End-to-end runs of the harness over the scripted mock browser.

use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use web_vision::browser::{MockApp, MockBrowser, MockPage, Viewport};
use web_vision::catalog;
use web_vision::config::{Config, DEFAULT_ANSWER_DOCUMENT, DEFAULT_ANSWER_SHEET};
use web_vision::harness::{HarnessConfig, run_suite};
use web_vision::report::Verdict;
use web_vision::run_dir::list_runs;
use web_vision::scenario::{Comparison, Predicate, Scenario, Step, load_suite};
use web_vision::{ArtifactStore, StepStatus, content_hash};

const BASE: &str = "http://grader.test";

fn test_data(dir: &Path) {
    fs::write(dir.join(DEFAULT_ANSWER_DOCUMENT), b"%PDF-1.4 answer key").unwrap();
    fs::write(dir.join(DEFAULT_ANSWER_SHEET), [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
}

fn harness_config(runs: &Path, data: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::from_config(&Config::defaults());
    config.base_url = BASE.to_string();
    config.artifact_dir = runs.to_path_buf();
    config.test_data_dir = data.to_path_buf();
    config
}

#[tokio::test(start_paused = true)]
async fn test_builtin_catalog_passes_on_mock() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    test_data(data.path());

    let browser = MockBrowser::new(MockApp::grader_demo(BASE));
    let config = harness_config(runs.path(), data.path());
    let run = run_suite(&browser, &config, &catalog::builtin(&config.responsive_viewports)).await.unwrap();
    let report = &run.report;

    for scenario in &report.scenarios {
        assert_eq!(scenario.verdict, Verdict::Passed, "scenario {}", scenario.name);
        assert_eq!(scenario.counts.failed, 0, "scenario {}", scenario.name);
    }
    assert_eq!(report.scenarios_passed, 4);
    assert_eq!(report.harness_faults, 0);

    // only the return to the Single Scan tab repeats a screenshot
    assert_eq!(report.duplicates.total_artifacts, 14);
    assert_eq!(report.duplicates.unique_hash_count, 13);
    assert_eq!(report.duplicates.duplicate_groups.len(), 1);
    assert_eq!(
        report.duplicates.duplicate_groups[0].labels,
        vec!["single_scan_default".to_string(), "back_to_single_scan".to_string()]
    );
    assert!(report.visual_coverage_adequate);
    assert!(report.passed);

    let report_path = run.report_path.as_ref().unwrap();
    assert!(report_path.exists());
    let written: web_vision::Report =
        serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(&written, report);

    let listed = list_runs(runs.path()).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].has_report);
    assert_eq!(run.run.list_captures().unwrap().len(), 14);
}

#[tokio::test(start_paused = true)]
async fn test_grading_wait_returns_when_results_appear() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    test_data(data.path());

    let browser = MockBrowser::new(MockApp::grader_demo(BASE));
    let config = harness_config(runs.path(), data.path());
    let scenarios = vec![catalog::batch_grading()];
    let run = run_suite(&browser, &config, &scenarios).await.unwrap();

    let scenario = run.report.scenario("batch_grading").unwrap();
    let wait = scenario.steps.iter().find(|s| s.action == "wait").unwrap();
    assert_eq!(wait.status, StepStatus::Succeeded);
    // results appear 1.5s after the click, well before the 45s timeout
    assert!((1500..=1700).contains(&wait.elapsed_ms), "waited {}ms", wait.elapsed_ms);
}

#[tokio::test(start_paused = true)]
async fn test_optional_wait_timeout_still_captures() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    test_data(data.path());

    // the Start button never leads anywhere
    let app = MockApp::new()
        .route(BASE, "batch")
        .page(
            "batch",
            MockPage::new("Batch Grade\nStart Batch Grading").control("Start Batch Grading"),
        );
    let browser = MockBrowser::new(app);
    let mut config = harness_config(runs.path(), data.path());
    config.timeout_overrides.insert("stalled/2".to_string(), 2_000);

    let scenarios = vec![Scenario::new(
        "stalled",
        vec![
            Step::navigate("/"),
            Step::click("text=Start Batch Grading"),
            Step::wait(Predicate::body_contains("채점 결과"), 45_000),
            Step::capture("after_wait"),
        ],
    )];
    let run = run_suite(&browser, &config, &scenarios).await.unwrap();
    let scenario = run.report.scenario("stalled").unwrap();

    assert_eq!(scenario.steps[2].status, StepStatus::TimedOut);
    assert_eq!(scenario.steps[2].elapsed_ms, 2_000);
    assert_eq!(scenario.steps[3].status, StepStatus::Succeeded);
    assert_eq!(scenario.artifacts.len(), 1);
    assert_eq!(scenario.verdict, Verdict::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_mandatory_wait_timeout_fails_scenario() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    let browser = MockBrowser::new(MockApp::grader_demo(BASE));
    let config = harness_config(runs.path(), data.path());
    let scenarios = vec![Scenario::new(
        "must_finish",
        vec![
            Step::navigate("/"),
            Step::wait_mandatory(Predicate::body_contains("Never shown"), 1_000),
            Step::capture("after_wait"),
        ],
    )];
    let run = run_suite(&browser, &config, &scenarios).await.unwrap();
    let scenario = run.report.scenario("must_finish").unwrap();

    assert_eq!(scenario.counts.timed_out, 1);
    assert_eq!(scenario.mandatory_timeouts, 1);
    assert_eq!(scenario.verdict, Verdict::Failed);
    assert!(!run.report.passed);
}

#[tokio::test(start_paused = true)]
async fn test_identical_layouts_pass_either_comparison() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    // fixed canvas: every viewport renders the same screenshot
    let app = MockApp::new()
        .route(BASE, "home")
        .page("home", MockPage::new("SMART-GRADER\nBatch Grade"));
    let browser = MockBrowser::new(app);
    let mut config = harness_config(runs.path(), data.path());
    config.duplicate_tolerance = 1;

    let scenarios = vec![Scenario::new(
        "fixed_layout",
        vec![
            Step::navigate("/"),
            Step::resize(Viewport::TABLET),
            Step::capture("tablet_view"),
            Step::resize(Viewport::MOBILE),
            Step::capture("mobile_view"),
            Step::compare("tablet_view", "mobile_view", Comparison::Either),
        ],
    )];
    let run = run_suite(&browser, &config, &scenarios).await.unwrap();
    let scenario = run.report.scenario("fixed_layout").unwrap();

    assert_eq!(scenario.steps[5].status, StepStatus::Succeeded);
    assert!(scenario.steps[5].detail.as_deref().unwrap().starts_with("identical"));
    assert_eq!(run.report.duplicates.unique_hash_count, 1);
    assert!(run.report.visual_coverage_adequate);
    assert!(run.report.passed);
}

#[test]
fn test_distinct_bytes_hash_differently() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();

    let a = store.save(b"screenshot A", "a").unwrap();
    let b = store.save(b"screenshot B", "b").unwrap();
    let a_again = store.save(b"screenshot A", "a").unwrap();

    assert_ne!(a.content_hash, b.content_hash);
    assert_eq!(a.content_hash, a_again.content_hash);
    assert_ne!(a.id, a_again.id);
    assert_eq!(a.content_hash, content_hash(b"screenshot A"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_scenarios_get_unique_ids() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    test_data(data.path());

    let browser = MockBrowser::new(MockApp::grader_demo(BASE));
    let mut config = harness_config(runs.path(), data.path());
    config.concurrency = 2;
    let run = run_suite(&browser, &config, &catalog::builtin(&config.responsive_viewports)).await.unwrap();

    let ids: Vec<_> = run
        .report
        .scenarios
        .iter()
        .flat_map(|s| s.artifacts.iter().map(|a| a.id.clone()))
        .collect();
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 14);
    assert_eq!(unique.len(), ids.len());

    // report order follows definition order, not completion order
    let names: Vec<&str> = run.report.scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["home_navigation", "responsive_layout", "batch_grading", "notion_export"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_suite_file_drives_run() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let suite_path = data.path().join("suite.json");
    fs::write(
        &suite_path,
        format!(
            r#"{{
  "base_url": "{BASE}",
  "viewport": "tablet",
  "timeout_overrides": {{ "smoke/1": 500 }},
  "scenarios": [
    {{
      "name": "smoke",
      "description": "Landing page renders",
      "steps": [
        {{ "action": "navigate", "url": "/" }},
        {{ "action": "wait", "until": {{ "body_contains": "SMART-GRADER" }} }},
        {{ "action": "click", "target": {{ "text": "Batch Grade" }} }},
        {{ "action": "capture", "label": "batch" }},
        {{ "action": "expect", "predicate": {{ "any_of": [
          {{ "body_contains": "Start Batch Grading" }},
          {{ "body_contains": "Answer sheets" }}
        ] }} }}
      ]
    }}
  ]
}}"#
        ),
    )
    .unwrap();

    let suite = load_suite(&suite_path).unwrap();
    let mut config = harness_config(runs.path(), data.path());
    config.base_url = "http://elsewhere.test".to_string();
    config.apply_suite(&suite).unwrap();
    assert_eq!(config.base_url, BASE);
    assert_eq!(config.viewport, Viewport::TABLET);

    let browser = MockBrowser::new(MockApp::grader_demo(BASE));
    let run = run_suite(&browser, &config, &suite.scenarios).await.unwrap();

    assert!(browser.was_called("launch 768x1024"));
    let scenario = run.report.scenario("smoke").unwrap();
    assert_eq!(scenario.verdict, Verdict::Passed);
    assert_eq!(scenario.counts.succeeded, 5);
    assert!(scenario.steps[1].elapsed_ms <= 500);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_output_dir_is_used() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let out = runs.path().join("pinned");

    let browser = MockBrowser::new(MockApp::grader_demo(BASE));
    let mut config = harness_config(runs.path(), data.path());
    config.output_dir = Some(out.clone());
    let scenarios = vec![Scenario::new(
        "one_shot",
        vec![Step::navigate("/"), Step::capture("home")],
    )];
    let run = run_suite(&browser, &config, &scenarios).await.unwrap();

    assert_eq!(run.run.dir, out);
    assert!(out.join("report.json").exists());
}

#[tokio::test(start_paused = true)]
async fn test_reused_output_dir_keeps_earlier_captures() {
    let runs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let out = runs.path().join("pinned");

    let browser = MockBrowser::new(MockApp::grader_demo(BASE));
    let mut config = harness_config(runs.path(), data.path());
    config.output_dir = Some(out.clone());
    let scenarios = vec![Scenario::new(
        "one_shot",
        vec![Step::navigate("/"), Step::capture("home")],
    )];

    let first = run_suite(&browser, &config, &scenarios).await.unwrap();
    let second = run_suite(&browser, &config, &scenarios).await.unwrap();
    assert!(first.report.passed);
    assert!(second.report.passed);
    assert_eq!(second.report.harness_faults, 0);

    let first_id = &first.report.scenarios[0].artifacts[0].id;
    let second_id = &second.report.scenarios[0].artifacts[0].id;
    assert_eq!(first_id.as_str(), "0001_home");
    assert_eq!(second_id.as_str(), "0002_home");
    assert!(out.join("0001_home.png").exists());
    assert!(out.join("0002_home.png").exists());
}
