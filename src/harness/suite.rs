use futures::stream::{self, StreamExt};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactStore, DuplicatePolicy, DuplicateSummary};
use crate::browser::SessionLauncher;
use crate::config;
use crate::harness::types::{HarnessConfig, HarnessError, HarnessResult};
use crate::report::{self, Report};
use crate::run_dir::RunDir;
use crate::runner::{ScenarioResult, ScenarioRunner};
use crate::scenario::{self, Scenario};

/// Everything a finished run produced
#[derive(Debug)]
pub struct SuiteRun {
    pub run: RunDir,
    pub report: Report,
    /// Where `report.json` was written, if writing succeeded
    pub report_path: Option<PathBuf>,
}

/// Keep only the scenarios named in `names`, in definition order.
/// An empty filter keeps everything.
pub fn select(scenarios: Vec<Scenario>, names: &[String]) -> HarnessResult<Vec<Scenario>> {
    if names.is_empty() {
        return Ok(scenarios);
    }
    if let Some(unknown) = names.iter().find(|n| !scenarios.iter().any(|s| &s.name == *n)) {
        return Err(HarnessError::UnknownScenario(unknown.clone()));
    }
    Ok(scenarios
        .into_iter()
        .filter(|s| names.contains(&s.name))
        .collect())
}

/// Run `scenarios` and assemble the report.
///
/// Only definition errors, an unparsable base URL and an unusable run
/// directory are returned as errors. Everything that happens once scenarios
/// start ends up in the report.
pub async fn run_suite(
    launcher: &dyn SessionLauncher,
    config: &HarnessConfig,
    scenarios: &[Scenario],
) -> HarnessResult<SuiteRun> {
    scenario::validate(scenarios)?;
    config::parse_base_url(&config.base_url).map_err(|source| HarnessError::InvalidBaseUrl {
        url: config.base_url.clone(),
        source,
    })?;

    let run = match &config.output_dir {
        Some(dir) => RunDir::at(dir),
        None => RunDir::new(&config.artifact_dir),
    };
    let names: Vec<String> = scenarios.iter().map(|s| s.name.clone()).collect();
    run.init(&config.base_url, launcher.backend_name(), &names)
        .map_err(|e| HarnessError::io(&run.dir, e))?;

    let store = Arc::new(ArtifactStore::open(&run.dir)?.with_sidecars(config.write_sidecars));
    let runner = config.runner(Arc::clone(&store));
    info!(
        run = %run.id,
        backend = launcher.backend_name(),
        scenarios = scenarios.len(),
        concurrency = config.concurrency,
        "run started"
    );

    let results: Vec<ScenarioResult> = stream::iter(scenarios)
        .map(|scenario| run_one(launcher, &runner, config, scenario))
        .buffered(config.concurrency.max(1))
        .collect()
        .await;

    if let Err(err) = store.write_manifest() {
        warn!(error = %err, "failed to write artifact manifest");
    }
    let duplicates = DuplicateSummary::from_artifacts(&store.artifacts());
    let report = report::aggregate(
        &results,
        duplicates,
        DuplicatePolicy::new(config.duplicate_tolerance),
    )
    .with_run_id(run.id.clone());

    let report_path = match write_report(&run, &report) {
        Ok(path) => Some(path),
        Err(err) => {
            warn!(error = %err, "failed to write report");
            None
        }
    };
    info!(
        run = %run.id,
        passed = report.passed,
        unique = report.duplicates.unique_hash_count,
        artifacts = report.duplicates.total_artifacts,
        "run finished"
    );

    Ok(SuiteRun {
        run,
        report,
        report_path,
    })
}

async fn run_one(
    launcher: &dyn SessionLauncher,
    runner: &ScenarioRunner,
    config: &HarnessConfig,
    scenario: &Scenario,
) -> ScenarioResult {
    let viewport = scenario.viewport.unwrap_or(config.viewport);
    let mut session = match launcher.launch(viewport).await {
        Ok(session) => session,
        Err(err) => {
            warn!(scenario = %scenario.name, error = %err, "could not open browser session");
            return ScenarioResult::launch_failure(&scenario.name, &err);
        }
    };

    let result = runner.run_scenario(scenario, &mut *session).await;
    if let Err(err) = session.close().await {
        debug!(scenario = %scenario.name, error = %err, "session close failed");
    }
    result
}

fn write_report(run: &RunDir, report: &Report) -> std::io::Result<PathBuf> {
    let path = run.report_path();
    fs::write(&path, serde_json::to_string_pretty(report)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockApp, MockBrowser};
    use crate::config::Config;
    use crate::scenario::Step;

    fn config(dir: &std::path::Path) -> HarnessConfig {
        let mut config = HarnessConfig::from_config(&Config::defaults());
        config.base_url = "http://app.test".to_string();
        config.artifact_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_select() {
        let all = vec![
            Scenario::new("a", vec![Step::pause(1)]),
            Scenario::new("b", vec![Step::pause(1)]),
        ];
        assert_eq!(select(all.clone(), &[]).unwrap().len(), 2);
        let only_b = select(all.clone(), &["b".to_string()]).unwrap();
        assert_eq!(only_b[0].name, "b");
        assert!(matches!(
            select(all, &["c".to_string()]),
            Err(HarnessError::UnknownScenario(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_scenarios_fail_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let browser = MockBrowser::new(MockApp::grader_demo("http://app.test"));
        let err = run_suite(&browser, &config(dir.path()), &[]).await.unwrap_err();

        assert!(err.is_configuration());
        assert!(browser.history().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unparsable_base_url_fails_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let browser = MockBrowser::new(MockApp::grader_demo("http://app.test"));
        let mut config = config(dir.path());
        config.base_url = "localhost:3001".to_string();
        let scenarios = vec![Scenario::new("home", vec![Step::navigate("/")])];

        let err = run_suite(&browser, &config, &scenarios).await.unwrap_err();
        assert!(matches!(err, HarnessError::InvalidBaseUrl { .. }));
        assert!(err.is_configuration());
        assert!(browser.history().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let browser = MockBrowser::new(MockApp::grader_demo("http://app.test").unlaunchable());
        let scenarios = vec![Scenario::new("home", vec![Step::navigate("/")])];

        let run = run_suite(&browser, &config(dir.path()), &scenarios).await.unwrap();
        assert_eq!(run.report.harness_faults, 1);
        assert!(!run.report.passed);
        assert!(run.report_path.is_some_and(|p| p.exists()));
    }
}
