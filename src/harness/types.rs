use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::artifact::{ArtifactStore, StoreError};
use crate::browser::Viewport;
use crate::config::{self, Config};
use crate::poller::PollSettings;
use crate::runner::ScenarioRunner;
use crate::scenario::{ScenarioError, SuiteFile};

/// Configuration for one harness run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Base URL of the application under test
    pub base_url: String,

    /// Base directory; each run gets its own subdirectory
    pub artifact_dir: PathBuf,

    /// Exact run directory, bypassing the generated one
    pub output_dir: Option<PathBuf>,

    /// Directory relative upload paths resolve against
    pub test_data_dir: PathBuf,

    /// Initial viewport for scenarios that do not set one
    pub viewport: Viewport,

    /// Named viewports the built-in responsive layout check resizes through
    pub responsive_viewports: Vec<(String, Viewport)>,

    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    pub navigation_timeout: Duration,

    /// Per-step timeouts in ms keyed `"<scenario>/<step index>"`
    pub timeout_overrides: BTreeMap<String, u64>,

    /// Duplicate screenshots tolerated before visual coverage fails
    pub duplicate_tolerance: usize,

    /// Scenarios run at once, each on its own session
    pub concurrency: usize,

    /// Write a JSON sidecar next to every screenshot
    pub write_sidecars: bool,
}

impl HarnessConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.target.base_url.clone(),
            artifact_dir: PathBuf::from(&config.run.artifact_dir),
            output_dir: None,
            test_data_dir: PathBuf::from(&config.target.test_data_dir),
            viewport: config.target.viewport,
            responsive_viewports: config.target.responsive_viewports.clone(),
            poll_interval: Duration::from_millis(config.timing.poll_interval_ms),
            wait_timeout: Duration::from_millis(config.timing.wait_timeout_ms),
            navigation_timeout: Duration::from_millis(config.timing.navigation_timeout_ms),
            timeout_overrides: BTreeMap::new(),
            duplicate_tolerance: config.run.duplicate_tolerance,
            concurrency: config.run.concurrency.max(1),
            write_sidecars: true,
        }
    }

    /// Apply the settings a suite file carries next to its scenarios
    pub fn apply_suite(&mut self, suite: &SuiteFile) -> HarnessResult<()> {
        if let Some(base_url) = &suite.base_url {
            self.base_url = base_url.clone();
        }
        if let Some(viewport) = &suite.viewport {
            self.viewport = config::parse_viewport(viewport).ok_or_else(|| {
                HarnessError::Config(ScenarioError::Invalid {
                    scenario: "<suite>".to_string(),
                    reason: format!("unknown viewport '{}'", viewport),
                })
            })?;
        }
        self.timeout_overrides.extend(
            suite
                .timeout_overrides
                .iter()
                .map(|(key, ms)| (key.clone(), *ms)),
        );
        Ok(())
    }

    /// Step executor writing into `store`
    pub fn runner(&self, store: Arc<ArtifactStore>) -> ScenarioRunner {
        ScenarioRunner::new(store, self.base_url.clone())
            .with_poll_settings(PollSettings::new(self.poll_interval))
            .with_test_data_dir(self.test_data_dir.clone())
            .with_default_timeouts(self.wait_timeout, self.navigation_timeout)
            .with_timeout_overrides(self.timeout_overrides.clone())
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_config(config::get())
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that stop a run before any scenario starts
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Unreadable or invalid scenario definitions
    #[error("configuration error: {0}")]
    Config(#[from] ScenarioError),

    /// Unknown scenario requested by name
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),

    #[error("invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Run directory could not be prepared
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error comes from scenario definitions or selection
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HarnessError::Config(_)
                | HarnessError::UnknownScenario(_)
                | HarnessError::InvalidBaseUrl { .. }
        )
    }
}
