//! Web Vision - scripted browser verification with content-hashed screenshots.
//!
//! This crate provides:
//! - Scenario definitions (built-in catalog or JSON suite files)
//! - A step executor that turns every failure into a recorded outcome
//! - Condition polling with explicit intervals and deadlines
//! - An artifact store with SHA-256 content hashes and duplicate detection
//! - Report aggregation with text and JSON output
//! - A scripted mock browser and a Chromium backend (`browser` feature)
//!
//! # Example
//!
//! ```rust,no_run
//! use web_vision::browser::{MockApp, MockBrowser};
//! use web_vision::{HarnessConfig, catalog, run_suite};
//!
//! # async fn demo() -> Result<(), web_vision::HarnessError> {
//! let config = HarnessConfig::default();
//! let browser = MockBrowser::new(MockApp::grader_demo(&config.base_url));
//! let run = run_suite(&browser, &config, &catalog::builtin(&config.responsive_viewports)).await?;
//! println!("{}", web_vision::report::render_text(&run.report));
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod browser;
pub mod catalog;
pub mod config;
pub mod harness;
pub mod poller;
pub mod report;
pub mod run_dir;
pub mod runner;
pub mod scenario;

// Re-export the harness entry points
pub use harness::{HarnessConfig, HarnessError, HarnessResult, SuiteRun, run_suite};

// Re-export scenario and result types
pub use report::{Report, Verdict, aggregate};
pub use runner::{FailureKind, ScenarioResult, ScenarioRunner, StepOutcome, StepStatus};
pub use scenario::{Comparison, Predicate, Scenario, ScenarioError, Step};

// Re-export artifact handling
pub use artifact::{Artifact, ArtifactId, ArtifactStore, ContentHash, DuplicatePolicy, DuplicateSummary, content_hash};

// Re-export the browser capability
pub use browser::{AdapterError, BrowserSession, SessionLauncher, Target, Viewport};
