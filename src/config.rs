//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for Web Vision, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for a locally served application under test
//! - Viewport preset parsing shared by the CLI and suite files
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `WEB_VISION_BASE_URL` | Base URL of the application under test | `http://localhost:3000` |
//! | `WEB_VISION_ARTIFACT_DIR` | Base directory for run output | `/tmp/web-vision` |
//! | `WEB_VISION_TEST_DATA_DIR` | Directory holding upload fixtures | `./test_data` |
//! | `WEB_VISION_POLL_INTERVAL` | Condition poll interval (ms) | `200` |
//! | `WEB_VISION_WAIT_TIMEOUT` | Default wait timeout (ms) | `10000` |
//! | `WEB_VISION_NAV_TIMEOUT` | Default navigation timeout (ms) | `15000` |
//! | `WEB_VISION_VIEWPORT` | Initial viewport preset or `WxH` | `desktop` |
//! | `WEB_VISION_RESPONSIVE_VIEWPORTS` | Comma-separated viewports for layout checks | `tablet,mobile` |
//! | `WEB_VISION_DUPLICATE_TOLERANCE` | Duplicate screenshots tolerated per run | `1` |
//! | `WEB_VISION_CONCURRENCY` | Scenarios executed at once | `1` |
//! | `WEB_VISION_CHROME_PATH` | Chromium executable (CDP backend) | unset |
//!
//! # Example
//!
//! ```bash
//! export WEB_VISION_BASE_URL="http://localhost:3001"
//! export WEB_VISION_ARTIFACT_DIR="/var/tmp/web-vision-runs"
//! ```

use std::env;
use std::sync::OnceLock;
use url::Url;

use crate::browser::Viewport;

// ============================================================================
// Default Values
// ============================================================================

/// Default base URL of the application under test
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default base directory for run output
pub const DEFAULT_ARTIFACT_DIR: &str = "/tmp/web-vision";

/// Default directory holding upload fixtures
pub const DEFAULT_TEST_DATA_DIR: &str = "./test_data";

/// Default condition poll interval (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Default wait timeout (milliseconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Default navigation timeout (milliseconds)
pub const DEFAULT_NAV_TIMEOUT_MS: u64 = 15_000;

/// Timeout for waits on grading operations, the most expensive thing the app does
pub const GRADING_TIMEOUT_MS: u64 = 45_000;

/// Default number of duplicate screenshots tolerated in one run
pub const DEFAULT_DUPLICATE_TOLERANCE: usize = 1;

/// Default number of scenarios run at once
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Answer document uploaded by the grading scenarios (relative to the test-data dir)
pub const DEFAULT_ANSWER_DOCUMENT: &str = "suneung_answers.pdf";

/// Answer-sheet image uploaded by the grading scenarios (relative to the test-data dir)
pub const DEFAULT_ANSWER_SHEET: &str = "ss03_omr_marked.jpg";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_BASE_URL: &str = "WEB_VISION_BASE_URL";
pub const ENV_ARTIFACT_DIR: &str = "WEB_VISION_ARTIFACT_DIR";
pub const ENV_TEST_DATA_DIR: &str = "WEB_VISION_TEST_DATA_DIR";
pub const ENV_POLL_INTERVAL: &str = "WEB_VISION_POLL_INTERVAL";
pub const ENV_WAIT_TIMEOUT: &str = "WEB_VISION_WAIT_TIMEOUT";
pub const ENV_NAV_TIMEOUT: &str = "WEB_VISION_NAV_TIMEOUT";
pub const ENV_VIEWPORT: &str = "WEB_VISION_VIEWPORT";
pub const ENV_RESPONSIVE_VIEWPORTS: &str = "WEB_VISION_RESPONSIVE_VIEWPORTS";
pub const ENV_DUPLICATE_TOLERANCE: &str = "WEB_VISION_DUPLICATE_TOLERANCE";
pub const ENV_CONCURRENCY: &str = "WEB_VISION_CONCURRENCY";
pub const ENV_CHROME_PATH: &str = "WEB_VISION_CHROME_PATH";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for Web Vision
#[derive(Debug, Clone)]
pub struct Config {
    /// Application under test
    pub target: TargetSettings,
    /// Timing of waits and navigation
    pub timing: TimingSettings,
    /// Output and policy settings
    pub run: RunSettings,
}

/// Where the application under test lives and what it is fed
#[derive(Debug, Clone)]
pub struct TargetSettings {
    /// Base URL; relative navigation targets are resolved against it
    pub base_url: String,
    /// Directory holding upload fixtures
    pub test_data_dir: String,
    /// Initial viewport of every browser session
    pub viewport: Viewport,
    /// Named viewports the responsive-layout checks resize through, in order
    pub responsive_viewports: Vec<(String, Viewport)>,
    /// Chromium executable for the CDP backend
    pub chrome_path: Option<String>,
}

/// Poll and timeout settings (milliseconds)
#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub poll_interval_ms: u64,
    pub wait_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
}

/// Output location, concurrency and duplicate policy
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Base directory under which each run gets its own subdirectory
    pub artifact_dir: String,
    pub duplicate_tolerance: usize,
    pub concurrency: usize,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            target: TargetSettings::from_env(),
            timing: TimingSettings::from_env(),
            run: RunSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            target: TargetSettings::defaults(),
            timing: TimingSettings::defaults(),
            run: RunSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TargetSettings {
    pub fn from_env() -> Self {
        let viewport = env::var(ENV_VIEWPORT)
            .ok()
            .and_then(|s| parse_viewport(&s))
            .unwrap_or(Viewport::DESKTOP);

        Self {
            base_url: env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            test_data_dir: env::var(ENV_TEST_DATA_DIR)
                .unwrap_or_else(|_| DEFAULT_TEST_DATA_DIR.to_string()),
            viewport,
            responsive_viewports: env::var(ENV_RESPONSIVE_VIEWPORTS)
                .ok()
                .and_then(|s| parse_viewport_list(&s))
                .unwrap_or_else(default_responsive_viewports),
            chrome_path: env::var(ENV_CHROME_PATH).ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            test_data_dir: DEFAULT_TEST_DATA_DIR.to_string(),
            viewport: Viewport::DESKTOP,
            responsive_viewports: default_responsive_viewports(),
            chrome_path: None,
        }
    }
}

impl TimingSettings {
    pub fn from_env() -> Self {
        Self {
            poll_interval_ms: env_u64(ENV_POLL_INTERVAL).unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            wait_timeout_ms: env_u64(ENV_WAIT_TIMEOUT).unwrap_or(DEFAULT_WAIT_TIMEOUT_MS),
            navigation_timeout_ms: env_u64(ENV_NAV_TIMEOUT).unwrap_or(DEFAULT_NAV_TIMEOUT_MS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            navigation_timeout_ms: DEFAULT_NAV_TIMEOUT_MS,
        }
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            artifact_dir: env::var(ENV_ARTIFACT_DIR)
                .unwrap_or_else(|_| DEFAULT_ARTIFACT_DIR.to_string()),
            duplicate_tolerance: env_u64(ENV_DUPLICATE_TOLERANCE)
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_DUPLICATE_TOLERANCE),
            concurrency: env_u64(ENV_CONCURRENCY)
                .map(|v| v as usize)
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_CONCURRENCY),
        }
    }

    pub fn defaults() -> Self {
        Self {
            artifact_dir: DEFAULT_ARTIFACT_DIR.to_string(),
            duplicate_tolerance: DEFAULT_DUPLICATE_TOLERANCE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse a viewport string into a [`Viewport`]
/// Supports: "desktop" (1280x800), "desktop-hd" (1920x1080), "tablet" (768x1024),
/// "mobile" (375x667), or "WxH"
pub fn parse_viewport(size: &str) -> Option<Viewport> {
    match size.trim().to_lowercase().as_str() {
        "desktop" => Some(Viewport::DESKTOP),
        "desktop-hd" | "hd" => Some(Viewport::DESKTOP_HD),
        "tablet" => Some(Viewport::TABLET),
        "mobile" => Some(Viewport::MOBILE),
        custom => {
            let (w, h) = custom.split_once('x')?;
            let width: u32 = w.parse().ok()?;
            let height: u32 = h.parse().ok()?;
            if width == 0 || height == 0 {
                return None;
            }
            Some(Viewport::new(width, height))
        }
    }
}

/// Parse a comma-separated list of viewports, keeping each entry's name.
/// Any invalid entry rejects the whole list.
pub fn parse_viewport_list(list: &str) -> Option<Vec<(String, Viewport)>> {
    let entries = list
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_viewport(entry).map(|v| (entry.to_lowercase(), v)))
        .collect::<Option<Vec<_>>>()?;
    if entries.is_empty() { None } else { Some(entries) }
}

/// Tablet then mobile
pub fn default_responsive_viewports() -> Vec<(String, Viewport)> {
    vec![
        ("tablet".to_string(), Viewport::TABLET),
        ("mobile".to_string(), Viewport::MOBILE),
    ]
}

/// Parse the base URL of the application under test. The path is treated as
/// a directory, so `batch` joined to `http://host/app` is `http://host/app/batch`.
pub fn parse_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;
    // `localhost:3001` parses with scheme `localhost` and cannot be joined
    if url.cannot_be_a_base() {
        return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Get the artifact base directory (convenience function)
pub fn artifact_dir() -> String {
    get().run.artifact_dir.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_viewport_presets() {
        assert_eq!(parse_viewport("desktop"), Some(Viewport::new(1280, 800)));
        assert_eq!(parse_viewport("desktop-hd"), Some(Viewport::new(1920, 1080)));
        assert_eq!(parse_viewport("Tablet"), Some(Viewport::new(768, 1024)));
        assert_eq!(parse_viewport("mobile"), Some(Viewport::new(375, 667)));
    }

    #[test]
    fn test_parse_viewport_custom() {
        assert_eq!(parse_viewport("1024x768"), Some(Viewport::new(1024, 768)));
        assert_eq!(parse_viewport(" 320x480 "), Some(Viewport::new(320, 480)));
    }

    #[test]
    fn test_parse_viewport_invalid() {
        assert_eq!(parse_viewport("huge"), None);
        assert_eq!(parse_viewport("100"), None);
        assert_eq!(parse_viewport("0x600"), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.target.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.run.artifact_dir, DEFAULT_ARTIFACT_DIR);
        assert_eq!(config.timing.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.run.duplicate_tolerance, 1);
        assert_eq!(config.target.responsive_viewports, default_responsive_viewports());
    }

    #[test]
    fn test_parse_viewport_list() {
        assert_eq!(
            parse_viewport_list("desktop, 600x900 ,mobile"),
            Some(vec![
                ("desktop".to_string(), Viewport::DESKTOP),
                ("600x900".to_string(), Viewport::new(600, 900)),
                ("mobile".to_string(), Viewport::MOBILE),
            ])
        );
        assert_eq!(parse_viewport_list("tablet,huge"), None);
        assert_eq!(parse_viewport_list(" , "), None);
    }

    #[test]
    fn test_parse_base_url() {
        assert_eq!(parse_base_url("http://app.test").unwrap().as_str(), "http://app.test/");
        assert_eq!(
            parse_base_url("http://app.test/grader").unwrap().as_str(),
            "http://app.test/grader/"
        );
        assert_eq!(
            parse_base_url("http://app.test/?lang=ko").unwrap().as_str(),
            "http://app.test/?lang=ko"
        );
        assert!(parse_base_url("localhost without scheme").is_err());
        assert!(parse_base_url("localhost:3001").is_err());
    }
}
