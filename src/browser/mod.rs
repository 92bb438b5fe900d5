//! Browser capability abstraction.
//!
//! The harness drives the application under test exclusively through the
//! primitives of [`BrowserSession`]:
//! - `MockBrowser` for tests and offline demo runs (scripted page model)
//! - `ChromeLauncher` for real Chromium over CDP (`browser` feature)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "browser")]
pub mod cdp;
pub mod mock;

#[cfg(feature = "browser")]
pub use cdp::{ChromeLauncher, ChromeSession};
pub use mock::{MockApp, MockBrowser, MockPage, MockSession};

/// Result type for capability operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors reported by a browser session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// Browser could not be started or a page could not be opened
    #[error("failed to launch browser: {message}")]
    Launch { message: String },

    /// Target URL unreachable or not settled in time
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// Click/fill/upload target is absent
    #[error("element not found: {target}")]
    ElementNotFound { target: String },

    /// Action was dispatched but rejected
    #[error("action failed: {message}")]
    Action { message: String },

    /// Script evaluation failed
    #[error("evaluation failed: {message}")]
    Evaluation { message: String },

    /// Screenshot capture failed
    #[error("screenshot failed: {message}")]
    Screenshot { message: String },

    /// Operation on a session that has been closed
    #[error("session closed")]
    Closed,
}

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const DESKTOP: Viewport = Viewport::new(1280, 800);
    pub const DESKTOP_HD: Viewport = Viewport::new(1920, 1080);
    pub const TABLET: Viewport = Viewport::new(768, 1024);
    pub const MOBILE: Viewport = Viewport::new(375, 667);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Element addressed by an action step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// First element whose visible text contains the string
    Text(String),
    /// The `index`-th element matching a CSS selector
    Css {
        selector: String,
        #[serde(default)]
        index: usize,
    },
}

impl Target {
    pub fn text(text: impl Into<String>) -> Self {
        Target::Text(text.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Target::Css {
            selector: selector.into(),
            index: 0,
        }
    }

    pub fn nth(selector: impl Into<String>, index: usize) -> Self {
        Target::Css {
            selector: selector.into(),
            index,
        }
    }

    /// Parse Playwright-style shorthand: `text=Batch Grade` or a CSS selector
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix("text=") {
            Some(text) => Target::text(text.trim()),
            None => Target::css(s.trim()),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Text(text) => write!(f, "text={}", text),
            Target::Css { selector, index: 0 } => write!(f, "{}", selector),
            Target::Css { selector, index } => write!(f, "{}[{}]", selector, index),
        }
    }
}

/// One exclusive browser session (a single page)
///
/// Calls within a session are strictly sequential; implementations only need
/// `Send`, not `Sync`.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url` and wait for it to settle, bounded by `timeout`
    async fn navigate(&mut self, url: &str, timeout: Duration) -> AdapterResult<()>;

    async fn click(&mut self, target: &Target) -> AdapterResult<()>;

    /// Replace the value of an input element
    async fn fill(&mut self, target: &Target, text: &str) -> AdapterResult<()>;

    /// Set the files of a file input element
    async fn set_files(&mut self, target: &Target, paths: &[PathBuf]) -> AdapterResult<()>;

    /// Text content of the document body
    async fn read_body_text(&mut self) -> AdapterResult<String>;

    /// Evaluate a script expression and return its JSON value
    async fn evaluate(&mut self, expression: &str) -> AdapterResult<serde_json::Value>;

    /// PNG-encoded screenshot
    async fn screenshot(&mut self, full_page: bool) -> AdapterResult<Vec<u8>>;

    async fn set_viewport(&mut self, viewport: Viewport) -> AdapterResult<()>;

    async fn close(&mut self) -> AdapterResult<()>;
}

/// Opens independent browser sessions, one per scenario
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, viewport: Viewport) -> AdapterResult<Box<dyn BrowserSession>>;

    /// Backend identifier recorded in run metadata (e.g., "mock", "chrome")
    fn backend_name(&self) -> &str;
}
