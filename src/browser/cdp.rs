//! Chromium over the DevTools protocol.
//!
//! Every session launches its own browser process, so scenarios never share
//! cookies, storage or a page. Text targets are resolved in page script;
//! CSS targets go through `find_elements`.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{AdapterError, AdapterResult, BrowserSession, SessionLauncher, Target, Viewport};

/// Launches a fresh Chromium per session
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    /// Show the browser window
    pub headful: bool,
    /// Chromium executable; auto-detected when unset
    pub chrome_path: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new(headful: bool, chrome_path: Option<PathBuf>) -> Self {
        Self {
            headful,
            chrome_path,
        }
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self, viewport: Viewport) -> AdapterResult<Box<dyn BrowserSession>> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(viewport.width, viewport.height);
        if self.headful {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(|message| AdapterError::Launch { message })?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(launch_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(launch_error)?;
        let mut session = ChromeSession {
            browser,
            page,
            handler,
            closed: false,
        };
        session.set_viewport(viewport).await?;
        debug!(%viewport, "chrome session ready");
        Ok(Box::new(session))
    }

    fn backend_name(&self) -> &str {
        "chrome"
    }
}

fn launch_error(err: impl std::fmt::Display) -> AdapterError {
    AdapterError::Launch {
        message: err.to_string(),
    }
}

fn action_error(err: impl std::fmt::Display) -> AdapterError {
    AdapterError::Action {
        message: err.to_string(),
    }
}

/// One Chromium process with a single page
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    closed: bool,
}

impl ChromeSession {
    fn ensure_open(&self) -> AdapterResult<()> {
        if self.closed {
            return Err(AdapterError::Closed);
        }
        Ok(())
    }

    async fn element(&self, selector: &str, index: usize) -> AdapterResult<Element> {
        let target = Target::nth(selector, index);
        let mut elements = self.page.find_elements(selector).await.map_err(|_| {
            AdapterError::ElementNotFound {
                target: target.to_string(),
            }
        })?;
        if index >= elements.len() {
            return Err(AdapterError::ElementNotFound {
                target: target.to_string(),
            });
        }
        Ok(elements.swap_remove(index))
    }

    async fn eval_bool(&self, script: String) -> AdapterResult<bool> {
        let result = self.page.evaluate(script).await.map_err(action_error)?;
        result.into_value::<bool>().map_err(action_error)
    }
}

/// Click the innermost visible element whose text contains `text`
fn click_text_script(text: &str) -> String {
    let needle = serde_json::Value::String(text.to_string());
    format!(
        r#"(() => {{
  const needle = {needle};
  const hits = Array.from(document.querySelectorAll('body *')).filter(el =>
    el.offsetParent !== null && (el.innerText || '').includes(needle));
  const inner = hits.filter(el => !hits.some(o => o !== el && el.contains(o)));
  if (inner.length === 0) return false;
  inner[0].click();
  return true;
}})()"#
    )
}

/// Set an input's value the way typing would, so framework listeners fire
fn fill_script(selector: &str, index: usize, value: &str) -> String {
    let selector = serde_json::Value::String(selector.to_string());
    let value = serde_json::Value::String(value.to_string());
    format!(
        r#"(() => {{
  const el = document.querySelectorAll({selector})[{index}];
  if (!el) return false;
  const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
  el.focus();
  setter.call(el, {value});
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#
    )
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> AdapterResult<()> {
        self.ensure_open()?;
        let navigation_error = |message: String| AdapterError::Navigation {
            url: url.to_string(),
            message,
        };
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(navigation_error(err.to_string())),
            Err(_) => Err(navigation_error(format!(
                "not settled within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn click(&mut self, target: &Target) -> AdapterResult<()> {
        self.ensure_open()?;
        match target {
            Target::Text(text) => {
                if self.eval_bool(click_text_script(text)).await? {
                    Ok(())
                } else {
                    Err(AdapterError::ElementNotFound {
                        target: target.to_string(),
                    })
                }
            }
            Target::Css { selector, index } => {
                let element = self.element(selector, *index).await?;
                element.click().await.map_err(action_error)?;
                Ok(())
            }
        }
    }

    async fn fill(&mut self, target: &Target, text: &str) -> AdapterResult<()> {
        self.ensure_open()?;
        let Target::Css { selector, index } = target else {
            return Err(AdapterError::Action {
                message: format!("cannot fill {}: inputs are addressed by CSS selector", target),
            });
        };
        if self.eval_bool(fill_script(selector, *index, text)).await? {
            Ok(())
        } else {
            Err(AdapterError::ElementNotFound {
                target: target.to_string(),
            })
        }
    }

    async fn set_files(&mut self, target: &Target, paths: &[PathBuf]) -> AdapterResult<()> {
        self.ensure_open()?;
        let Target::Css { selector, index } = target else {
            return Err(AdapterError::Action {
                message: format!("cannot upload to {}: file inputs are addressed by CSS selector", target),
            });
        };
        let element = self.element(selector, *index).await?;
        let files = paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>();
        let params = SetFileInputFilesParams::builder()
            .files(files)
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(action_error)?;
        self.page.execute(params).await.map_err(action_error)?;
        Ok(())
    }

    async fn read_body_text(&mut self) -> AdapterResult<String> {
        self.ensure_open()?;
        let result = self
            .page
            .evaluate("document.body ? (document.body.innerText || document.body.textContent || '') : ''")
            .await
            .map_err(|e| AdapterError::Evaluation {
                message: e.to_string(),
            })?;
        result.into_value::<String>().map_err(|e| AdapterError::Evaluation {
            message: e.to_string(),
        })
    }

    async fn evaluate(&mut self, expression: &str) -> AdapterResult<serde_json::Value> {
        self.ensure_open()?;
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| AdapterError::Evaluation {
                message: e.to_string(),
            })?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&mut self, full_page: bool) -> AdapterResult<Vec<u8>> {
        self.ensure_open()?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| AdapterError::Screenshot {
                message: e.to_string(),
            })
    }

    async fn set_viewport(&mut self, viewport: Viewport) -> AdapterResult<()> {
        self.ensure_open()?;
        let params = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            1.0,
            false,
        );
        self.page.execute(params).await.map_err(action_error)?;
        Ok(())
    }

    async fn close(&mut self) -> AdapterResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.browser.close().await.map_err(action_error);
        let _ = self.browser.wait().await;
        self.handler.abort();
        result.map(|_| ())
    }
}
