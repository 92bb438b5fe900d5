//! Scripted in-memory browser.
//!
//! A [`MockApp`] describes pages as text plus the controls that move between
//! them. Transitions may be delayed to model slow backend work, and faults can
//! be injected per app. Screenshots are real PNGs: the current page text is
//! rendered with font8x8 glyphs, so distinct states hash differently and
//! identical states hash identically.

use async_trait::async_trait;
use font8x8::{BASIC_FONTS, LATIN_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{AdapterError, AdapterResult, BrowserSession, SessionLauncher, Target, Viewport};

const GLYPH_SIZE: u32 = 8;
const LINE_HEIGHT: u32 = 10;
const MARGIN: u32 = 4;
const BACKGROUND: [u8; 3] = [30, 30, 36];
const HEADER_BACKGROUND: [u8; 3] = [40, 90, 160];
const FOREGROUND: [u8; 3] = [230, 230, 230];
/// Glyph drawn for characters the font has no bitmap for
const MISSING_GLYPH: [u8; 8] = [0x7E, 0x42, 0x42, 0x42, 0x42, 0x42, 0x7E, 0x00];

/// A control on a page and where activating it leads
#[derive(Debug, Clone)]
struct MockControl {
    trigger: String,
    to: Option<String>,
    delay: Duration,
}

/// One page state of a [`MockApp`]
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    body: String,
    controls: Vec<MockControl>,
    fields: Vec<String>,
    file_inputs: usize,
}

impl MockPage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Clicking `trigger` (visible text or CSS selector) switches to page `to`
    pub fn on_click(self, trigger: impl Into<String>, to: impl Into<String>) -> Self {
        self.on_click_after(trigger, to, Duration::ZERO)
    }

    /// Like [`MockPage::on_click`], but the new page appears only after `delay`
    pub fn on_click_after(
        mut self,
        trigger: impl Into<String>,
        to: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.controls.push(MockControl {
            trigger: trigger.into(),
            to: Some(to.into()),
            delay,
        });
        self
    }

    /// A clickable control that does not change the page
    pub fn control(mut self, trigger: impl Into<String>) -> Self {
        self.controls.push(MockControl {
            trigger: trigger.into(),
            to: None,
            delay: Duration::ZERO,
        });
        self
    }

    /// A fillable input addressed by CSS selector
    pub fn field(mut self, selector: impl Into<String>) -> Self {
        self.fields.push(selector.into());
        self
    }

    /// Number of `input[type=file]` elements on the page
    pub fn file_inputs(mut self, count: usize) -> Self {
        self.file_inputs = count;
        self
    }
}

/// Page model shared by every session of a [`MockBrowser`]
#[derive(Debug, Clone, Default)]
pub struct MockApp {
    pages: HashMap<String, MockPage>,
    routes: HashMap<String, String>,
    scripts: HashMap<String, serde_json::Value>,
    scroll_scripts: HashSet<String>,
    responsive: bool,
    rejected_clicks: HashSet<String>,
    flaky_reads: usize,
    broken_screenshots: bool,
    unlaunchable: bool,
}

impl MockApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, name: impl Into<String>, page: MockPage) -> Self {
        self.pages.insert(name.into(), page);
        self
    }

    /// Navigating to `url` lands on page `name`
    pub fn route(mut self, url: &str, name: impl Into<String>) -> Self {
        self.routes.insert(normalize_url(url), name.into());
        self
    }

    /// Value returned when `expression` is evaluated
    pub fn script(mut self, expression: impl Into<String>, value: serde_json::Value) -> Self {
        self.scripts.insert(expression.into(), value);
        self
    }

    /// Evaluating `expression` scrolls the page to the bottom
    pub fn scroll_script(mut self, expression: impl Into<String>) -> Self {
        self.scroll_scripts.insert(expression.into());
        self
    }

    /// Screenshots scale with the viewport instead of using a fixed canvas
    pub fn responsive(mut self, responsive: bool) -> Self {
        self.responsive = responsive;
        self
    }

    /// Clicking `trigger` fails with an action error
    pub fn reject_click(mut self, trigger: impl Into<String>) -> Self {
        self.rejected_clicks.insert(trigger.into());
        self
    }

    /// The first `count` body-text reads of every session fail
    pub fn flaky_reads(mut self, count: usize) -> Self {
        self.flaky_reads = count;
        self
    }

    pub fn broken_screenshots(mut self) -> Self {
        self.broken_screenshots = true;
        self
    }

    pub fn unlaunchable(mut self) -> Self {
        self.unlaunchable = true;
        self
    }

    /// Model of the grading application: tabbed single/batch modes, file
    /// uploads, a slow grading transition and the Notion export form.
    pub fn grader_demo(base_url: &str) -> Self {
        let header = "SMART-GRADER\nSystem Active";
        MockApp::new()
            .route(base_url, "single_scan")
            .scroll_script(crate::catalog::SCROLL_TO_BOTTOM)
            .responsive(true)
            .page(
                "single_scan",
                MockPage::new(format!(
                    "{header}\n> Single Scan | Batch Grade\nQuick Scan\nClick to select a file\nProgress\nTeacher Mode"
                ))
                .on_click("Batch Grade", "batch_grade")
                .control("Single Scan")
                .on_click("Teacher Mode", "teacher_mode")
                .file_inputs(1),
            )
            .page(
                "teacher_mode",
                MockPage::new(format!(
                    "{header}\nSingle Scan | Batch Grade\nTeacher Mode: ON\nAnswer Key editor"
                ))
                .on_click("Batch Grade", "batch_grade")
                .on_click("Single Scan", "single_scan")
                .on_click("Teacher Mode", "single_scan"),
            )
            .page(
                "batch_grade",
                MockPage::new(format!(
                    "{header}\nSingle Scan | > Batch Grade\nAnswer document (PDF)\nAnswer sheets (images)\nStart Batch Grading"
                ))
                .on_click("Single Scan", "single_scan")
                .control("Batch Grade")
                .on_click_after("Start Batch Grading", "grading_results", Duration::from_millis(1500))
                .file_inputs(2),
            )
            .page(
                "grading_results",
                MockPage::new(format!(
                    "{header}\n채점 결과 / Grading Results\n정답지 / Answer Key\n학생별 #1 Unknown 92%\n통계 / Statistics\n전체 결과 / Summary\nNotion DB 연동"
                ))
                .field("input[placeholder*=\"수학\"]")
                .field("input[placeholder*=\"2026\"]")
                .on_click("Unknown", "student_expanded")
                .on_click_after("Notion 업로드", "notion_uploaded", Duration::from_millis(500)),
            )
            .page(
                "student_expanded",
                MockPage::new(format!(
                    "{header}\n채점 결과 / Grading Results\n학생별 #1 Unknown 92%\nOMR 카드 / OCR\n답안 비교 / Answer comparison\n전체 결과 / Summary"
                ))
                .on_click("Unknown", "grading_results"),
            )
            .page(
                "notion_uploaded",
                MockPage::new(format!(
                    "{header}\n채점 결과 / Grading Results\n업로드 완료\n성적이 Notion에 저장되었습니다"
                )),
            )
    }
}

/// Launcher handing out [`MockSession`]s over one shared [`MockApp`]
#[derive(Debug, Clone)]
pub struct MockBrowser {
    app: Arc<MockApp>,
    history: Arc<Mutex<Vec<String>>>,
}

impl MockBrowser {
    pub fn new(app: MockApp) -> Self {
        Self {
            app: Arc::new(app),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Calls made by all sessions, e.g. `"click text=Batch Grade"`
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    /// Check if any session made a call starting with `prefix`
    pub fn was_called(&self, prefix: &str) -> bool {
        self.history.lock().iter().any(|call| call.starts_with(prefix))
    }

    /// Open a session directly, without going through [`SessionLauncher`]
    pub fn session(&self, viewport: Viewport) -> MockSession {
        MockSession {
            app: Arc::clone(&self.app),
            history: Arc::clone(&self.history),
            page: None,
            pending: None,
            viewport,
            values: BTreeMap::new(),
            files: BTreeMap::new(),
            failed_reads: 0,
            scrolled: false,
            closed: false,
        }
    }
}

#[async_trait]
impl SessionLauncher for MockBrowser {
    async fn launch(&self, viewport: Viewport) -> AdapterResult<Box<dyn BrowserSession>> {
        if self.app.unlaunchable {
            return Err(AdapterError::Launch {
                message: "mock browser configured to refuse launch".to_string(),
            });
        }
        self.history.lock().push(format!("launch {}", viewport));
        Ok(Box::new(self.session(viewport)))
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}

/// One page of a [`MockBrowser`]
#[derive(Debug)]
pub struct MockSession {
    app: Arc<MockApp>,
    history: Arc<Mutex<Vec<String>>>,
    page: Option<String>,
    pending: Option<(String, Instant)>,
    viewport: Viewport,
    values: BTreeMap<String, String>,
    files: BTreeMap<usize, Vec<PathBuf>>,
    failed_reads: usize,
    scrolled: bool,
    closed: bool,
}

impl MockSession {
    /// Name of the page currently shown, after applying due transitions
    pub fn current_page(&mut self) -> Option<String> {
        self.settle();
        self.page.clone()
    }

    fn record(&self, call: String) {
        self.history.lock().push(call);
    }

    fn ensure_open(&self) -> AdapterResult<()> {
        if self.closed {
            return Err(AdapterError::Closed);
        }
        Ok(())
    }

    fn settle(&mut self) {
        if let Some((_, ready_at)) = &self.pending {
            if Instant::now() >= *ready_at {
                if let Some((to, _)) = self.pending.take() {
                    self.switch_to(to);
                }
            }
        }
    }

    fn switch_to(&mut self, page: String) {
        self.page = Some(page);
        self.values.clear();
        self.files.clear();
        self.scrolled = false;
    }

    fn current(&mut self) -> AdapterResult<&MockPage> {
        self.ensure_open()?;
        self.settle();
        let name = self.page.as_deref().unwrap_or_default();
        self.app.pages.get(name).ok_or_else(|| AdapterError::Action {
            message: format!("no document loaded (page '{}')", name),
        })
    }

    fn render(&self) -> AdapterResult<Vec<u8>> {
        let (width, height) = if self.app.responsive {
            ((self.viewport.width / 4).max(64), (self.viewport.height / 4).max(48))
        } else {
            (320, 200)
        };
        let mut canvas = Canvas::new(width, height, BACKGROUND);

        let name = self.page.as_deref().unwrap_or("about:blank");
        canvas.draw_rect(0, 0, width, LINE_HEIGHT + 2, HEADER_BACKGROUND);
        let header = if self.scrolled {
            format!("{} (bottom)", name)
        } else {
            name.to_string()
        };
        canvas.draw_text(MARGIN, 2, &header, FOREGROUND, HEADER_BACKGROUND);

        let mut lines: Vec<String> = Vec::new();
        if let Some(page) = self.app.pages.get(name) {
            lines.extend(page.body.lines().map(str::to_string));
        }
        lines.extend(self.values.iter().map(|(k, v)| format!("{} = {}", k, v)));
        lines.extend(self.files.iter().map(|(i, paths)| {
            let names: Vec<String> = paths
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            format!("file[{}]: {}", i, names.join(", "))
        }));

        let mut y = LINE_HEIGHT + 4;
        for line in &lines {
            if y + GLYPH_SIZE > height {
                break;
            }
            canvas.draw_text(MARGIN, y, line, FOREGROUND, BACKGROUND);
            y += LINE_HEIGHT;
        }

        canvas.to_png()
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> AdapterResult<()> {
        self.ensure_open()?;
        self.record(format!("navigate {}", url));
        match self.app.routes.get(&normalize_url(url)) {
            Some(page) => {
                self.pending = None;
                self.switch_to(page.clone());
                Ok(())
            }
            None => Err(AdapterError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_REFUSED".to_string(),
            }),
        }
    }

    async fn click(&mut self, target: &Target) -> AdapterResult<()> {
        self.record(format!("click {}", target));
        let trigger = match target {
            Target::Text(text) => text.as_str(),
            Target::Css { selector, .. } => selector.as_str(),
        };
        if self.app.rejected_clicks.contains(trigger) {
            return Err(AdapterError::Action {
                message: format!("click on {} was intercepted", target),
            });
        }

        let page = self.current()?;
        let control = page.controls.iter().find(|c| c.trigger == trigger).cloned();
        let static_text = matches!(target, Target::Text(t) if page.body.contains(t.as_str()));

        match control {
            Some(MockControl { to: Some(to), delay, .. }) if delay.is_zero() => {
                self.pending = None;
                self.switch_to(to);
                Ok(())
            }
            Some(MockControl { to: Some(to), delay, .. }) => {
                self.pending = Some((to, Instant::now() + delay));
                Ok(())
            }
            Some(_) => Ok(()),
            None if static_text => Ok(()),
            None => Err(AdapterError::ElementNotFound {
                target: target.to_string(),
            }),
        }
    }

    async fn fill(&mut self, target: &Target, text: &str) -> AdapterResult<()> {
        self.record(format!("fill {}", target));
        let page = self.current()?;
        match target {
            Target::Css { selector, .. } if page.fields.contains(selector) => {
                let selector = selector.clone();
                self.values.insert(selector, text.to_string());
                Ok(())
            }
            _ => Err(AdapterError::ElementNotFound {
                target: target.to_string(),
            }),
        }
    }

    async fn set_files(&mut self, target: &Target, paths: &[PathBuf]) -> AdapterResult<()> {
        self.record(format!("set_files {}", target));
        let page = self.current()?;
        match target {
            Target::Css { index, .. } if *index < page.file_inputs => {
                let index = *index;
                self.files.insert(index, paths.to_vec());
                Ok(())
            }
            _ => Err(AdapterError::ElementNotFound {
                target: target.to_string(),
            }),
        }
    }

    async fn read_body_text(&mut self) -> AdapterResult<String> {
        self.ensure_open()?;
        if self.failed_reads < self.app.flaky_reads {
            self.failed_reads += 1;
            return Err(AdapterError::Evaluation {
                message: "page unreachable".to_string(),
            });
        }
        Ok(self.current()?.body.clone())
    }

    async fn evaluate(&mut self, expression: &str) -> AdapterResult<serde_json::Value> {
        self.ensure_open()?;
        self.settle();
        self.record(format!("evaluate {}", expression));
        if self.app.scroll_scripts.contains(expression) {
            self.scrolled = true;
            return Ok(serde_json::Value::Null);
        }
        self.app
            .scripts
            .get(expression)
            .cloned()
            .ok_or_else(|| AdapterError::Evaluation {
                message: format!("unsupported expression: {}", expression),
            })
    }

    async fn screenshot(&mut self, _full_page: bool) -> AdapterResult<Vec<u8>> {
        self.ensure_open()?;
        self.settle();
        self.record("screenshot".to_string());
        if self.app.broken_screenshots {
            return Err(AdapterError::Screenshot {
                message: "capture target crashed".to_string(),
            });
        }
        self.render()
    }

    async fn set_viewport(&mut self, viewport: Viewport) -> AdapterResult<()> {
        self.ensure_open()?;
        self.record(format!("set_viewport {}", viewport));
        self.viewport = viewport;
        Ok(())
    }

    async fn close(&mut self) -> AdapterResult<()> {
        self.record("close".to_string());
        self.closed = true;
        Ok(())
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// RGB drawing surface used to render mock screenshots
#[derive(Debug, Clone)]
struct Canvas {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = color
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Self {
            width,
            height,
            buffer,
        }
    }

    fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y + h).min(self.height) {
            for px in x..(x + w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw a line of text; characters past the right edge are dropped
    fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x + GLYPH_SIZE > self.width {
                break;
            }
            let glyph = BASIC_FONTS
                .get(ch)
                .or_else(|| LATIN_FONTS.get(ch))
                .unwrap_or(if ch == ' ' { [0u8; 8] } else { MISSING_GLYPH });
            for (row_idx, row) in glyph.iter().enumerate() {
                for bit in 0..GLYPH_SIZE {
                    // font8x8 stores LSB as leftmost pixel
                    let color = if (row >> bit) & 1 == 1 { fg } else { bg };
                    self.set_pixel(cursor_x + bit, y + row_idx as u32, color);
                }
            }
            cursor_x += GLYPH_SIZE;
        }
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    fn to_png(&self) -> AdapterResult<Vec<u8>> {
        let img: RgbImage = ImageBuffer::from_raw(self.width, self.height, self.buffer.clone())
            .ok_or_else(|| AdapterError::Screenshot {
                message: "framebuffer size mismatch".to_string(),
            })?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| AdapterError::Screenshot {
                message: format!("failed to encode PNG: {}", e),
            })?;
        Ok(bytes)
    }
}
