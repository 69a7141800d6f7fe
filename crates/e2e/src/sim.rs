//! In-process simulated document
//!
//! A small stand-in for a real rendering engine: documents are declared as
//! flat element lists per route, each element with role/text/placeholder
//! semantics, a region, and a visibility rule tied to layout, connectivity or
//! reveal flags. Reactions to clicks, key presses, uploads and network
//! changes become observable only after a configurable latency, so waits are
//! exercised the same way they are against a live application.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use reqwest::Url;
use tokio::time::Instant;

use crate::driver::{Driver, Locator, Page, Query, Viewport};
use crate::environment::{Layout, DEFAULT_BREAKPOINT};
use crate::error::{E2eError, E2eResult};

/// When an element is rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Show {
    Always,
    /// Mounted always, visible only in the desktop layout
    Desktop,
    /// Mounted always, visible only in the mobile layout
    Mobile,
    /// Mounted and visible only while offline
    Offline,
    /// Mounted and visible once the flag is revealed
    Revealed(String),
    /// Mounted but never visible (e.g. a styled-away file input)
    Never,
}

/// Side effect of an interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Reveal(String),
    Conceal(String),
    Navigate(String),
}

#[derive(Debug, Clone)]
pub struct SimElement {
    role: Option<String>,
    name: Option<String>,
    text: Option<String>,
    placeholder: Option<String>,
    selectors: Vec<String>,
    region: Option<String>,
    show: Show,
    editable: bool,
    file_input: bool,
    on_click: Vec<Effect>,
}

impl SimElement {
    fn blank() -> Self {
        Self {
            role: None,
            name: None,
            text: None,
            placeholder: None,
            selectors: Vec::new(),
            region: None,
            show: Show::Always,
            editable: false,
            file_input: false,
            on_click: Vec::new(),
        }
    }

    fn labelled(role: &str, label: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            name: Some(label.to_string()),
            text: Some(label.to_string()),
            ..Self::blank()
        }
    }

    pub fn button(label: &str) -> Self {
        Self::labelled("button", label)
    }

    pub fn link(label: &str) -> Self {
        Self::labelled("link", label)
    }

    pub fn heading(label: &str) -> Self {
        Self::labelled("heading", label)
    }

    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::blank()
        }
    }

    pub fn input(placeholder: &str) -> Self {
        Self {
            role: Some("textbox".to_string()),
            placeholder: Some(placeholder.to_string()),
            selectors: vec!["input".to_string()],
            editable: true,
            ..Self::blank()
        }
    }

    pub fn textarea() -> Self {
        Self {
            role: Some("textbox".to_string()),
            selectors: vec!["textarea".to_string()],
            editable: true,
            ..Self::blank()
        }
    }

    /// Region root such as a dock or tab bar
    pub fn container(selector: &str) -> Self {
        Self {
            selectors: vec![selector.to_string()],
            ..Self::blank()
        }
    }

    /// Hidden `<input type="file">` as dropzones render it
    pub fn file_input() -> Self {
        Self {
            selectors: vec!["input[type='file']".to_string()],
            show: Show::Never,
            file_input: true,
            ..Self::blank()
        }
    }

    /// Answer to an additional literal selector
    pub fn with_selector(mut self, css: &str) -> Self {
        self.selectors.push(css.to_string());
        self
    }

    /// Place inside the container answering to `selector`
    pub fn in_region(mut self, selector: &str) -> Self {
        self.region = Some(selector.to_string());
        self
    }

    pub fn show(mut self, show: Show) -> Self {
        self.show = show;
        self
    }

    pub fn desktop_only(self) -> Self {
        self.show(Show::Desktop)
    }

    pub fn mobile_only(self) -> Self {
        self.show(Show::Mobile)
    }

    pub fn offline_only(self) -> Self {
        self.show(Show::Offline)
    }

    pub fn revealed_by(self, flag: &str) -> Self {
        self.show(Show::Revealed(flag.to_string()))
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }

    fn matches(&self, locator: &Locator) -> bool {
        if let Some(scope) = &locator.scope {
            if self.region.as_deref() != Some(scope.as_str()) {
                return false;
            }
        }
        match &locator.query {
            Query::Role { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && name.as_ref().map_or(true, |n| self.name.as_deref() == Some(n.as_str()))
            }
            Query::Text { text, exact } => self.text.as_deref().map_or(false, |t| {
                if *exact {
                    t == text
                } else {
                    t.contains(text.as_str())
                }
            }),
            Query::Placeholder { text } => self.placeholder.as_deref() == Some(text.as_str()),
            Query::Selector { css } => self.selectors.iter().any(|s| s == css),
        }
    }
}

/// Declarative model of the application under test
#[derive(Debug, Clone)]
pub struct SimDocument {
    routes: HashMap<String, Vec<SimElement>>,
    not_found: Option<Vec<SimElement>>,
    keys: HashMap<String, Vec<Effect>>,
    upload_reveals: Option<String>,
    latency: Duration,
    open_latency: Duration,
    breakpoint: u32,
    raw_screenshots: Option<Vec<u8>>,
}

impl Default for SimDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDocument {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            not_found: None,
            keys: HashMap::new(),
            upload_reveals: None,
            latency: Duration::ZERO,
            open_latency: Duration::ZERO,
            breakpoint: DEFAULT_BREAKPOINT,
            raw_screenshots: None,
        }
    }

    pub fn route(mut self, path: &str, elements: Vec<SimElement>) -> Self {
        self.routes.insert(normalize_path(path), elements);
        self
    }

    /// Document served for unknown routes; without one they fail to load.
    pub fn not_found(mut self, elements: Vec<SimElement>) -> Self {
        self.not_found = Some(elements);
        self
    }

    pub fn on_key(mut self, key: &str, effect: Effect) -> Self {
        self.keys.entry(key.to_string()).or_default().push(effect);
        self
    }

    /// Flag revealed after any file lands in a file input
    pub fn upload_reveals(mut self, flag: &str) -> Self {
        self.upload_reveals = Some(flag.to_string());
        self
    }

    /// Delay before reactions become observable
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay before a newly requested page is handed out
    pub fn open_latency(mut self, latency: Duration) -> Self {
        self.open_latency = latency;
        self
    }

    pub fn breakpoint(mut self, breakpoint: u32) -> Self {
        self.breakpoint = breakpoint;
        self
    }

    /// Serve these bytes from every screenshot instead of a rendered PNG
    pub fn raw_screenshots(mut self, bytes: &[u8]) -> Self {
        self.raw_screenshots = Some(bytes.to_vec());
        self
    }
}

/// Counters shared by a driver and all its pages
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub opened: usize,
    pub closed: usize,
    pub screenshots: usize,
    pub navigations: Vec<String>,
    pub uploads: Vec<PathBuf>,
    /// Text typed by fill, in order
    pub fills: Vec<String>,
    pub viewports: Vec<Viewport>,
}

#[derive(Clone)]
pub struct SimDriver {
    document: Arc<SimDocument>,
    stats: Arc<Mutex<SimStats>>,
}

impl SimDriver {
    pub fn new(document: SimDocument) -> Self {
        Self {
            document: Arc::new(document),
            stats: Arc::new(Mutex::new(SimStats::default())),
        }
    }

    pub fn stats(&self) -> SimStats {
        self.stats.lock().clone()
    }
}

#[async_trait]
impl Driver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    async fn open_page(&self, viewport: Viewport) -> E2eResult<Box<dyn Page>> {
        if !self.document.open_latency.is_zero() {
            tokio::time::sleep(self.document.open_latency).await;
        }
        {
            let mut stats = self.stats.lock();
            stats.opened += 1;
            stats.viewports.push(viewport);
        }
        Ok(Box::new(SimPage {
            document: self.document.clone(),
            stats: self.stats.clone(),
            url: None,
            viewport,
            offline: false,
            network_changed: None,
            revealed: HashMap::new(),
            uploads: Vec::new(),
            values: HashMap::new(),
            closed: false,
        }))
    }
}

struct SimPage {
    document: Arc<SimDocument>,
    stats: Arc<Mutex<SimStats>>,
    url: Option<Url>,
    viewport: Viewport,
    offline: bool,
    network_changed: Option<Instant>,
    revealed: HashMap<String, Instant>,
    uploads: Vec<(String, Instant)>,
    values: HashMap<usize, String>,
    closed: bool,
}

impl SimPage {
    fn ensure_open(&self) -> E2eResult<()> {
        if self.closed {
            return Err(E2eError::Driver("target page has been closed".to_string()));
        }
        Ok(())
    }

    fn layout(&self) -> Layout {
        Layout::for_width(self.viewport.width, self.document.breakpoint)
    }

    fn settled(&self, since: Instant, now: Instant) -> bool {
        now >= since + self.document.latency
    }

    fn flag_set(&self, flag: &str, now: Instant) -> bool {
        self.revealed.get(flag).map_or(false, |t| self.settled(*t, now))
    }

    /// Connectivity as the application currently perceives it
    fn app_offline(&self, now: Instant) -> bool {
        match self.network_changed {
            Some(t) if !self.settled(t, now) => !self.offline,
            _ => self.offline,
        }
    }

    /// Current document: route elements plus file names shown after uploads
    fn elements(&self) -> Vec<SimElement> {
        let Some(url) = &self.url else {
            return Vec::new();
        };
        let path = normalize_path(url.path());
        let mut elements = self
            .document
            .routes
            .get(&path)
            .or(self.document.not_found.as_ref())
            .cloned()
            .unwrap_or_default();
        for (name, _) in &self.uploads {
            elements.push(SimElement::text(name).revealed_by(&upload_flag(name)));
        }
        elements
    }

    fn mounted(&self, element: &SimElement, now: Instant) -> bool {
        match &element.show {
            Show::Offline => self.app_offline(now),
            Show::Revealed(flag) => self.flag_set(flag, now),
            Show::Always | Show::Desktop | Show::Mobile | Show::Never => true,
        }
    }

    fn visible(&self, element: &SimElement, now: Instant) -> bool {
        if !self.mounted(element, now) {
            return false;
        }
        match &element.show {
            Show::Desktop => self.layout() == Layout::Desktop,
            Show::Mobile => self.layout() == Layout::Mobile,
            Show::Never => false,
            Show::Always | Show::Offline | Show::Revealed(_) => true,
        }
    }

    /// Mounted matches as (position in document, element)
    fn matching(&self, locator: &Locator) -> Vec<(usize, SimElement)> {
        let now = Instant::now();
        self.elements()
            .into_iter()
            .enumerate()
            .filter(|(_, e)| self.mounted(e, now) && e.matches(locator))
            .collect()
    }

    fn nth(&self, locator: &Locator, index: usize) -> E2eResult<(usize, SimElement)> {
        self.matching(locator)
            .into_iter()
            .nth(index)
            .ok_or_else(|| E2eError::Driver(format!("no element #{} for {}", index, locator)))
    }

    fn actionable(&self, locator: &Locator, index: usize) -> E2eResult<(usize, SimElement)> {
        let (position, element) = self.nth(locator, index)?;
        if !self.visible(&element, Instant::now()) {
            return Err(E2eError::Driver(format!("element {} is not visible", locator)));
        }
        Ok((position, element))
    }

    async fn apply(&mut self, effects: &[Effect]) -> E2eResult<()> {
        let now = Instant::now();
        for effect in effects {
            match effect {
                Effect::Reveal(flag) => {
                    self.revealed.insert(flag.clone(), now);
                }
                Effect::Conceal(flag) => {
                    self.revealed.remove(flag);
                }
                Effect::Navigate(path) => {
                    let target = self
                        .url
                        .as_ref()
                        .and_then(|u| u.join(path).ok())
                        .ok_or_else(|| {
                            E2eError::Driver(format!("cannot follow link to {}", path))
                        })?;
                    self.goto(target.as_str(), Duration::from_secs(30)).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Page for SimPage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> E2eResult<()> {
        self.ensure_open()?;
        let parsed = Url::parse(url).map_err(|e| E2eError::NavigationFailure {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if self.offline {
            return Err(E2eError::NavigationFailure {
                url: url.to_string(),
                reason: "net::ERR_INTERNET_DISCONNECTED".to_string(),
            });
        }
        let path = normalize_path(parsed.path());
        if !self.document.routes.contains_key(&path) && self.document.not_found.is_none() {
            return Err(E2eError::NavigationFailure {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }

        self.url = Some(parsed);
        self.revealed.clear();
        self.uploads.clear();
        self.values.clear();
        self.stats.lock().navigations.push(url.to_string());
        Ok(())
    }

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        self.ensure_open()?;
        Ok(self.matching(locator).len())
    }

    async fn is_visible(&self, locator: &Locator, index: usize) -> E2eResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .matching(locator)
            .get(index)
            .map_or(false, |(_, e)| self.visible(e, now)))
    }

    async fn click(&mut self, locator: &Locator, index: usize) -> E2eResult<()> {
        self.ensure_open()?;
        let (_, element) = self.actionable(locator, index)?;
        self.apply(&element.on_click).await
    }

    async fn fill(&mut self, locator: &Locator, index: usize, text: &str) -> E2eResult<()> {
        self.ensure_open()?;
        let (position, element) = self.actionable(locator, index)?;
        if !element.editable {
            return Err(E2eError::Driver(format!("element {} is not editable", locator)));
        }
        self.values.insert(position, text.to_string());
        self.stats.lock().fills.push(text.to_string());
        Ok(())
    }

    async fn set_input_files(
        &mut self,
        locator: &Locator,
        index: usize,
        path: &Path,
    ) -> E2eResult<()> {
        self.ensure_open()?;
        let (_, element) = self.nth(locator, index)?;
        if !element.file_input {
            return Err(E2eError::Driver(format!("element {} is not a file input", locator)));
        }
        if !path.is_file() {
            return Err(E2eError::Driver(format!("no such file: {}", path.display())));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let now = Instant::now();
        self.revealed.insert(upload_flag(&name), now);
        if let Some(flag) = &self.document.upload_reveals {
            self.revealed.insert(flag.clone(), now);
        }
        self.uploads.push((name, now));
        self.stats.lock().uploads.push(path.to_path_buf());
        Ok(())
    }

    async fn press(&mut self, target: Option<(&Locator, usize)>, key: &str) -> E2eResult<()> {
        self.ensure_open()?;
        if let Some((locator, index)) = target {
            self.actionable(locator, index)?;
        }
        let effects = self.document.keys.get(key).cloned().unwrap_or_default();
        self.apply(&effects).await
    }

    async fn set_viewport(&mut self, viewport: Viewport) -> E2eResult<()> {
        self.ensure_open()?;
        self.viewport = viewport;
        self.stats.lock().viewports.push(viewport);
        Ok(())
    }

    async fn set_offline(&mut self, offline: bool) -> E2eResult<()> {
        self.ensure_open()?;
        if self.offline != offline {
            self.offline = offline;
            self.network_changed = Some(Instant::now());
        }
        Ok(())
    }

    async fn screenshot(&self) -> E2eResult<Vec<u8>> {
        self.ensure_open()?;
        if let Some(raw) = &self.document.raw_screenshots {
            self.stats.lock().screenshots += 1;
            return Ok(raw.clone());
        }
        let width = (self.viewport.width / 16).max(1);
        let height = (self.viewport.height / 16).max(1);
        let color = match (self.layout(), self.app_offline(Instant::now())) {
            (_, true) => Rgba([245, 158, 11, 255]),
            (Layout::Desktop, false) => Rgba([5, 5, 5, 255]),
            (Layout::Mobile, false) => Rgba([10, 10, 10, 255]),
        };
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, color));
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
        self.stats.lock().screenshots += 1;
        Ok(bytes)
    }

    async fn close(&mut self) -> E2eResult<()> {
        self.closed = true;
        self.stats.lock().closed += 1;
        Ok(())
    }
}

fn upload_flag(name: &str) -> String {
    format!("upload:{}", name)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> Locator {
        Locator {
            scope: None,
            query: Query::Text { text: t.into(), exact: true },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_indicator_lags_network_change() {
        let document = SimDocument::new()
            .route("/", vec![SimElement::text("Offline Mode Active").offline_only()])
            .latency(Duration::from_millis(300));
        let driver = SimDriver::new(document);
        let mut page = driver.open_page(Viewport::default()).await.unwrap();
        page.goto("http://localhost:3000/", Duration::from_secs(1)).await.unwrap();

        let indicator = text("Offline Mode Active");
        page.set_offline(true).await.unwrap();
        assert_eq!(page.count(&indicator).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(page.is_visible(&indicator, 0).await.unwrap());

        page.set_offline(false).await.unwrap();
        assert!(page.is_visible(&indicator, 0).await.unwrap());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(page.count(&indicator).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_route_without_fallback_fails() {
        let driver = SimDriver::new(SimDocument::new().route("/ja", vec![]));
        let mut page = driver.open_page(Viewport::default()).await.unwrap();
        let err = page
            .goto("http://localhost:3000/ja/missing", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::NavigationFailure { .. }));
    }

    #[tokio::test]
    async fn test_screenshot_is_png() {
        let driver = SimDriver::new(SimDocument::new());
        let page = driver.open_page(Viewport::new(375, 812)).await.unwrap();
        let bytes = page.screenshot().await.unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 23);
        assert_eq!(driver.stats().screenshots, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_latency_delays_the_page() {
        let driver = SimDriver::new(SimDocument::new().open_latency(Duration::from_secs(5)));
        let started = Instant::now();
        driver.open_page(Viewport::default()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(driver.stats().opened, 1);
    }

    #[tokio::test]
    async fn test_fill_needs_an_editable_element() {
        let document = SimDocument::new().route(
            "/",
            vec![SimElement::heading("Lumina"), SimElement::textarea()],
        );
        let driver = SimDriver::new(document);
        let mut page = driver.open_page(Viewport::default()).await.unwrap();
        page.goto("http://localhost:3000/", Duration::from_secs(1)).await.unwrap();

        let area = Locator {
            scope: None,
            query: Query::Selector { css: "textarea".into() },
        };
        page.fill(&area, 0, "hello").await.unwrap();
        assert!(page.fill(&text("Lumina"), 0, "nope").await.is_err());
        assert_eq!(driver.stats().fills, vec!["hello".to_string()]);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/ja/"), "/ja");
        assert_eq!(normalize_path("/"), "/");
    }
}
