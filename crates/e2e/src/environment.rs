//! Test-environment state: viewport, connectivity, base URL and locale
//!
//! The controller applies each change through the page and waits for the
//! engine to acknowledge it before returning. It never waits for the
//! application to react; that is what assertion steps are for.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::driver::Viewport;
use crate::error::{E2eError, E2eResult};
use crate::session::Session;

/// Minimum width, in CSS pixels, at which the desktop layout is active.
/// Matches the `lg` breakpoint the dock and tab bar switch on.
pub const DEFAULT_BREAKPOINT: u32 = 1024;

/// Layout variant of the application for a given viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Desktop,
    Mobile,
}

impl Layout {
    /// One breakpoint, no intermediate class: `width >= breakpoint` is desktop.
    pub fn for_width(width: u32, breakpoint: u32) -> Self {
        if width >= breakpoint {
            Layout::Desktop
        } else {
            Layout::Mobile
        }
    }
}

/// Per-session environment, mutated only by viewport, network and navigate steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub viewport: Viewport,
    pub online: bool,
    pub base_url: String,
    pub locale: Option<String>,
    pub breakpoint: u32,
}

impl EnvironmentState {
    pub fn new(base_url: impl Into<String>, viewport: Viewport) -> Self {
        Self {
            viewport,
            online: true,
            base_url: base_url.into(),
            locale: None,
            breakpoint: DEFAULT_BREAKPOINT,
        }
    }

    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.locale = locale.filter(|l| !l.is_empty());
        self
    }

    pub fn with_breakpoint(mut self, breakpoint: u32) -> Self {
        self.breakpoint = breakpoint;
        self
    }

    pub fn layout(&self) -> Layout {
        Layout::for_width(self.viewport.width, self.breakpoint)
    }

    /// Resolve a step URL against this environment.
    ///
    /// Absolute URLs are used verbatim. Relative paths are placed under the
    /// base URL and the locale prefix, unless they already start with it.
    pub fn resolve_url(&self, url: &str) -> E2eResult<Url> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }

        let mut base = Url::parse(&self.base_url)
            .map_err(|e| E2eError::Config(format!("invalid base_url '{}': {}", self.base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let relative = url.trim_start_matches('/');
        let relative = match &self.locale {
            Some(locale) => {
                let first = relative
                    .split(|c: char| c == '/' || c == '?' || c == '#')
                    .next()
                    .unwrap_or_default();
                if first == locale.as_str() {
                    relative.to_string()
                } else if relative.is_empty() {
                    locale.clone()
                } else {
                    format!("{}/{}", locale, relative)
                }
            }
            None => relative.to_string(),
        };

        base.join(&relative).map_err(|e| E2eError::NavigationFailure {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Applies and reverts environment changes for a session
#[derive(Debug, Clone)]
pub struct EnvironmentController {
    navigation_timeout: Duration,
}

impl EnvironmentController {
    pub fn new(navigation_timeout: Duration) -> Self {
        Self { navigation_timeout }
    }

    pub async fn apply_viewport(&self, session: &mut Session, viewport: Viewport) -> E2eResult<()> {
        if viewport.width == 0 || viewport.height == 0 {
            return Err(E2eError::Config(format!("invalid viewport {}", viewport)));
        }

        session.page_mut().set_viewport(viewport).await?;
        let env = session.env_mut();
        env.viewport = viewport;
        info!(viewport = %viewport, layout = ?env.layout(), "viewport applied");
        Ok(())
    }

    pub async fn apply_network(&self, session: &mut Session, online: bool) -> E2eResult<()> {
        session.page_mut().set_offline(!online).await?;
        session.env_mut().online = online;
        info!(online, "network mode applied");
        Ok(())
    }

    /// Load `url` in the session's page. Viewport and network mode carry
    /// over; per-document observations are dropped.
    pub async fn navigate(&self, session: &mut Session, url: &str) -> E2eResult<String> {
        let target = session.env().resolve_url(url)?;
        debug!(url = %target, "navigating");

        session
            .page_mut()
            .goto(target.as_str(), self.navigation_timeout)
            .await
            .map_err(|e| match e {
                E2eError::NavigationFailure { .. } => e,
                other => E2eError::NavigationFailure {
                    url: target.to_string(),
                    reason: other.to_string(),
                },
            })?;

        if Url::parse(url).is_ok() {
            session.env_mut().base_url = target.origin().ascii_serialization();
        }
        session.navigated(target.to_string());
        Ok(target.to_string())
    }

    /// Restore viewport and connectivity to `initial`. Best effort: failures
    /// are logged, teardown continues.
    pub async fn revert(&self, session: &mut Session, initial: &EnvironmentState) {
        if session.is_closed() {
            return;
        }
        if session.env().online != initial.online {
            if let Err(e) = self.apply_network(session, initial.online).await {
                warn!("failed to restore network mode: {}", e);
            }
        }
        if session.env().viewport != initial.viewport {
            if let Err(e) = self.apply_viewport(session, initial.viewport).await {
                warn!("failed to restore viewport: {}", e);
            }
        }
    }
}
