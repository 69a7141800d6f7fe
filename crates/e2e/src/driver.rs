//! Rendering engine capability interface
//!
//! The scenario engine never talks to a browser directly. Everything it needs
//! from the rendering engine goes through [`Driver`] and [`Page`]: open a
//! session, navigate, count and inspect elements for a [`Locator`], dispatch
//! input, change the viewport or connectivity, capture a bitmap, close.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// Browser viewport size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport { width: 1280, height: 720 }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single lookup strategy understood by the rendering engine.
///
/// Variants are declared in resolution priority order; see [`Query::priority`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// ARIA role, optionally filtered by exact accessible name
    Role { role: String, name: Option<String> },
    /// Visible text, exact or substring
    Text { text: String, exact: bool },
    /// Input/textarea placeholder text
    Placeholder { text: String },
    /// Structural CSS selector
    Selector { css: String },
}

impl Query {
    /// Lower values are tried first.
    pub fn priority(&self) -> u8 {
        match self {
            Query::Role { .. } => 0,
            Query::Text { .. } => 1,
            Query::Placeholder { .. } => 2,
            Query::Selector { .. } => 3,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Role { role, name: Some(name) } => write!(f, "role={}[name={:?}]", role, name),
            Query::Role { role, name: None } => write!(f, "role={}", role),
            Query::Text { text, exact: true } => write!(f, "text={:?}", text),
            Query::Text { text, exact: false } => write!(f, "text~={:?}", text),
            Query::Placeholder { text } => write!(f, "placeholder={:?}", text),
            Query::Selector { css } => write!(f, "css={}", css),
        }
    }
}

/// Concrete query handed to the engine: one strategy, optionally narrowed to
/// a container selector. Carries no node identity, so every use re-queries
/// the live document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub scope: Option<String>,
    pub query: Query,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{} >> {}", scope, self.query),
            None => write!(f, "{}", self.query),
        }
    }
}

/// Something that can open isolated document sessions.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Open a fresh browser-context-equivalent session with one page.
    async fn open_page(&self, viewport: Viewport) -> E2eResult<Box<dyn Page>>;
}

/// One live document owned by exactly one session.
///
/// Element-level operations address the `index`-th match of a locator at the
/// time of the call.
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&mut self, url: &str, timeout: Duration) -> E2eResult<()>;

    async fn count(&self, locator: &Locator) -> E2eResult<usize>;

    async fn is_visible(&self, locator: &Locator, index: usize) -> E2eResult<bool>;

    async fn click(&mut self, locator: &Locator, index: usize) -> E2eResult<()>;

    async fn fill(&mut self, locator: &Locator, index: usize, text: &str) -> E2eResult<()>;

    async fn set_input_files(
        &mut self,
        locator: &Locator,
        index: usize,
        path: &Path,
    ) -> E2eResult<()>;

    /// Press a key chord, on an element if given, otherwise on the page.
    async fn press(&mut self, target: Option<(&Locator, usize)>, key: &str) -> E2eResult<()>;

    async fn set_viewport(&mut self, viewport: Viewport) -> E2eResult<()>;

    async fn set_offline(&mut self, offline: bool) -> E2eResult<()>;

    /// PNG bytes of the current viewport
    async fn screenshot(&self) -> E2eResult<Vec<u8>>;

    async fn close(&mut self) -> E2eResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_priority_order() {
        let mut queries = vec![
            Query::Selector { css: "input".into() },
            Query::Placeholder { text: "Type".into() },
            Query::Text { text: "Shelf".into(), exact: true },
            Query::Role { role: "button".into(), name: None },
        ];
        queries.sort_by_key(Query::priority);
        assert!(matches!(queries[0], Query::Role { .. }));
        assert!(matches!(queries[3], Query::Selector { .. }));
    }

    #[test]
    fn test_locator_display() {
        let locator = Locator {
            scope: Some(".fixed.bottom-0".into()),
            query: Query::Text { text: "Shelf".into(), exact: true },
        };
        assert_eq!(locator.to_string(), ".fixed.bottom-0 >> text=\"Shelf\"");
    }
}
