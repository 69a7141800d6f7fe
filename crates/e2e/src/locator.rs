//! Element descriptors and their resolution against the live document
//!
//! A descriptor is a closed set of lookup strategies plus an optional named
//! region. Resolution always narrows to the region first, then tries the
//! strategies in priority order (role, text, placeholder, selector) and
//! keeps the first one with matches. Nothing is cached between calls.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::driver::{Locator, Page, Query};
use crate::environment::{EnvironmentState, Layout};
use crate::error::{E2eError, E2eResult};

/// A named UI container, possibly rendered differently per layout.
///
/// Both variants of an adaptive control (floating dock, bottom tab bar) are
/// usually mounted at once; the region picks the one the current layout shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Selector used when no layout-specific one applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

impl Region {
    pub fn fixed(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            ..Default::default()
        }
    }

    pub fn adaptive(desktop: impl Into<String>, mobile: impl Into<String>) -> Self {
        Self {
            selector: None,
            desktop: Some(desktop.into()),
            mobile: Some(mobile.into()),
        }
    }

    pub fn selector_for(&self, layout: Layout) -> Option<&str> {
        let variant = match layout {
            Layout::Desktop => self.desktop.as_deref(),
            Layout::Mobile => self.mobile.as_deref(),
        };
        variant.or(self.selector.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.selector.is_none() && self.desktop.is_none() && self.mobile.is_none()
    }
}

pub type Regions = BTreeMap<String, Region>;

/// Which of several matches a step operates on.
///
/// `Only` is strict: more than one match is an error, never a silent
/// first-match. The other variants make expected multiplicity explicit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    #[default]
    Only,
    /// First match; the string records why several are expected
    First(String),
    Nth { index: usize, reason: String },
    /// Every match (assertions only)
    All,
}

/// Declarative element query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptor", into = "RawDescriptor")]
pub struct ElementDescriptor {
    /// Non-empty, sorted by [`Query::priority`], at most one per kind
    strategies: Vec<Query>,
    within: Option<String>,
    pick: Pick,
}

impl ElementDescriptor {
    pub fn new(query: Query) -> Self {
        Self {
            strategies: vec![query],
            within: None,
            pick: Pick::Only,
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self::new(Query::Role { role: role.into(), name: None })
    }

    pub fn role_named(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Query::Role {
            role: role.into(),
            name: Some(name.into()),
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Query::Text { text: text.into(), exact: true })
    }

    pub fn text_containing(text: impl Into<String>) -> Self {
        Self::new(Query::Text { text: text.into(), exact: false })
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::new(Query::Placeholder { text: text.into() })
    }

    pub fn selector(css: impl Into<String>) -> Self {
        Self::new(Query::Selector { css: css.into() })
    }

    /// Add another strategy. An existing strategy of the same kind is replaced.
    pub fn or(mut self, query: Query) -> Self {
        self.strategies.retain(|q| q.priority() != query.priority());
        self.strategies.push(query);
        self.strategies.sort_by_key(Query::priority);
        self
    }

    pub fn within(mut self, region: impl Into<String>) -> Self {
        self.within = Some(region.into());
        self
    }

    pub fn first(mut self, reason: impl Into<String>) -> Self {
        self.pick = Pick::First(reason.into());
        self
    }

    pub fn nth(mut self, index: usize, reason: impl Into<String>) -> Self {
        self.pick = Pick::Nth { index, reason: reason.into() };
        self
    }

    pub fn all(mut self) -> Self {
        self.pick = Pick::All;
        self
    }

    pub fn strategies(&self) -> &[Query] {
        &self.strategies
    }

    pub fn region(&self) -> Option<&str> {
        self.within.as_deref()
    }

    pub fn pick(&self) -> &Pick {
        &self.pick
    }
}

impl fmt::Display for ElementDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, query) in self.strategies.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", query)?;
        }
        if let Some(region) = &self.within {
            write!(f, " within {}", region)?;
        }
        match &self.pick {
            Pick::Only => Ok(()),
            Pick::First(_) => f.write_str(" (first)"),
            Pick::Nth { index, .. } => write!(f, " (nth {})", index),
            Pick::All => f.write_str(" (all)"),
        }
    }
}

/// YAML surface of a descriptor: one optional field per strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exact: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    within: Option<String>,
    /// `first: <why>` style maps rather than YAML tags
    #[serde(
        default,
        skip_serializing_if = "is_only",
        with = "serde_yaml::with::singleton_map"
    )]
    pick: Pick,
}

fn is_only(pick: &Pick) -> bool {
    matches!(pick, Pick::Only)
}

impl TryFrom<RawDescriptor> for ElementDescriptor {
    type Error = String;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        if raw.name.is_some() && raw.role.is_none() {
            return Err("`name` requires `role`".to_string());
        }
        if raw.exact.is_some() && raw.text.is_none() {
            return Err("`exact` requires `text`".to_string());
        }

        let mut strategies = Vec::new();
        if let Some(role) = raw.role {
            strategies.push(Query::Role { role, name: raw.name });
        }
        if let Some(text) = raw.text {
            strategies.push(Query::Text {
                text,
                exact: raw.exact.unwrap_or(true),
            });
        }
        if let Some(text) = raw.placeholder {
            strategies.push(Query::Placeholder { text });
        }
        if let Some(css) = raw.selector {
            strategies.push(Query::Selector { css });
        }
        if strategies.is_empty() {
            return Err("descriptor needs one of role, text, placeholder or selector".to_string());
        }

        Ok(Self {
            strategies,
            within: raw.within,
            pick: raw.pick,
        })
    }
}

impl From<ElementDescriptor> for RawDescriptor {
    fn from(d: ElementDescriptor) -> Self {
        let mut raw = RawDescriptor {
            within: d.within,
            pick: d.pick,
            ..Default::default()
        };
        for query in d.strategies {
            match query {
                Query::Role { role, name } => {
                    raw.role = Some(role);
                    raw.name = name;
                }
                Query::Text { text, exact } => {
                    raw.text = Some(text);
                    raw.exact = if exact { None } else { Some(false) };
                }
                Query::Placeholder { text } => raw.placeholder = Some(text),
                Query::Selector { css } => raw.selector = Some(css),
            }
        }
        raw
    }
}

/// Handle to an element that is re-queried on every use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    name: Option<String>,
    descriptor: ElementDescriptor,
}

impl ElementRef {
    pub fn named(name: impl Into<String>, descriptor: ElementDescriptor) -> Self {
        Self {
            name: Some(name.into()),
            descriptor,
        }
    }

    pub fn inline(descriptor: ElementDescriptor) -> Self {
        Self { name: None, descriptor }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn descriptor(&self) -> &ElementDescriptor {
        &self.descriptor
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "@{} ({})", name, self.descriptor),
            None => write!(f, "{}", self.descriptor),
        }
    }
}

/// Outcome of one resolution pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Strategy that matched, or the highest-priority one if none did
    pub locator: Locator,
    pub count: usize,
}

/// Maps descriptors to concrete locators for the session's current layout.
pub struct Resolver<'a> {
    regions: &'a Regions,
    env: &'a EnvironmentState,
}

impl<'a> Resolver<'a> {
    pub fn new(regions: &'a Regions, env: &'a EnvironmentState) -> Self {
        Self { regions, env }
    }

    /// Container selector for the descriptor's region under the current layout.
    pub fn scope(&self, descriptor: &ElementDescriptor) -> E2eResult<Option<String>> {
        let Some(name) = descriptor.region() else {
            return Ok(None);
        };
        let region = self
            .regions
            .get(name)
            .ok_or_else(|| E2eError::UnknownRegion(name.to_string()))?;
        let layout = self.env.layout();
        region
            .selector_for(layout)
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| {
                E2eError::UnknownRegion(format!(
                    "{} has no selector for the {:?} layout",
                    name, layout
                ))
            })
    }

    pub async fn resolve(
        &self,
        page: &dyn Page,
        descriptor: &ElementDescriptor,
    ) -> E2eResult<Resolution> {
        let scope = self.scope(descriptor)?;
        let mut fallback: Option<Locator> = None;

        for query in descriptor.strategies() {
            let locator = Locator {
                scope: scope.clone(),
                query: query.clone(),
            };
            let count = page.count(&locator).await?;
            if count > 0 {
                return Ok(Resolution { locator, count });
            }
            if fallback.is_none() {
                fallback = Some(locator);
            }
        }

        let locator = fallback.ok_or_else(|| {
            E2eError::SpecParse(format!("descriptor without strategies: {}", descriptor))
        })?;
        Ok(Resolution { locator, count: 0 })
    }

    /// Indices the descriptor's [`Pick`] selects from a resolution.
    ///
    /// Zero matches (or an out-of-range `Nth`) is `ElementNotFound`, which
    /// polls retry. Several matches under `Pick::Only` is `AmbiguousMatch`.
    pub fn select(
        descriptor: &ElementDescriptor,
        resolution: &Resolution,
    ) -> E2eResult<Vec<usize>> {
        let not_found = || E2eError::ElementNotFound {
            descriptor: descriptor.to_string(),
            elapsed_ms: 0,
        };
        if resolution.count == 0 {
            return Err(not_found());
        }

        match descriptor.pick() {
            Pick::Only if resolution.count > 1 => Err(E2eError::AmbiguousMatch {
                descriptor: descriptor.to_string(),
                count: resolution.count,
            }),
            Pick::Only | Pick::First(_) => Ok(vec![0]),
            Pick::Nth { index, .. } if *index < resolution.count => Ok(vec![*index]),
            Pick::Nth { .. } => Err(not_found()),
            Pick::All => Ok((0..resolution.count).collect()),
        }
    }
}
