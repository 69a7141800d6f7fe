//! Live connection to one document instance

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::driver::Page;
use crate::environment::EnvironmentState;
use crate::error::{E2eError, E2eResult};
use crate::locator::ElementDescriptor;

/// One session per scenario run, never shared.
///
/// Owns the page, the environment it was configured into, navigation
/// history and the named element references bound by `Locate` steps.
pub struct Session {
    id: Uuid,
    page: Box<dyn Page>,
    env: EnvironmentState,
    history: Vec<String>,
    refs: HashMap<String, ElementDescriptor>,
    /// Last match count seen per descriptor on the current document
    observed: HashMap<String, usize>,
    closed: bool,
}

impl Session {
    pub fn new(page: Box<dyn Page>, env: EnvironmentState) -> Self {
        Self {
            id: Uuid::new_v4(),
            page,
            env,
            history: Vec::new(),
            refs: HashMap::new(),
            observed: HashMap::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn page(&self) -> &dyn Page {
        self.page.as_ref()
    }

    pub fn page_mut(&mut self) -> &mut dyn Page {
        self.page.as_mut()
    }

    pub fn env(&self) -> &EnvironmentState {
        &self.env
    }

    pub(crate) fn env_mut(&mut self) -> &mut EnvironmentState {
        &mut self.env
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Record a completed navigation and drop per-document observations.
    pub(crate) fn navigated(&mut self, url: String) {
        self.history.push(url);
        self.observed.clear();
    }

    /// Bind a name to a descriptor. The reference stays lazy: nothing about
    /// the current document is cached.
    pub fn bind(&mut self, name: &str, descriptor: ElementDescriptor) {
        if self.refs.insert(name.to_string(), descriptor).is_some() {
            debug!(name, "rebinding element reference");
        }
    }

    pub fn lookup(&self, name: &str) -> E2eResult<&ElementDescriptor> {
        self.refs
            .get(name)
            .ok_or_else(|| E2eError::UnknownRef(name.to_string()))
    }

    pub(crate) fn observe(&mut self, descriptor: &ElementDescriptor, count: usize) {
        self.observed.insert(descriptor.to_string(), count);
    }

    pub fn last_observed(&self, descriptor: &ElementDescriptor) -> Option<usize> {
        self.observed.get(&descriptor.to_string()).copied()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the underlying page. Only the first call reaches the engine.
    pub async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.refs.clear();
        self.observed.clear();
        if let Err(e) = self.page.close().await {
            warn!(session = %self.id, "page close failed: {}", e);
            return Err(e);
        }
        debug!(session = %self.id, "session closed");
        Ok(())
    }
}
