//! Declarative YAML scenario specification

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::driver::Viewport;
use crate::error::{E2eError, E2eResult};
use crate::fixtures::FixtureKind;
use crate::locator::{ElementDescriptor, Pick, Regions};

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Overrides the harness locale prefix
    #[serde(default)]
    pub locale: Option<String>,

    /// Initial viewport; the harness default when absent
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Named containers descriptors can be scoped to
    #[serde(default)]
    pub regions: Regions,

    /// Wall-clock budget for the whole run
    #[serde(default)]
    pub budget_ms: Option<u64>,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

/// What a step acts on: a name bound by `locate`, or an inline descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Ref(String),
    Descriptor(ElementDescriptor),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Ref(name) => write!(f, "@{}", name),
            Target::Descriptor(d) => write!(f, "{}", d),
        }
    }
}

/// File handed to an upload step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadSource {
    /// Synthesized into the run's fixture namespace
    Fixture(FixtureKind),
    Path(PathBuf),
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative to base URL and locale)
    Navigate { url: String },

    SetViewport { width: u32, height: u32 },

    SetNetwork { online: bool },

    /// Bind a name to a descriptor for later steps
    Locate { name: String, descriptor: ElementDescriptor },

    AssertVisible {
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    AssertHidden {
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Click {
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Fill {
        target: Target,
        text: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    UploadFile {
        target: Target,
        file: UploadSource,
        /// Post-upload state to wait for
        #[serde(default)]
        expect: Option<Target>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Press a key chord, on the target or the page
    Press {
        key: String,
        #[serde(default)]
        target: Option<Target>,
        /// Bound for the target to become actionable
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Take a checkpoint screenshot
    Capture { label: String },
}

impl Step {
    /// Short description for logs and reports
    pub fn name(&self) -> String {
        match self {
            Step::Navigate { url } => format!("navigate:{}", url),
            Step::SetViewport { width, height } => format!("set_viewport:{}x{}", width, height),
            Step::SetNetwork { online } => {
                format!("set_network:{}", if *online { "online" } else { "offline" })
            }
            Step::Locate { name, .. } => format!("locate:{}", name),
            Step::AssertVisible { target, .. } => format!("assert_visible:{}", target),
            Step::AssertHidden { target, .. } => format!("assert_hidden:{}", target),
            Step::Click { target, .. } => format!("click:{}", target),
            Step::Fill { target, .. } => format!("fill:{}", target),
            Step::UploadFile { target, .. } => format!("upload_file:{}", target),
            Step::Press { key, .. } => format!("press:{}", key),
            Step::Capture { label } => format!("capture:{}", label),
        }
    }

    /// Targets this step interacts with, as opposed to only observes
    fn actions(&self) -> Vec<&Target> {
        match self {
            Step::Click { target, .. }
            | Step::Fill { target, .. }
            | Step::UploadFile { target, .. } => vec![target],
            Step::Press { target: Some(target), .. } => vec![target],
            _ => Vec::new(),
        }
    }

    fn targets(&self) -> Vec<&Target> {
        match self {
            Step::AssertVisible { target, .. } | Step::AssertHidden { target, .. } => vec![target],
            Step::UploadFile { target, expect, .. } => {
                std::iter::once(target).chain(expect.as_ref()).collect()
            }
            _ => self.actions(),
        }
    }
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, in file-name order
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Static checks: refs bound before use, regions declared, no
    /// `pick: all` on an interaction.
    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("scenario name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(E2eError::SpecParse(format!("{}: no steps", self.name)));
        }
        for (name, region) in &self.regions {
            if region.is_empty() {
                return Err(E2eError::SpecParse(format!("region '{}' has no selector", name)));
            }
        }

        let mut bound: HashMap<&str, &ElementDescriptor> = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            if let Step::Locate { name, descriptor } = step {
                self.check_region(descriptor)?;
                bound.insert(name.as_str(), descriptor);
                continue;
            }

            for target in step.targets() {
                match target {
                    Target::Ref(name) => {
                        if !bound.contains_key(name.as_str()) {
                            return Err(E2eError::UnknownRef(format!("{} (step {})", name, index)));
                        }
                    }
                    Target::Descriptor(d) => self.check_region(d)?,
                }
            }

            for target in step.actions() {
                let descriptor = match target {
                    Target::Ref(name) => bound.get(name.as_str()).copied(),
                    Target::Descriptor(d) => Some(d),
                };
                if descriptor.map_or(false, |d| matches!(d.pick(), Pick::All)) {
                    return Err(E2eError::SpecParse(format!(
                        "step {} ({}): `pick: all` only applies to assertions",
                        index,
                        step.name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_region(&self, descriptor: &ElementDescriptor) -> E2eResult<()> {
        match descriptor.region() {
            Some(region) if !self.regions.contains_key(region) => {
                Err(E2eError::UnknownRegion(region.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_adaptive_scenario() {
        let yaml = r#"
name: adaptive-ui
description: Dock on desktop, tab bar and drawer on mobile
tags: [layout, smoke]
regions:
  nav:
    desktop: ".fixed.bottom-6"
    mobile: ".fixed.bottom-0"
steps:
  - action: navigate
    url: /tools/ai
  - action: assert_visible
    target: { role: heading, name: AI Magic }
    timeout_ms: 30000
  - action: set_viewport
    width: 375
    height: 812
  - action: locate
    name: shelf
    descriptor: { text: Shelf, within: nav }
  - action: click
    target: shelf
  - action: assert_visible
    target: { text: Global File Shelf }
  - action: capture
    label: mobile-drawer
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.name, "adaptive-ui");
        assert_eq!(scenario.steps.len(), 7);
        assert!(matches!(
            &scenario.steps[4],
            Step::Click { target: Target::Ref(n), .. } if n == "shelf"
        ));
        assert_eq!(scenario.steps[2].name(), "set_viewport:375x812");
    }

    #[test]
    fn test_parse_upload_step() {
        let yaml = r#"
name: audio-upload
steps:
  - action: navigate
    url: /tools/audio
  - action: upload_file
    target: { selector: "input[type='file']" }
    file: { fixture: audio }
    expect: { text: test.mp3 }
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        match &scenario.steps[1] {
            Step::UploadFile { file, expect, .. } => {
                assert_eq!(file, &UploadSource::Fixture(FixtureKind::Audio));
                assert!(expect.is_some());
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_parse_targeted_press_with_bound() {
        let yaml = r#"
name: palette-close
steps:
  - action: press
    key: Escape
    target: { placeholder: Search }
    timeout_ms: 750
  - action: press
    key: Control+k
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert!(matches!(
            &scenario.steps[0],
            Step::Press { target: Some(_), timeout_ms: Some(750), .. }
        ));
        assert!(matches!(
            &scenario.steps[1],
            Step::Press { target: None, timeout_ms: None, .. }
        ));
        assert_eq!(scenario.steps[1].name(), "press:Control+k");
    }

    #[test]
    fn test_ref_before_locate_is_rejected() {
        let yaml = r#"
name: bad-ref
steps:
  - action: click
    target: shelf
"#;
        assert!(matches!(Scenario::from_yaml(yaml), Err(E2eError::UnknownRef(_))));
    }

    #[test]
    fn test_undeclared_region_is_rejected() {
        let yaml = r#"
name: bad-region
steps:
  - action: assert_visible
    target: { text: Shelf, within: sidebar }
"#;
        assert!(matches!(Scenario::from_yaml(yaml), Err(E2eError::UnknownRegion(_))));
    }

    #[test]
    fn test_pick_all_on_click_is_rejected() {
        let yaml = r#"
name: bad-pick
steps:
  - action: click
    target: { text: Shelf, pick: all }
"#;
        assert!(matches!(Scenario::from_yaml(yaml), Err(E2eError::SpecParse(_))));
    }

    #[test]
    fn test_filter_by_tag() {
        let steps = "steps:\n  - action: capture\n    label: x\n";
        let a = Scenario::from_yaml(&format!("name: a\ntags: [smoke]\n{}", steps)).unwrap();
        let b = Scenario::from_yaml(&format!("name: b\n{}", steps)).unwrap();
        let all = vec![a, b];
        let smoke = Scenario::filter_by_tag(&all, "smoke");
        assert_eq!(smoke.len(), 1);
        assert_eq!(smoke[0].name, "a");
    }
}
