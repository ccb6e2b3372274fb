//! Declarative YAML test suites
//!
//! A suite is an ordered list of UI steps; each step marshals to one
//! command against the in-browser dispatcher.

use serde::{Deserialize, Serialize};
use std::path::Path;

use windlass_common::{Command, Error, Locator, Result, Settings};

/// A complete test suite parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    /// Unique name for this suite
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering suites
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,
}

/// A single step in a suite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate the browser to a URL
    Open { url: String },

    /// Click the element the lookup resolves to
    Click {
        #[serde(flatten)]
        lookup: LookupSpec,
    },

    /// Wait for the current page to finish loading
    WaitForPageLoad {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for an element to exist
    WaitForElement {
        #[serde(flatten)]
        lookup: LookupSpec,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

/// Element lookup as written in YAML: exactly one strategy set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsid: Option<String>,
}

impl LookupSpec {
    /// Resolve to a locator, rejecting zero or multiple strategies
    pub fn to_locator(&self) -> Result<Locator> {
        let mut found: Vec<Locator> = Vec::new();
        if let Some(v) = &self.id {
            found.push(Locator::Id(v.clone()));
        }
        if let Some(v) = &self.name {
            found.push(Locator::Name(v.clone()));
        }
        if let Some(v) = &self.value {
            found.push(Locator::Value(v.clone()));
        }
        if let Some(v) = &self.classname {
            found.push(Locator::Classname(v.clone()));
        }
        if let Some(v) = &self.tagname {
            found.push(Locator::Tagname(v.clone()));
        }
        if let Some(v) = &self.jsid {
            found.push(Locator::Jsid(v.clone()));
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(Error::InvalidLocator("no lookup strategy given".into())),
            n => Err(Error::InvalidLocator(format!(
                "{} lookup strategies given, expected exactly one",
                n
            ))),
        }
    }
}

impl TestStep {
    /// Marshal this step into the command it asserts on
    pub fn to_command(&self, settings: &Settings) -> Result<Command> {
        let default_wait = settings.timeouts.default_wait_ms;
        match self {
            TestStep::Open { url } => Ok(Command::open(url.clone())),
            TestStep::Click { lookup } => Ok(Command::click(&lookup.to_locator()?)),
            TestStep::WaitForPageLoad { timeout_ms } => {
                Ok(Command::wait_for_page_load(timeout_ms.unwrap_or(default_wait)))
            }
            TestStep::WaitForElement { lookup, timeout_ms } => Ok(Command::wait_for_element(
                &lookup.to_locator()?,
                timeout_ms.unwrap_or(default_wait),
            )),
        }
    }
}

impl TestSuite {
    /// Parse a suite from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Suite(e.to_string()))
    }

    /// Parse a suite from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Suite(format!("{}: {}", path.display(), e)))
    }

    /// Load all suites under a path (file or directory), in path order
    pub fn load_all(path: &Path) -> Result<Vec<Self>> {
        if path.is_file() {
            return Ok(vec![Self::from_file(path)?]);
        }

        let mut entries: Vec<_> = walkdir::WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        entries.sort_by(|a, b| a.path().cmp(b.path()));

        let mut suites = Vec::new();
        for entry in entries {
            suites.push(Self::from_file(entry.path())?);
        }
        Ok(suites)
    }
}
