//! Projects, impacted sets and job payloads.

use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named unit of work with dependency edges to other projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub name: String,
    /// Projects that must run before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: vec![],
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Project configuration as loaded from a `projects.yaml` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProjectsFile {
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl ProjectsFile {
    /// Load project configuration from a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| Error::InvalidProject(e.to_string()))
    }
}

/// Projects requiring execution in one scheduling run, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImpactedSet {
    projects: BTreeMap<String, Project>,
}

impl ImpactedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, project: Project) {
        self.projects.insert(project.name.clone(), project);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Project> {
        self.projects.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

impl FromIterator<Project> for ImpactedSet {
    fn from_iter<T: IntoIterator<Item = Project>>(iter: T) -> Self {
        let mut set = Self::new();
        for project in iter {
            set.insert(project);
        }
        set
    }
}

/// Opaque serialized execution directive for one project.
///
/// The scheduler never inspects the bytes; they are copied into every job
/// materialized for the project and handed to the executor on dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobPayload(Vec<u8>);

impl JobPayload {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Serialize a JSON document into a payload.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        Ok(Self(serde_json::to_vec(value)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload as text, for executors that only accept string inputs.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.0)
            .map_err(|e| Error::Serialization(format!("payload is not valid UTF-8: {e}")))
    }
}

/// Payloads supplied by the planner, keyed by project name.
pub type PayloadMap = BTreeMap<String, JobPayload>;
