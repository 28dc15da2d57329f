use serde::Serialize;
use std::collections::BTreeMap;

pub type DependencyMap = BTreeMap<String, DependencyNode>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyNode {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<DependencyMap>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_root_dep: bool,
}

impl DependencyNode {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            dependencies: None,
            is_root_dep: false,
        }
    }

    pub fn hoisted(version: impl Into<String>) -> Self {
        Self {
            is_root_dep: true,
            ..Self::new(version)
        }
    }

    pub fn with_dependencies(mut self, dependencies: DependencyMap) -> Self {
        self.dependencies = Some(dependencies);
        self
    }
}

/// Inserts `node` unless `name` is already present at this level.
pub fn insert_first(map: &mut DependencyMap, name: &str, node: DependencyNode) {
    map.entry(name.to_string()).or_insert(node);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependenciesResult {
    Tree(DependencyMap),
    /// The tool exited with a tolerated error; its output still needs a look.
    Raw { stdout: String },
}

impl DependenciesResult {
    pub fn tree(&self) -> Option<&DependencyMap> {
        match self {
            DependenciesResult::Tree(map) => Some(map),
            DependenciesResult::Raw { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExternalModuleSpec {
    pub name: String,
}

impl ExternalModuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
