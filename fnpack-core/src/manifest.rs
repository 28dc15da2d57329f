use crate::{PackError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDependencyMeta {
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub peer_dependencies_meta: BTreeMap<String, PeerDependencyMeta>,
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl Manifest {
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|source| PackError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&data).map_err(|source| PackError::ParseJson {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Peer dependencies that are not marked optional.
    pub fn required_peers(&self) -> Vec<String> {
        self.peer_dependencies
            .keys()
            .filter(|name| {
                !self
                    .peer_dependencies_meta
                    .get(*name)
                    .map(|meta| meta.optional)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

/// Walks up from `start` until a `package.json` is found.
pub fn find_manifest(start: &Path) -> Result<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        let candidate = dir.join("package.json");
        if candidate.is_file() {
            return Ok(candidate);
        }
        current = dir.parent();
    }

    Err(PackError::ManifestMissing {
        path: start.to_path_buf(),
    })
}

/// The manifest written into the staging directory before install.
#[derive(Debug, Clone, Serialize)]
pub struct StagingManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub private: bool,
    pub dependencies: BTreeMap<String, String>,
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl StagingManifest {
    pub fn new(service: &str) -> Self {
        Self {
            name: service.to_string(),
            version: "1.0.0".to_string(),
            description: format!("Packaged externals for {}", service),
            private: true,
            dependencies: BTreeMap::new(),
            sections: Map::new(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let data =
            serde_json::to_string_pretty(self).map_err(|error| PackError::SerializeJson {
                path: path.to_path_buf(),
                reason: error.to_string(),
            })?;

        fs::write(path, data).map_err(|source| PackError::WriteFile {
            path: path.to_path_buf(),
            source,
        })
    }
}
