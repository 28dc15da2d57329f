use crate::{PackError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackagerKind {
    #[default]
    Npm,
    Yarn,
    Pnpm,
}

impl PackagerKind {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "npm" => Some(PackagerKind::Npm),
            "yarn" => Some(PackagerKind::Yarn),
            "pnpm" => Some(PackagerKind::Pnpm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackagerKind::Npm => "npm",
            PackagerKind::Yarn => "yarn",
            PackagerKind::Pnpm => "pnpm",
        }
    }
}

impl fmt::Display for PackagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Aws,
    Google,
    Scaleway,
    Other(String),
}

impl Platform {
    pub fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "aws" => Platform::Aws,
            "google" => Platform::Google,
            "scaleway" => Platform::Scaleway,
            other => Platform::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Platform::Aws => "aws",
            Platform::Google => "google",
            Platform::Scaleway => "scaleway",
            Platform::Other(name) => name,
        }
    }

    /// Platforms that run the package manager themselves at deploy time. They
    /// need the manifest and lockfile and never get `node_modules` from us.
    pub fn auto_installs_dependencies(&self) -> bool {
        matches!(self, Platform::Google | Platform::Scaleway)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Platform::from_str(&value))
    }
}

impl Serialize for Platform {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleFormat {
    Esm,
    #[default]
    Cjs,
}

/// Accepts either a single string or a list, as hosts write both.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

fn default_exclude() -> Vec<String> {
    vec!["aws-sdk".to_string()]
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".serverless")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackConfig {
    pub packager: PackagerKind,
    pub external: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub exclude: Vec<String>,
    pub platform: Platform,
    pub individually: bool,
    pub install_extra_args: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub scripts: Vec<String>,
    pub native_zip: bool,
    pub format: BundleFormat,
    pub concurrency: usize,
    pub package_path: Option<PathBuf>,
    pub no_install: bool,
    pub allow_lockfile_updates: bool,
    pub artifact_dir: PathBuf,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            packager: PackagerKind::default(),
            external: Vec::new(),
            exclude: default_exclude(),
            platform: Platform::default(),
            individually: false,
            install_extra_args: Vec::new(),
            scripts: Vec::new(),
            native_zip: false,
            format: BundleFormat::default(),
            concurrency: default_concurrency(),
            package_path: None,
            no_install: false,
            allow_lockfile_updates: false,
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl PackConfig {
    /// Loads a YAML (`.yaml`/`.yml`) or JSON config file, then applies
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|source| PackError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        let config: PackConfig = if is_yaml {
            serde_yaml::from_str(&data).map_err(|source| PackError::ParseYaml {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            serde_json::from_str(&data).map_err(|source| PackError::ParseJson {
                path: path.to_path_buf(),
                source,
            })?
        };

        config.with_env()
    }

    pub fn from_env() -> Result<Self> {
        PackConfig::default().with_env()
    }

    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(value) = env::var("FNPACK_PACKAGER") {
            self.packager = PackagerKind::from_str(&value)
                .ok_or_else(|| PackError::UnknownPackager { name: value.clone() })?;
        }

        if let Some(value) = read_bool_env("FNPACK_INDIVIDUALLY") {
            self.individually = value;
        }

        if let Some(value) = read_bool_env("FNPACK_NATIVE_ZIP") {
            self.native_zip = value;
        }

        if let Ok(value) = env::var("FNPACK_CONCURRENCY") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                self.concurrency = trimmed.parse::<usize>().map_err(|_| PackError::Config {
                    reason: format!("FNPACK_CONCURRENCY must be a positive integer, got {trimmed:?}"),
                })?;
            }
        }

        if let Ok(value) = env::var("FNPACK_PLATFORM") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                self.platform = Platform::from_str(trimmed);
            }
        }

        Ok(self)
    }

    pub fn excludes_everything(&self) -> bool {
        self.exclude.iter().any(|name| name == "*")
    }

    /// `external` minus `exclude`; empty when `exclude` holds the wildcard.
    pub fn externals(&self) -> Vec<String> {
        if self.excludes_everything() {
            return Vec::new();
        }

        let mut externals = Vec::new();

        for name in &self.external {
            if !self.exclude.contains(name) && !externals.contains(name) {
                externals.push(name.clone());
            }
        }

        externals
    }

    pub fn is_esm(&self) -> bool {
        matches!(self.format, BundleFormat::Esm)
    }
}

fn read_bool_env(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
