use fnpack_archive::ArchiveError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Failed to read file {path:?}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path:?}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse JSON in {path:?}: {source}")]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to parse YAML in {path:?}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize JSON for {path:?}: {reason}")]
    SerializeJson { path: PathBuf, reason: String },

    #[error("Failed to parse bundle {path:?}: {reason}")]
    ParseBundle { path: PathBuf, reason: String },

    #[error("Failed to parse {tool} dependency tree: {reason}")]
    ParseTree { tool: String, reason: String },

    #[error("package.json not found (searched from {path:?})")]
    ManifestMissing { path: PathBuf },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Unknown packager {name:?}; expected npm, yarn or pnpm")]
    UnknownPackager { name: String },

    #[error("Packaging failed: no files found to package for {unit}")]
    EmptyPackage { unit: String },

    #[error("Packaging failed: cannot package functions individually on the {platform} platform")]
    IndividualUnsupported { platform: String },

    #[error("Runtime dependencies found only in devDependencies: {}", names.join(", "))]
    DevDependencies { names: Vec<String> },

    #[error("Failed to run {command}: {reason}")]
    ToolSpawn { command: String, reason: String },

    #[error("{command} exited with code {code}: {stderr}")]
    ToolFailed {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Script {name} failed with exit code {code}\n{output}")]
    ScriptFailed {
        name: String,
        code: i32,
        output: String,
    },

    #[error("Failed to write archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        source: ArchiveError,
    },

    #[error("Background task failed: {reason}")]
    Task { reason: String },
}
