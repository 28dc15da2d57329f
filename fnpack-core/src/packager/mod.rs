use crate::config::PackagerKind;
use crate::console::Reporter;
use crate::dependency::{DependenciesResult, DependencyMap};
use crate::process::{CommandSpec, Executor, tool_program};
use crate::{PackError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;

pub mod npm;
pub mod pnpm;
pub mod tree;
pub mod yarn;

pub use npm::Npm;
pub use pnpm::Pnpm;
pub use yarn::Yarn;

/// One package manager behind the shared listing/install contract.
#[async_trait]
pub trait Packager: Send + Sync {
    fn kind(&self) -> PackagerKind;

    fn lockfile_name(&self) -> &'static str;

    /// Top-level manifest sections copied into the staging manifest.
    fn copy_package_section_names(&self) -> &'static [&'static str];

    /// `false` when the tool may lay `node_modules` out with links that have
    /// to be dereferenced when collecting files.
    fn must_copy_modules(&self) -> bool;

    async fn get_prod_dependencies(
        &self,
        cwd: &Path,
        depth: Option<usize>,
    ) -> Result<DependenciesResult>;

    /// Turns the tool's listing output into the unified dependency map.
    fn normalize(&self, stdout: &str, cwd: &Path) -> Result<DependencyMap>;

    async fn install(&self, cwd: &Path, extra_args: &[String], use_lockfile: bool) -> Result<()>;

    async fn prune(&self, cwd: &Path) -> Result<()>;

    fn rebase_lockfile(&self, path_to_root: &str, lockfile: &str) -> Result<String>;

    async fn run_scripts(&self, cwd: &Path, scripts: &[String]) -> Result<()>;
}

pub fn packager_for(
    kind: PackagerKind,
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn Reporter>,
) -> Box<dyn Packager> {
    match kind {
        PackagerKind::Npm => Box::new(Npm::new(executor, reporter)),
        PackagerKind::Yarn => Box::new(Yarn::new(executor, reporter)),
        PackagerKind::Pnpm => Box::new(Pnpm::new(executor, reporter)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Benign {
    Quiet,
    Logged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Listing {
    Complete(String),
    Tolerated(String),
}

/// Runs a listing command. A failed run still counts when it printed output
/// and every stderr line is a known-benign complaint.
pub(crate) async fn run_listing(
    executor: &dyn Executor,
    reporter: &dyn Reporter,
    command: &CommandSpec,
    cwd: &Path,
    classify: fn(&str) -> Option<Benign>,
) -> Result<Listing> {
    match executor.run(command, cwd).await {
        Ok(output) => Ok(Listing::Complete(output.stdout)),
        Err(PackError::ToolFailed {
            command: failed,
            code,
            stdout,
            stderr,
        }) => {
            let mut logged = BTreeSet::new();
            let mut fatal = false;

            for line in stderr.lines().map(str::trim).filter(|line| !line.is_empty()) {
                match classify(line) {
                    Some(Benign::Quiet) => {}
                    Some(Benign::Logged) => {
                        logged.insert(line.to_string());
                    }
                    None => {
                        fatal = true;
                        break;
                    }
                }
            }

            if fatal || stdout.trim().is_empty() {
                return Err(PackError::ToolFailed {
                    command: failed,
                    code,
                    stdout,
                    stderr,
                });
            }

            for line in logged {
                reporter.warn(&line);
            }

            reporter.verbose(&format!(
                "{} exited with code {} but produced output; continuing",
                failed, code
            ));

            Ok(Listing::Tolerated(stdout))
        }
        Err(other) => Err(other),
    }
}

pub(crate) async fn run_tool(
    executor: &dyn Executor,
    reporter: &dyn Reporter,
    command: &CommandSpec,
    cwd: &Path,
) -> Result<()> {
    reporter.verbose(&format!("{} (in {})", command, cwd.display()));
    executor.run(command, cwd).await?;
    Ok(())
}

/// Spawns `<tool> run <script>` for every script at once.
pub(crate) async fn run_scripts_parallel(
    executor: &dyn Executor,
    tool: &str,
    cwd: &Path,
    scripts: &[String],
) -> Result<()> {
    let commands: Vec<(String, CommandSpec)> = scripts
        .iter()
        .map(|script| {
            (
                script.clone(),
                CommandSpec::new(tool_program(tool), ["run", script.as_str()]),
            )
        })
        .collect();

    let runs = commands
        .iter()
        .map(|(_, command)| executor.run(command, cwd));
    let results = join_all(runs).await;

    for ((script, _), result) in commands.into_iter().zip(results) {
        match result {
            Ok(_) => {}
            Err(PackError::ToolFailed {
                code,
                stdout,
                stderr,
                ..
            }) => {
                let output = [stdout.trim(), stderr.trim()]
                    .into_iter()
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");

                return Err(PackError::ScriptFailed {
                    name: script,
                    code,
                    output,
                });
            }
            Err(other) => return Err(other),
        }
    }

    Ok(())
}

/// Caches the major version reported by `<tool> --version`.
#[derive(Debug, Default)]
pub(crate) struct VersionProbe {
    major: OnceCell<u64>,
}

impl VersionProbe {
    pub(crate) async fn major(
        &self,
        executor: &dyn Executor,
        tool: &str,
        cwd: &Path,
        fallback: u64,
    ) -> u64 {
        *self
            .major
            .get_or_init(|| async {
                let command = CommandSpec::new(tool_program(tool), ["--version"]);
                executor
                    .run(&command, cwd)
                    .await
                    .ok()
                    .and_then(|output| parse_major(&output.stdout))
                    .unwrap_or(fallback)
            })
            .await
    }
}

pub(crate) fn parse_major(output: &str) -> Option<u64> {
    let trimmed = output.trim().trim_start_matches('v');

    if let Ok(version) = semver::Version::parse(trimmed) {
        return Some(version.major);
    }

    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Joins `relative` onto `base` and folds `.`/`..` segments, using `/`.
pub fn join_relative(base: &str, relative: &str) -> String {
    let absolute = base.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in base.split(['/', '\\']).chain(relative.split(['/', '\\'])) {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");

    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else if joined.starts_with("..") {
        joined
    } else {
        format!("./{}", joined)
    }
}

/// Rebases a `file:./…` or `file:../…` specifier; anything else is left alone.
pub fn rebase_file_reference(path_to_root: &str, value: &str) -> Option<String> {
    let reference = value.strip_prefix("file:")?;

    if !(reference.starts_with("./") || reference.starts_with("../")) {
        return None;
    }

    Some(format!("file:{}", join_relative(path_to_root, reference)))
}

fn file_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"file:(\.\.?/[^"'\s,:]*)"#).expect("valid file reference regex")
    })
}

/// Rebases every `file:` reference inside a text lockfile.
pub fn rebase_file_references_in_text(path_to_root: &str, text: &str) -> String {
    file_reference_pattern()
        .replace_all(text, |captures: &Captures<'_>| {
            format!("file:{}", join_relative(path_to_root, &captures[1]))
        })
        .into_owned()
}
