use super::tree::{PathTreeNode, normalize_root};
use super::{
    Benign, Listing, Packager, VersionProbe, rebase_file_reference, run_listing,
    run_scripts_parallel, run_tool,
};
use crate::config::PackagerKind;
use crate::console::Reporter;
use crate::dependency::{DependenciesResult, DependencyMap};
use crate::process::{CommandSpec, Executor, tool_program};
use crate::{PackError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TOOL: &str = "npm";
const MODERN_MAJOR: u64 = 7;

#[derive(Debug, Deserialize)]
struct NpmListing {
    path: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, PathTreeNode>,
}

pub struct Npm {
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn Reporter>,
    version: VersionProbe,
}

impl Npm {
    pub fn new(executor: Arc<dyn Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            executor,
            reporter,
            version: VersionProbe::default(),
        }
    }
}

pub fn list_command(major: u64, depth: Option<usize>) -> CommandSpec {
    let mut args: Vec<String> = if major >= MODERN_MAJOR {
        vec!["ls", "--json", "--omit=dev", "--long"]
            .into_iter()
            .map(String::from)
            .collect()
    } else {
        vec!["ls", "-json", "-prod", "-long"]
            .into_iter()
            .map(String::from)
            .collect()
    };

    match (depth, major >= MODERN_MAJOR) {
        (Some(depth), true) => args.push(format!("--depth={}", depth)),
        (None, true) => args.push("--all".to_string()),
        (Some(depth), false) => args.push(format!("-depth={}", depth)),
        (None, false) => {}
    }

    CommandSpec::new(tool_program(TOOL), args)
}

pub fn install_command(extra_args: &[String], use_lockfile: bool) -> CommandSpec {
    let verb = if use_lockfile { "ci" } else { "install" };
    let args = std::iter::once(verb.to_string()).chain(extra_args.iter().cloned());

    CommandSpec::new(tool_program(TOOL), args)
}

pub fn prune_command() -> CommandSpec {
    CommandSpec::new(tool_program(TOOL), ["prune"])
}

pub(crate) fn classify_stderr(line: &str) -> Option<Benign> {
    let rest = line
        .strip_prefix("npm ERR!")
        .or_else(|| line.strip_prefix("npm error"))?
        .trim_start();

    if rest.starts_with("peer dep missing") {
        return Some(Benign::Logged);
    }

    // Trailer npm prints after every failure, pointing at its debug log.
    if rest.is_empty() || rest.ends_with(".log") {
        return Some(Benign::Quiet);
    }

    [
        "code ELSPROBLEMS",
        "extraneous",
        "missing",
        "invalid",
        "A complete log of this run",
        "Log files were not written",
    ]
    .iter()
    .any(|pattern| rest.starts_with(pattern))
    .then_some(Benign::Quiet)
}

pub fn normalize_listing(stdout: &str, cwd: &Path) -> Result<DependencyMap> {
    if stdout.trim().is_empty() {
        return Err(PackError::ParseTree {
            tool: TOOL.to_string(),
            reason: "no output".to_string(),
        });
    }

    let listing: NpmListing =
        serde_json::from_str(stdout).map_err(|error| PackError::ParseTree {
            tool: TOOL.to_string(),
            reason: error.to_string(),
        })?;

    let project = listing
        .path
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.to_path_buf());

    Ok(normalize_root(
        &listing.dependencies,
        &project.join("node_modules"),
    ))
}

fn rebase_value(path_to_root: &str, value: &mut Value) {
    match value {
        Value::String(text) => {
            if let Some(rebased) = rebase_file_reference(path_to_root, text) {
                *text = rebased;
            }
        }
        Value::Array(items) => {
            for item in items {
                rebase_value(path_to_root, item);
            }
        }
        Value::Object(entries) => {
            for (_, item) in entries.iter_mut() {
                rebase_value(path_to_root, item);
            }
        }
        _ => {}
    }
}

#[async_trait]
impl Packager for Npm {
    fn kind(&self) -> PackagerKind {
        PackagerKind::Npm
    }

    fn lockfile_name(&self) -> &'static str {
        "package-lock.json"
    }

    fn copy_package_section_names(&self) -> &'static [&'static str] {
        &[]
    }

    fn must_copy_modules(&self) -> bool {
        true
    }

    async fn get_prod_dependencies(
        &self,
        cwd: &Path,
        depth: Option<usize>,
    ) -> Result<DependenciesResult> {
        let major = self
            .version
            .major(self.executor.as_ref(), TOOL, cwd, MODERN_MAJOR)
            .await;
        let command = list_command(major, depth);

        match run_listing(
            self.executor.as_ref(),
            self.reporter.as_ref(),
            &command,
            cwd,
            classify_stderr,
        )
        .await?
        {
            Listing::Complete(stdout) => Ok(DependenciesResult::Tree(self.normalize(&stdout, cwd)?)),
            Listing::Tolerated(stdout) => Ok(DependenciesResult::Raw { stdout }),
        }
    }

    fn normalize(&self, stdout: &str, cwd: &Path) -> Result<DependencyMap> {
        normalize_listing(stdout, cwd)
    }

    async fn install(&self, cwd: &Path, extra_args: &[String], use_lockfile: bool) -> Result<()> {
        let command = install_command(extra_args, use_lockfile);
        run_tool(self.executor.as_ref(), self.reporter.as_ref(), &command, cwd).await
    }

    async fn prune(&self, cwd: &Path) -> Result<()> {
        run_tool(
            self.executor.as_ref(),
            self.reporter.as_ref(),
            &prune_command(),
            cwd,
        )
        .await
    }

    fn rebase_lockfile(&self, path_to_root: &str, lockfile: &str) -> Result<String> {
        let mut value: Value =
            serde_json::from_str(lockfile).map_err(|error| PackError::ParseTree {
                tool: TOOL.to_string(),
                reason: format!("lockfile: {}", error),
            })?;

        rebase_value(path_to_root, &mut value);

        serde_json::to_string_pretty(&value).map_err(|error| PackError::ParseTree {
            tool: TOOL.to_string(),
            reason: format!("lockfile: {}", error),
        })
    }

    async fn run_scripts(&self, cwd: &Path, scripts: &[String]) -> Result<()> {
        run_scripts_parallel(self.executor.as_ref(), TOOL, cwd, scripts).await
    }
}
