use super::tree::{PathTreeNode, normalize_root};
use super::{
    Benign, Listing, Packager, rebase_file_references_in_text, run_listing, run_scripts_parallel,
    run_tool,
};
use crate::config::PackagerKind;
use crate::console::Reporter;
use crate::dependency::{DependenciesResult, DependencyMap};
use crate::process::{CommandSpec, Executor, tool_program};
use crate::{PackError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TOOL: &str = "pnpm";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PnpmProject {
    path: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, PathTreeNode>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, PathTreeNode>,
}

pub struct Pnpm {
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn Reporter>,
}

impl Pnpm {
    pub fn new(executor: Arc<dyn Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self { executor, reporter }
    }
}

pub fn list_command(depth: Option<usize>) -> CommandSpec {
    let depth = match depth {
        Some(depth) => format!("--depth={}", depth),
        None => "--depth=Infinity".to_string(),
    };

    CommandSpec::new(tool_program(TOOL), ["ls", "--prod", "--json", depth.as_str()])
}

pub fn install_command(extra_args: &[String], use_lockfile: bool) -> CommandSpec {
    let mut args = vec!["install".to_string()];

    if use_lockfile {
        args.push("--frozen-lockfile".to_string());
    }

    args.extend(extra_args.iter().cloned());

    CommandSpec::new(tool_program(TOOL), args)
}

pub(crate) fn classify_stderr(line: &str) -> Option<Benign> {
    (line.starts_with("WARN") || line.starts_with(" WARN")).then_some(Benign::Quiet)
}

pub fn normalize_listing(stdout: &str, cwd: &Path) -> Result<DependencyMap> {
    let parse_error = |reason: String| PackError::ParseTree {
        tool: TOOL.to_string(),
        reason,
    };

    let projects: Vec<PnpmProject> =
        serde_json::from_str(stdout).map_err(|error| parse_error(error.to_string()))?;

    let project = projects
        .into_iter()
        .next()
        .ok_or_else(|| parse_error("no project in output".to_string()))?;

    let root = project
        .path
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.to_path_buf());

    Ok(normalize_root(
        project
            .dependencies
            .iter()
            .chain(project.optional_dependencies.iter()),
        &root.join("node_modules"),
    ))
}

#[async_trait]
impl Packager for Pnpm {
    fn kind(&self) -> PackagerKind {
        PackagerKind::Pnpm
    }

    fn lockfile_name(&self) -> &'static str {
        "pnpm-lock.yaml"
    }

    fn copy_package_section_names(&self) -> &'static [&'static str] {
        &[]
    }

    fn must_copy_modules(&self) -> bool {
        false
    }

    async fn get_prod_dependencies(
        &self,
        cwd: &Path,
        depth: Option<usize>,
    ) -> Result<DependenciesResult> {
        let command = list_command(depth);

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
        let command = CommandSpec::new(tool_program(TOOL), ["prune"]);
        run_tool(self.executor.as_ref(), self.reporter.as_ref(), &command, cwd).await
    }

    fn rebase_lockfile(&self, path_to_root: &str, lockfile: &str) -> Result<String> {
        Ok(rebase_file_references_in_text(path_to_root, lockfile))
    }

    async fn run_scripts(&self, cwd: &Path, scripts: &[String]) -> Result<()> {
        run_scripts_parallel(self.executor.as_ref(), TOOL, cwd, scripts).await
    }
}
