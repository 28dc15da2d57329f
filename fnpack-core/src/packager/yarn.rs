use super::{
    Benign, Listing, Packager, VersionProbe, rebase_file_references_in_text, run_listing,
    run_scripts_parallel, run_tool,
};
use crate::config::PackagerKind;
use crate::console::Reporter;
use crate::dependency::{DependenciesResult, DependencyMap, DependencyNode, insert_first};
use crate::process::{CommandSpec, Executor, tool_program};
use crate::{PackError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

const TOOL: &str = "yarn";
const LOCKFILE: &str = "yarn.lock";
const CLASSIC_MAJOR: u64 = 1;

#[derive(Debug, Deserialize)]
struct YarnEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct YarnTreeData {
    #[serde(default)]
    trees: Vec<YarnTree>,
}

#[derive(Debug, Deserialize)]
struct YarnTree {
    name: String,
    #[serde(default)]
    children: Vec<YarnTree>,
    #[serde(default)]
    shadow: bool,
}

pub struct Yarn {
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn Reporter>,
    version: VersionProbe,
}

impl Yarn {
    pub fn new(executor: Arc<dyn Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            executor,
            reporter,
            version: VersionProbe::default(),
        }
    }

    async fn major(&self, cwd: &Path) -> u64 {
        self.version
            .major(self.executor.as_ref(), TOOL, cwd, CLASSIC_MAJOR)
            .await
    }
}

pub fn list_command(depth: Option<usize>) -> CommandSpec {
    let mut args = vec![
        "list".to_string(),
        "--json".to_string(),
        "--production".to_string(),
    ];

    if let Some(depth) = depth {
        args.push(format!("--depth={}", depth));
    }

    CommandSpec::new(tool_program(TOOL), args)
}

pub fn install_command(major: u64, extra_args: &[String], use_lockfile: bool) -> CommandSpec {
    let mut args = vec!["install".to_string()];

    if major >= 2 {
        if use_lockfile {
            args.push("--immutable".to_string());
        }
    } else {
        args.push("--non-interactive".to_string());
        if use_lockfile {
            args.push("--frozen-lockfile".to_string());
        }
    }

    args.extend(extra_args.iter().cloned());

    CommandSpec::new(tool_program(TOOL), args)
}

/// Plain `warning ...` lines and `--json` warning events are benign.
pub(crate) fn classify_stderr(line: &str) -> Option<Benign> {
    if line.starts_with("warning") {
        return Some(Benign::Quiet);
    }

    let event: YarnEvent = serde_json::from_str(line).ok()?;
    (event.kind == "warning").then_some(Benign::Quiet)
}

/// `@scope/pkg@1.0.0` -> (`@scope/pkg`, `1.0.0`).
fn split_name_version(spec: &str) -> (&str, &str) {
    match spec.rfind('@') {
        Some(index) if index > 0 => (&spec[..index], &spec[index + 1..]),
        _ => (spec, ""),
    }
}

fn convert(trees: &[YarnTree]) -> DependencyMap {
    let mut level = DependencyMap::new();

    for tree in trees {
        let (name, version) = split_name_version(&tree.name);

        let node = if tree.shadow {
            DependencyNode::hoisted(version)
        } else if tree.children.is_empty() {
            DependencyNode::new(version)
        } else {
            DependencyNode::new(version).with_dependencies(convert(&tree.children))
        };

        insert_first(&mut level, name, node);
    }

    level
}

pub fn normalize_listing(stdout: &str) -> Result<DependencyMap> {
    let parse_error = |reason: String| PackError::ParseTree {
        tool: TOOL.to_string(),
        reason,
    };

    let mut tree_data = None;

    for line in stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let event: YarnEvent =
            serde_json::from_str(line).map_err(|error| parse_error(error.to_string()))?;

        if event.kind == "tree" {
            tree_data = event.data;
            break;
        }
    }

    let data = tree_data.ok_or_else(|| parse_error("no dependency tree in output".to_string()))?;
    let data: YarnTreeData =
        serde_json::from_value(data).map_err(|error| parse_error(error.to_string()))?;

    Ok(convert(&data.trees))
}

#[async_trait]
impl Packager for Yarn {
    fn kind(&self) -> PackagerKind {
        PackagerKind::Yarn
    }

    fn lockfile_name(&self) -> &'static str {
        LOCKFILE
    }

    fn copy_package_section_names(&self) -> &'static [&'static str] {
        &["resolutions"]
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

    fn normalize(&self, stdout: &str, _cwd: &Path) -> Result<DependencyMap> {
        normalize_listing(stdout)
    }

    async fn install(&self, cwd: &Path, extra_args: &[String], use_lockfile: bool) -> Result<()> {
        let command = install_command(self.major(cwd).await, extra_args, use_lockfile);
        run_tool(self.executor.as_ref(), self.reporter.as_ref(), &command, cwd).await
    }

    async fn prune(&self, cwd: &Path) -> Result<()> {
        let use_lockfile = cwd.join(LOCKFILE).is_file();
        let command = install_command(self.major(cwd).await, &[], use_lockfile);
        run_tool(self.executor.as_ref(), self.reporter.as_ref(), &command, cwd).await
    }

    fn rebase_lockfile(&self, path_to_root: &str, lockfile: &str) -> Result<String> {
        Ok(rebase_file_references_in_text(path_to_root, lockfile))
    }

    async fn run_scripts(&self, cwd: &Path, scripts: &[String]) -> Result<()> {
        run_scripts_parallel(self.executor.as_ref(), TOOL, cwd, scripts).await
    }
}
