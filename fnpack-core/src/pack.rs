use crate::closure::flat_dep;
use crate::config::PackConfig;
use crate::console::{Reporter, human_size};
use crate::dependency::{DependenciesResult, DependencyMap};
use crate::extract::deps_from_bundle;
use crate::externals::pack_external_modules;
use crate::packager::Packager;
use crate::{PackError, Result};
use fnpack_archive::FileEntry;
use futures::future::try_join_all;
use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

const PRIVATE_PREFIX: &str = "__only_";

const DEFAULT_EXCLUDED_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUnit {
    pub name: String,
    pub alias: String,
    /// Compiled bundle, relative to the build directory.
    pub bundle_path: PathBuf,
    pub patterns: Vec<String>,
    pub artifact: Option<PathBuf>,
}

impl FunctionUnit {
    pub fn new(name: impl Into<String>, bundle_path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            bundle_path: bundle_path.into(),
            patterns: Vec::new(),
            artifact: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub service_dir: PathBuf,
    pub build_dir: PathBuf,
    pub patterns: Vec<String>,
    pub functions: Vec<FunctionUnit>,
    /// Set after a monolithic run.
    pub artifact: Option<PathBuf>,
}

impl Service {
    pub fn new(
        name: impl Into<String>,
        service_dir: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            service_dir: service_dir.into(),
            build_dir: build_dir.into(),
            patterns: Vec::new(),
            functions: Vec::new(),
            artifact: None,
        }
    }

    pub fn with_function(mut self, unit: FunctionUnit) -> Self {
        self.functions.push(unit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    /// `None` for the single monolithic archive.
    pub unit: Option<String>,
    pub path: PathBuf,
    pub size: u64,
    pub elapsed_ms: u128,
    pub sha256: String,
}

pub struct PackContext<'a> {
    pub config: &'a PackConfig,
    pub reporter: &'a dyn Reporter,
}

/// Lists every file below `dir` as sorted, `/`-separated relative paths.
pub fn list_files(dir: &Path, follow_links: bool) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(follow_links) {
        let entry = entry.map_err(|error| PackError::ReadFile {
            path: error
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dir.to_path_buf()),
            source: error.into(),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        if let Ok(relative) = entry.path().strip_prefix(dir) {
            files.push(to_slash(relative));
        }
    }

    files.sort();
    Ok(files)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn without_extension(path: &str) -> &str {
    let name_start = path.rfind('/').map(|index| index + 1).unwrap_or(0);

    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..name_start + dot],
        _ => path,
    }
}

/// Splits `__only_<owner>/<rest>` into its owner and the rest. A bare
/// `__only_<owner>` file has no rest.
fn private_owner(path: &str) -> Option<(&str, Option<&str>)> {
    let tail = path.strip_prefix(PRIVATE_PREFIX)?;

    Some(match tail.split_once('/') {
        Some((owner, rest)) => (owner, Some(rest)),
        None => (tail, None),
    })
}

fn module_allowed(path: &str, whitelist: &[String]) -> bool {
    whitelist.iter().any(|dep| {
        path.strip_prefix("node_modules/")
            .map(|rest| rest == dep || rest.starts_with(&format!("{}/", dep)))
            .unwrap_or(false)
    })
}

fn is_module_path(path: &str) -> bool {
    path == "node_modules" || path.starts_with("node_modules/")
}

struct Patterns {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl Patterns {
    fn compile(patterns: &[String]) -> Result<Self> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for raw in patterns {
            let (negated, text) = match raw.strip_prefix('!') {
                Some(text) => (true, text),
                None => (false, raw.as_str()),
            };

            let pattern = Pattern::new(text).map_err(|error| PackError::Config {
                reason: format!("invalid package pattern {:?}: {}", raw, error),
            })?;

            if negated {
                exclude.push(pattern);
            } else {
                include.push(pattern);
            }
        }

        Ok(Self { include, exclude })
    }
}

fn matches_any(patterns: &[Pattern], path: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| pattern.matches_with(path, MATCH_OPTIONS))
}

/// Inclusion rules for one archive.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// The unit being packed; `None` strips every private prefix.
    pub alias: Option<String>,
    pub force_included: BTreeSet<String>,
    pub excluded_prefixes: Vec<String>,
    pub whitelist: Vec<String>,
    pub exclude_manifests: bool,
    pub ship_modules: bool,
}

pub fn filter_files(files: &[String], filter: &FileFilter, build_dir: &Path) -> Vec<FileEntry> {
    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();

    for file in files {
        let forced = filter.force_included.contains(file);

        let local = match private_owner(file) {
            Some((_, None)) => continue,
            Some((owner, Some(rest))) => match &filter.alias {
                Some(alias) if alias != owner => continue,
                _ => rest,
            },
            None => file.as_str(),
        };

        if !forced {
            if filter.exclude_manifests && DEFAULT_EXCLUDED_FILES.contains(&file.as_str()) {
                continue;
            }

            if filter
                .excluded_prefixes
                .iter()
                .any(|prefix| file.starts_with(prefix))
            {
                continue;
            }

            if is_module_path(file)
                && (!filter.ship_modules || !module_allowed(file, &filter.whitelist))
            {
                continue;
            }
        }

        if seen.insert(local.to_string()) {
            entries.push(FileEntry::new(local, build_dir.join(file)));
        }
    }

    entries
}

fn resolve_tree(
    dependencies: Option<&DependenciesResult>,
    packager: &dyn Packager,
    cwd: &Path,
    reporter: &dyn Reporter,
) -> Option<DependencyMap> {
    match dependencies? {
        DependenciesResult::Tree(tree) => Some(tree.clone()),
        DependenciesResult::Raw { stdout } => match packager.normalize(stdout, cwd) {
            Ok(tree) => {
                reporter.warn(&format!(
                    "{} reported problems while listing dependencies; using the partial tree",
                    packager.kind()
                ));
                Some(tree)
            }
            Err(error) => {
                reporter.warn(&format!(
                    "Could not read the {} dependency tree, node_modules will be skipped: {}",
                    packager.kind(),
                    error
                ));
                None
            }
        },
    }
}

/// Parses the bundle on the blocking pool and keeps the configured externals.
async fn referenced_externals(
    build_dir: &Path,
    bundle: &Path,
    externals: &[String],
    esm: bool,
) -> Result<Vec<String>> {
    let path = build_dir.join(bundle);

    let names = tokio::task::spawn_blocking(move || deps_from_bundle(&path, esm))
        .await
        .map_err(|error| PackError::Task {
            reason: error.to_string(),
        })??;

    Ok(names
        .into_iter()
        .filter(|name| externals.contains(name))
        .collect())
}

async fn write_artifact(
    dest: PathBuf,
    entries: Vec<FileEntry>,
    native: bool,
    unit: Option<String>,
    reporter: &dyn Reporter,
) -> Result<PackagedArtifact> {
    let started = Instant::now();
    let target = dest.clone();
    let count = entries.len();

    tokio::task::spawn_blocking(move || fnpack_archive::write_archive(&target, &entries, native))
        .await
        .map_err(|error| PackError::Task {
            reason: error.to_string(),
        })?
        .map_err(|source| PackError::Archive {
            path: dest.clone(),
            source,
        })?;

    let bytes = tokio::fs::read(&dest)
        .await
        .map_err(|source| PackError::ReadFile {
            path: dest.clone(),
            source,
        })?;

    let elapsed_ms = started.elapsed().as_millis();
    let size = bytes.len() as u64;
    let sha256 = hex::encode(Sha256::digest(&bytes));

    reporter.step(&format!(
        "Zip {}: {} files, {} [{} ms]",
        dest.display(),
        count,
        human_size(size),
        elapsed_ms
    ));

    Ok(PackagedArtifact {
        unit,
        path: dest,
        size,
        elapsed_ms,
        sha256,
    })
}

struct Shared<'a> {
    ctx: &'a PackContext<'a>,
    service: &'a Service,
    files: &'a [String],
    tree: Option<&'a DependencyMap>,
    externals: &'a [String],
    service_patterns: &'a Patterns,
}

async fn pack_unit(shared: &Shared<'_>, unit: &FunctionUnit) -> Result<PackagedArtifact> {
    let config = shared.ctx.config;
    let service = shared.service;

    let whitelist = match shared.tree {
        Some(tree) if !shared.externals.is_empty() => {
            let requested = referenced_externals(
                &service.build_dir,
                &unit.bundle_path,
                shared.externals,
                config.is_esm(),
            )
            .await?;
            flat_dep(tree, &requested)
        }
        _ => Vec::new(),
    };

    shared.ctx.reporter.verbose(&format!(
        "{}: node_modules whitelist [{}]",
        unit.alias,
        whitelist.join(", ")
    ));

    let patterns = Patterns::compile(&unit.patterns)?;
    let own_bundle = to_slash(&unit.bundle_path);

    let mut excluded_prefixes: Vec<String> = service
        .functions
        .iter()
        .map(|other| to_slash(&other.bundle_path))
        .filter(|bundle| *bundle != own_bundle)
        .map(|bundle| format!("{}.", without_extension(&bundle)))
        .collect();

    let mut force_included = BTreeSet::new();

    for file in shared.files {
        if matches_any(&shared.service_patterns.include, file) || matches_any(&patterns.include, file)
        {
            force_included.insert(file.clone());
        }

        if matches_any(&patterns.exclude, file) {
            excluded_prefixes.push(format!("{}.", without_extension(file)));
        }
    }

    let filter = FileFilter {
        alias: Some(unit.alias.clone()),
        force_included,
        excluded_prefixes,
        whitelist,
        exclude_manifests: true,
        ship_modules: true,
    };

    let entries = filter_files(shared.files, &filter, &service.build_dir);

    if entries.is_empty() {
        return Err(PackError::EmptyPackage {
            unit: unit.alias.clone(),
        });
    }

    let dest = service
        .service_dir
        .join(&config.artifact_dir)
        .join(format!("{}.zip", unit.alias));

    write_artifact(
        dest,
        entries,
        config.native_zip,
        Some(unit.alias.clone()),
        shared.ctx.reporter,
    )
    .await
}

async fn report_failure<F>(
    reporter: &dyn Reporter,
    unit: &FunctionUnit,
    packing: F,
) -> Result<PackagedArtifact>
where
    F: std::future::Future<Output = Result<PackagedArtifact>>,
{
    let result = packing.await;

    if let Err(error) = &result {
        reporter.error(&format!("Packaging {} failed: {}", unit.alias, error));
    }

    result
}

/// Builds the service archive, or one archive per function when packing
/// individually, and binds the artifact paths back onto the service.
pub async fn pack(
    ctx: &PackContext<'_>,
    service: &mut Service,
    packager: &dyn Packager,
    dependencies: Option<&DependenciesResult>,
) -> Result<Vec<PackagedArtifact>> {
    let config = ctx.config;
    let auto_install = config.platform.auto_installs_dependencies();

    if auto_install && config.individually {
        return Err(PackError::IndividualUnsupported {
            platform: config.platform.as_str().to_string(),
        });
    }

    let files = list_files(&service.build_dir, !packager.must_copy_modules())?;

    if files.is_empty() {
        return Err(PackError::EmptyPackage {
            unit: service.name.clone(),
        });
    }

    let externals = config.externals();
    let tree = resolve_tree(dependencies, packager, &service.build_dir, ctx.reporter);

    if !config.individually {
        let whitelist = match &tree {
            Some(tree) if !externals.is_empty() => {
                let mut requested: Vec<String> = Vec::new();
                for unit in &service.functions {
                    for name in referenced_externals(
                        &service.build_dir,
                        &unit.bundle_path,
                        &externals,
                        config.is_esm(),
                    )
                    .await?
                    {
                        if !requested.contains(&name) {
                            requested.push(name);
                        }
                    }
                }
                flat_dep(tree, &requested)
            }
            _ => Vec::new(),
        };

        let service_patterns = Patterns::compile(&service.patterns)?;
        let force_included: BTreeSet<String> = files
            .iter()
            .filter(|file| matches_any(&service_patterns.include, file))
            .cloned()
            .collect();

        let filter = FileFilter {
            alias: None,
            force_included,
            whitelist,
            exclude_manifests: !auto_install,
            ship_modules: !auto_install,
            ..FileFilter::default()
        };

        let entries = filter_files(&files, &filter, &service.build_dir);

        if entries.is_empty() {
            return Err(PackError::EmptyPackage {
                unit: service.name.clone(),
            });
        }

        let file_name = format!("{}.zip", service.name);
        let dest = service
            .service_dir
            .join(&config.artifact_dir)
            .join(&file_name);

        let artifact = write_artifact(dest, entries, config.native_zip, None, ctx.reporter).await?;
        service.artifact = Some(config.artifact_dir.join(file_name));

        return Ok(vec![artifact]);
    }

    let service_patterns = Patterns::compile(&service.patterns)?;

    let artifacts = {
        let shared = Shared {
            ctx,
            service,
            files: &files,
            tree: tree.as_ref(),
            externals: &externals,
            service_patterns: &service_patterns,
        };

        try_join_all(
            service
                .functions
                .iter()
                .map(|unit| report_failure(ctx.reporter, unit, pack_unit(&shared, unit))),
        )
        .await?
    };

    for unit in service.functions.iter_mut() {
        unit.artifact = Some(config.artifact_dir.join(format!("{}.zip", unit.alias)));
    }

    Ok(artifacts)
}

/// Stages externals, lists the installed production tree and packs.
pub async fn package_service(
    config: &PackConfig,
    service: &mut Service,
    packager: &dyn Packager,
    reporter: &dyn Reporter,
) -> Result<Vec<PackagedArtifact>> {
    let staged = pack_external_modules(config, service, packager, reporter).await?;

    let dependencies = match staged {
        Some(_) if !config.no_install => Some(
            packager
                .get_prod_dependencies(&service.build_dir, None)
                .await?,
        ),
        _ => None,
    };

    let ctx = PackContext { config, reporter };
    pack(&ctx, service, packager, dependencies.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PackagerKind, Platform};
    use crate::console::RecordingReporter;
    use crate::dependency::DependencyNode;
    use crate::packager::packager_for;
    use crate::process::testing::FakeExecutor;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn names(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.local_path.as_str()).collect()
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let file = fs::File::open(path).unwrap();
        let archive = zip::ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    fn npm() -> Box<dyn Packager> {
        packager_for(
            PackagerKind::Npm,
            Arc::new(FakeExecutor::new()),
            Arc::new(RecordingReporter::new()),
        )
    }

    fn module_files() -> Vec<String> {
        [
            "handler.js",
            "node_modules/@scope/pkg/index.js",
            "node_modules/@scope/pkgx/index.js",
            "node_modules/left-pad",
            "node_modules/left-pad/index.js",
            "node_modules/left-pad-extra/index.js",
        ]
        .iter()
        .map(|file| file.to_string())
        .collect()
    }

    #[test]
    fn whitelist_matches_whole_package_names() {
        let filter = FileFilter {
            whitelist: vec!["left-pad".to_string(), "@scope/pkg".to_string()],
            ship_modules: true,
            ..FileFilter::default()
        };

        let entries = filter_files(&module_files(), &filter, Path::new("/build"));

        assert_eq!(
            names(&entries),
            vec![
                "handler.js",
                "node_modules/@scope/pkg/index.js",
                "node_modules/left-pad",
                "node_modules/left-pad/index.js",
            ]
        );
        assert_eq!(entries[0].root_path, Path::new("/build/handler.js"));
    }

    #[test]
    fn empty_whitelist_drops_node_modules() {
        let filter = FileFilter {
            ship_modules: true,
            ..FileFilter::default()
        };

        let entries = filter_files(&module_files(), &filter, Path::new("/build"));

        assert_eq!(names(&entries), vec!["handler.js"]);
    }

    #[test]
    fn private_prefixes_are_stripped_or_excluded() {
        let files: Vec<String> = ["__only_a", "__only_a/config.json", "__only_b/config.json", "a.js"]
            .iter()
            .map(|file| file.to_string())
            .collect();

        let own = FileFilter {
            alias: Some("a".to_string()),
            ..FileFilter::default()
        };
        assert_eq!(
            names(&filter_files(&files, &own, Path::new("/build"))),
            vec!["config.json", "a.js"]
        );

        let monolithic = FileFilter::default();
        assert_eq!(
            names(&filter_files(&files, &monolithic, Path::new("/build"))),
            vec!["config.json", "a.js"]
        );
    }

    #[test]
    fn forced_files_skip_exclusions() {
        let files: Vec<String> = ["b.js", "node_modules/x/index.js", "package.json"]
            .iter()
            .map(|file| file.to_string())
            .collect();

        let filter = FileFilter {
            alias: Some("a".to_string()),
            force_included: ["node_modules/x/index.js".to_string(), "package.json".to_string()]
                .into_iter()
                .collect(),
            excluded_prefixes: vec!["b.".to_string()],
            exclude_manifests: true,
            ship_modules: true,
            ..FileFilter::default()
        };

        assert_eq!(
            names(&filter_files(&files, &filter, Path::new("/build"))),
            vec!["node_modules/x/index.js", "package.json"]
        );
    }

    #[test]
    fn strips_extensions_from_the_file_name_only() {
        assert_eq!(without_extension("handlers/a.js"), "handlers/a");
        assert_eq!(without_extension("v1.2/handler"), "v1.2/handler");
        assert_eq!(without_extension(".env"), ".env");
        assert_eq!(without_extension("a.js.map"), "a.js");
    }

    #[test]
    fn lists_files_sorted_with_forward_slashes() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "b.js", "");
        write(tmp.path(), "a/nested/file.txt", "");
        write(tmp.path(), ".env", "");

        let files = list_files(tmp.path(), false).unwrap();

        assert_eq!(files, vec![".env", "a/nested/file.txt", "b.js"]);
    }

    #[tokio::test]
    async fn wildcard_exclude_ships_no_node_modules() {
        let tmp = tempdir().unwrap();
        let build = tmp.path().join(".build");
        write(&build, "handler.js", "require('left-pad');");
        write(&build, "node_modules/left-pad/index.js", "module.exports = 1;");

        let mut service = Service::new("svc", tmp.path(), &build)
            .with_function(FunctionUnit::new("handler", "handler.js"));
        let config = PackConfig {
            external: vec!["left-pad".to_string()],
            exclude: vec!["*".to_string()],
            ..PackConfig::default()
        };
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };
        let tree: DependencyMap = [("left-pad".to_string(), DependencyNode::new("1.3.0"))]
            .into_iter()
            .collect();
        let dependencies = DependenciesResult::Tree(tree);

        let artifacts = pack(&ctx, &mut service, npm().as_ref(), Some(&dependencies))
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].unit, None);
        assert_eq!(artifacts[0].sha256.len(), 64);
        assert_eq!(archive_names(&artifacts[0].path), vec!["handler.js"]);
        assert_eq!(service.artifact, Some(PathBuf::from(".serverless/svc.zip")));
    }

    #[tokio::test]
    async fn units_share_hoisted_dependencies_without_private_files() {
        let tmp = tempdir().unwrap();
        let build = tmp.path().join(".build");
        write(&build, "a.js", "const express = require('express');");
        write(&build, "a.js.map", "{}");
        write(&build, "b.js", "const debug = require('debug');");
        write(&build, "__only_a/config.json", "{\"unit\":\"a\"}");
        write(&build, "__only_b/config.json", "{\"unit\":\"b\"}");
        write(&build, "package.json", "{}");
        for name in ["express", "debug", "ms", "left-pad"] {
            write(&build, &format!("node_modules/{}/index.js", name), "");
        }

        let mut service = Service::new("svc", tmp.path(), &build)
            .with_function(FunctionUnit::new("a", "a.js"))
            .with_function(FunctionUnit::new("b", "b.js"));
        let config = PackConfig {
            external: vec!["express".into(), "debug".into(), "left-pad".into()],
            individually: true,
            ..PackConfig::default()
        };
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };

        let tree: DependencyMap = [
            (
                "express".to_string(),
                DependencyNode::new("4.18.2").with_dependencies(
                    [("debug".to_string(), DependencyNode::hoisted("2.6.9"))]
                        .into_iter()
                        .collect(),
                ),
            ),
            (
                "debug".to_string(),
                DependencyNode::new("2.6.9").with_dependencies(
                    [("ms".to_string(), DependencyNode::hoisted("2.0.0"))]
                        .into_iter()
                        .collect(),
                ),
            ),
            ("ms".to_string(), DependencyNode::new("2.0.0")),
            ("left-pad".to_string(), DependencyNode::new("1.3.0")),
        ]
        .into_iter()
        .collect();
        let dependencies = DependenciesResult::Tree(tree);

        let artifacts = pack(&ctx, &mut service, npm().as_ref(), Some(&dependencies))
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(
            archive_names(&artifacts[0].path),
            vec![
                "a.js",
                "a.js.map",
                "config.json",
                "node_modules/debug/index.js",
                "node_modules/express/index.js",
                "node_modules/ms/index.js",
            ]
        );
        assert_eq!(
            archive_names(&artifacts[1].path),
            vec![
                "b.js",
                "config.json",
                "node_modules/debug/index.js",
                "node_modules/ms/index.js",
            ]
        );
        assert_eq!(
            service.functions[0].artifact,
            Some(PathBuf::from(".serverless/a.zip"))
        );
        assert_eq!(
            service.functions[1].artifact,
            Some(PathBuf::from(".serverless/b.zip"))
        );
    }

    #[tokio::test]
    async fn unit_patterns_force_include_and_negate() {
        let tmp = tempdir().unwrap();
        let build = tmp.path().join(".build");
        write(&build, "a.js", "module.exports = {};");
        write(&build, "assets/logo.png", "png");
        write(&build, "assets/logo.svg", "svg");
        write(&build, "node_modules/sharp/index.js", "");

        let mut service = Service::new("svc", tmp.path(), &build).with_function(
            FunctionUnit::new("a", "a.js")
                .with_patterns(["node_modules/sharp/**", "!assets/logo.svg"]),
        );
        let config = PackConfig {
            individually: true,
            ..PackConfig::default()
        };
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };

        let artifacts = pack(&ctx, &mut service, npm().as_ref(), None).await.unwrap();

        assert_eq!(
            archive_names(&artifacts[0].path),
            vec!["a.js", "node_modules/sharp/index.js"]
        );
    }

    #[tokio::test]
    async fn individual_packaging_is_rejected_on_auto_install_platforms() {
        let tmp = tempdir().unwrap();
        let mut service = Service::new("svc", tmp.path(), tmp.path().join(".build"));
        let config = PackConfig {
            individually: true,
            platform: Platform::Google,
            ..PackConfig::default()
        };
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };

        let result = pack(&ctx, &mut service, npm().as_ref(), None).await;

        assert!(matches!(
            result,
            Err(PackError::IndividualUnsupported { platform }) if platform == "google"
        ));
    }

    #[tokio::test]
    async fn auto_install_platforms_keep_manifests_and_drop_modules() {
        let tmp = tempdir().unwrap();
        let build = tmp.path().join(".build");
        write(&build, "index.js", "require('uuid');");
        write(&build, "package.json", "{}");
        write(&build, "package-lock.json", "{}");
        write(&build, "node_modules/uuid/index.js", "");

        let mut service = Service::new("svc", tmp.path(), &build)
            .with_function(FunctionUnit::new("api", "index.js"));
        let config = PackConfig {
            external: vec!["uuid".into()],
            platform: Platform::Scaleway,
            ..PackConfig::default()
        };
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };
        let tree: DependencyMap = [("uuid".to_string(), DependencyNode::new("9.0.0"))]
            .into_iter()
            .collect();

        let artifacts = pack(
            &ctx,
            &mut service,
            npm().as_ref(),
            Some(&DependenciesResult::Tree(tree)),
        )
        .await
        .unwrap();

        assert_eq!(
            archive_names(&artifacts[0].path),
            vec!["index.js", "package-lock.json", "package.json"]
        );
    }

    #[tokio::test]
    async fn service_archive_drops_manifests_and_keeps_forced_modules() {
        let tmp = tempdir().unwrap();
        let build = tmp.path().join(".build");
        write(&build, "index.js", "require('uuid');");
        write(&build, "package.json", "{}");
        write(&build, "package-lock.json", "{}");
        write(&build, "node_modules/uuid/index.js", "");
        write(&build, "node_modules/sharp/index.js", "");
        write(&build, "node_modules/left-pad/index.js", "");

        let mut service = Service::new("svc", tmp.path(), &build)
            .with_function(FunctionUnit::new("api", "index.js"));
        service.patterns = vec!["node_modules/sharp/**".into()];
        let config = PackConfig {
            external: vec!["uuid".into()],
            ..PackConfig::default()
        };
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };
        let tree: DependencyMap = [("uuid".to_string(), DependencyNode::new("9.0.0"))]
            .into_iter()
            .collect();

        let artifacts = pack(
            &ctx,
            &mut service,
            npm().as_ref(),
            Some(&DependenciesResult::Tree(tree)),
        )
        .await
        .unwrap();

        assert_eq!(
            archive_names(&artifacts[0].path),
            vec![
                "index.js",
                "node_modules/sharp/index.js",
                "node_modules/uuid/index.js",
            ]
        );
    }

    #[tokio::test]
    async fn failing_unit_is_reported_as_an_error() {
        let tmp = tempdir().unwrap();
        let build = tmp.path().join(".build");
        write(&build, "a.js", "require('uuid');");
        write(&build, "broken.js", "const = ;");

        let mut service = Service::new("svc", tmp.path(), &build)
            .with_function(FunctionUnit::new("a", "a.js"))
            .with_function(FunctionUnit::new("broken", "broken.js"));
        let config = PackConfig {
            external: vec!["uuid".into()],
            individually: true,
            ..PackConfig::default()
        };
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };
        let tree: DependencyMap = [("uuid".to_string(), DependencyNode::new("9.0.0"))]
            .into_iter()
            .collect();

        let result = pack(
            &ctx,
            &mut service,
            npm().as_ref(),
            Some(&DependenciesResult::Tree(tree)),
        )
        .await;

        assert!(result.is_err());
        let errors: Vec<String> = reporter
            .events()
            .into_iter()
            .filter_map(|event| match event {
                crate::console::Event::Error(message) => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Packaging broken failed"));
    }

    #[tokio::test]
    async fn empty_build_directory_is_an_error() {
        let tmp = tempdir().unwrap();
        let build = tmp.path().join(".build");
        fs::create_dir_all(&build).unwrap();

        let mut service = Service::new("svc", tmp.path(), &build);
        let config = PackConfig::default();
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };

        let result = pack(&ctx, &mut service, npm().as_ref(), None).await;

        assert!(matches!(result, Err(PackError::EmptyPackage { .. })));
    }

    #[tokio::test]
    async fn unreadable_raw_listing_warns_and_skips_modules() {
        let tmp = tempdir().unwrap();
        let build = tmp.path().join(".build");
        write(&build, "index.js", "require('uuid');");
        write(&build, "node_modules/uuid/index.js", "");

        let mut service = Service::new("svc", tmp.path(), &build)
            .with_function(FunctionUnit::new("api", "index.js"));
        let config = PackConfig {
            external: vec!["uuid".into()],
            ..PackConfig::default()
        };
        let reporter = RecordingReporter::new();
        let ctx = PackContext {
            config: &config,
            reporter: &reporter,
        };
        let raw = DependenciesResult::Raw {
            stdout: "npm ERR! not json".to_string(),
        };

        let artifacts = pack(&ctx, &mut service, npm().as_ref(), Some(&raw))
            .await
            .unwrap();

        assert_eq!(archive_names(&artifacts[0].path), vec!["index.js"]);
        assert_eq!(reporter.warnings().len(), 1);
    }

    #[tokio::test]
    async fn package_service_runs_every_stage() {
        let tmp = tempdir().unwrap();
        write(
            tmp.path(),
            "package.json",
            r#"{ "name": "svc", "dependencies": { "uuid": "^9.0.0" } }"#,
        );
        let build = tmp.path().join(".build");
        write(&build, "index.js", "require('uuid');");
        write(&build, "node_modules/uuid/index.js", "");

        let listing = format!(
            r#"{{ "path": {path:?}, "dependencies": {{ "uuid": {{ "version": "9.0.0", "path": {module:?} }} }} }}"#,
            path = build.to_string_lossy(),
            module = build.join("node_modules").join("uuid").to_string_lossy(),
        );
        let executor = Arc::new(FakeExecutor::with_responder(move |command| {
            let stdout = match command.args.first().map(String::as_str) {
                Some("--version") => "10.2.4".to_string(),
                Some("ls") => listing.clone(),
                _ => String::new(),
            };
            Ok(crate::process::ProcessOutput {
                stdout,
                stderr: String::new(),
            })
        }));
        let reporter = Arc::new(RecordingReporter::new());
        let packager = packager_for(PackagerKind::Npm, executor.clone(), reporter.clone());

        let mut service = Service::new("svc", tmp.path(), &build)
            .with_function(FunctionUnit::new("api", "index.js"));
        let config = PackConfig {
            external: vec!["uuid".into()],
            ..PackConfig::default()
        };

        let artifacts = package_service(&config, &mut service, packager.as_ref(), reporter.as_ref())
            .await
            .unwrap();

        assert_eq!(
            archive_names(&artifacts[0].path),
            vec!["index.js", "node_modules/uuid/index.js"]
        );
        let npm = crate::process::tool_program("npm");
        assert_eq!(
            executor.commands(),
            vec![
                format!("{} install", npm),
                format!("{} prune", npm),
                format!("{} --version", npm),
                format!("{} ls --json --omit=dev --long --all", npm),
            ]
        );
    }
}
