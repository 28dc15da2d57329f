use crate::config::PackConfig;
use crate::console::Reporter;
use crate::dependency::ExternalModuleSpec;
use crate::manifest::{Manifest, StagingManifest, find_manifest};
use crate::pack::Service;
use crate::packager::{Packager, rebase_file_reference};
use crate::{PackError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

/// Dev dependencies the runtime already provides.
const SAFE_DEV_DEPENDENCIES: &[&str] = &["aws-sdk"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProdModule {
    pub name: String,
    pub range: String,
}

impl std::fmt::Display for ProdModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.range)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedExternals {
    pub modules: Vec<ProdModule>,
    pub manifest_path: PathBuf,
    pub lockfile_copied: bool,
}

/// Resolves externals against the root manifest. Required peers of every
/// included package are resolved the same way.
pub fn get_prod_modules(
    externals: &[ExternalModuleSpec],
    manifest_path: &Path,
    reporter: &dyn Reporter,
) -> Result<Vec<ProdModule>> {
    let manifest = Manifest::read(manifest_path)?;
    let root = manifest_path.parent().unwrap_or(Path::new("."));

    let mut resolver = ProdResolver {
        manifest: &manifest,
        root,
        reporter,
        visited: BTreeSet::new(),
        modules: Vec::new(),
        offenders: Vec::new(),
    };

    for external in externals {
        resolver.resolve(&external.name);
    }

    if !resolver.offenders.is_empty() {
        return Err(PackError::DevDependencies {
            names: resolver.offenders,
        });
    }

    Ok(resolver.modules)
}

struct ProdResolver<'a> {
    manifest: &'a Manifest,
    root: &'a Path,
    reporter: &'a dyn Reporter,
    visited: BTreeSet<String>,
    modules: Vec<ProdModule>,
    offenders: Vec<String>,
}

impl ProdResolver<'_> {
    fn resolve(&mut self, name: &str) {
        if !self.visited.insert(name.to_string()) {
            return;
        }

        if let Some(range) = self.manifest.dependencies.get(name) {
            self.modules.push(ProdModule {
                name: name.to_string(),
                range: range.clone(),
            });

            for peer in self.required_peers(name) {
                self.resolve(&peer);
            }
        } else if self.manifest.dev_dependencies.contains_key(name) {
            if SAFE_DEV_DEPENDENCIES.contains(&name) {
                self.reporter.step(&format!(
                    "{} is a devDependency provided by the runtime; skipping",
                    name
                ));
            } else {
                self.offenders.push(name.to_string());
            }
        } else {
            self.reporter.warn(&format!(
                "{} is used at runtime but not declared in dependencies; it will not be packaged",
                name
            ));
        }
    }

    fn required_peers(&self, name: &str) -> Vec<String> {
        let path = self
            .root
            .join("node_modules")
            .join(name)
            .join("package.json");

        match Manifest::read(&path) {
            Ok(manifest) => {
                let peers = manifest.required_peers();
                if !peers.is_empty() {
                    self.reporter.verbose(&format!(
                        "{} has peer dependencies: {}",
                        name,
                        peers.join(", ")
                    ));
                }
                peers
            }
            Err(error) => {
                self.reporter.warn(&format!(
                    "Could not check peer dependencies of {}: {}",
                    name, error
                ));
                Vec::new()
            }
        }
    }
}

/// `/`-separated relative path leading from `from` to `to`.
pub fn relative_path(from: &Path, to: &Path) -> String {
    let from = fs::canonicalize(from).unwrap_or_else(|_| from.to_path_buf());
    let to = fs::canonicalize(to).unwrap_or_else(|_| to.to_path_buf());

    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();

    let shared = from
        .iter()
        .zip(to.iter())
        .take_while(|(left, right)| left == right)
        .count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - shared];
    parts.extend(
        to[shared..]
            .iter()
            .map(|component| component.as_os_str().to_string_lossy().to_string()),
    );

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

pub fn locate_manifest(config: &PackConfig, service: &Service) -> Result<PathBuf> {
    match &config.package_path {
        Some(path) => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                service.service_dir.join(path)
            };

            if path.is_file() {
                Ok(path)
            } else {
                Err(PackError::ManifestMissing { path })
            }
        }
        None => find_manifest(&service.service_dir),
    }
}

/// Writes the staging manifest and lockfile into the build directory and
/// installs the production externals there. Returns `None` when no external
/// module has to be installed.
pub async fn pack_external_modules(
    config: &PackConfig,
    service: &Service,
    packager: &dyn Packager,
    reporter: &dyn Reporter,
) -> Result<Option<StagedExternals>> {
    let externals: Vec<ExternalModuleSpec> = config
        .externals()
        .into_iter()
        .map(ExternalModuleSpec::new)
        .collect();

    if externals.is_empty() {
        reporter.verbose("No external modules configured");
        return Ok(None);
    }

    let manifest_path = locate_manifest(config, service)?;
    reporter.verbose(&format!("Using package.json at {}", manifest_path.display()));

    let modules = get_prod_modules(&externals, &manifest_path, reporter)?;

    if modules.is_empty() {
        reporter.warn("No external modules needed");
        return Ok(None);
    }

    let root = manifest_path.parent().unwrap_or(Path::new("."));
    let build_dir = &service.build_dir;

    fs::create_dir_all(build_dir).map_err(|source| PackError::WriteFile {
        path: build_dir.clone(),
        source,
    })?;

    let path_to_root = relative_path(build_dir, root);
    let root_manifest = Manifest::read(&manifest_path)?;

    let mut staging = StagingManifest::new(&service.name);
    for module in &modules {
        let range = rebase_file_reference(&path_to_root, &module.range)
            .unwrap_or_else(|| module.range.clone());
        staging.dependencies.insert(module.name.clone(), range);
    }

    for section in packager.copy_package_section_names() {
        if let Some(value) = root_manifest.sections.get(*section) {
            staging.sections.insert(section.to_string(), value.clone());
        }
    }

    staging.write(&build_dir.join("package.json"))?;
    reporter.step(&format!(
        "Packing external modules: {}",
        modules
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let lockfile_copied = copy_lockfile(packager, root, build_dir, &path_to_root, reporter);

    if !config.no_install {
        let use_lockfile = lockfile_copied && !config.allow_lockfile_updates;

        let started = Instant::now();
        packager
            .install(build_dir, &config.install_extra_args, use_lockfile)
            .await?;
        reporter.step(&format!(
            "Package took [{} ms]",
            started.elapsed().as_millis()
        ));

        let started = Instant::now();
        packager.prune(build_dir).await?;
        reporter.step(&format!(
            "Prune: {} [{} ms]",
            build_dir.display(),
            started.elapsed().as_millis()
        ));

        if !config.scripts.is_empty() {
            let started = Instant::now();
            packager.run_scripts(build_dir, &config.scripts).await?;
            reporter.step(&format!(
                "Run scripts: {} [{} ms]",
                build_dir.display(),
                started.elapsed().as_millis()
            ));
        }
    }

    Ok(Some(StagedExternals {
        modules,
        manifest_path,
        lockfile_copied,
    }))
}

fn copy_lockfile(
    packager: &dyn Packager,
    root: &Path,
    build_dir: &Path,
    path_to_root: &str,
    reporter: &dyn Reporter,
) -> bool {
    let source = root.join(packager.lockfile_name());

    if !source.is_file() {
        return false;
    }

    let copied = fs::read_to_string(&source)
        .map_err(|source_error| PackError::ReadFile {
            path: source.clone(),
            source: source_error,
        })
        .and_then(|text| packager.rebase_lockfile(path_to_root, &text))
        .and_then(|text| {
            let target = build_dir.join(packager.lockfile_name());
            fs::write(&target, text).map_err(|error| PackError::WriteFile {
                path: target,
                source: error,
            })
        });

    match copied {
        Ok(()) => true,
        Err(error) => {
            reporter.warn(&format!(
                "Could not copy {}; installing without it: {}",
                packager.lockfile_name(),
                error
            ));
            false
        }
    }
}
