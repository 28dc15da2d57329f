use crate::dependency::{DependencyMap, DependencyNode, insert_first};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A node of a path-annotated listing (`npm ls --long`, `pnpm ls`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathTreeNode {
    pub version: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, PathTreeNode>,
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, PathTreeNode>,
    #[serde(default)]
    pub deduped: bool,
}

impl PathTreeNode {
    fn children(&self) -> impl Iterator<Item = (&String, &PathTreeNode)> {
        self.dependencies
            .iter()
            .chain(self.optional_dependencies.iter())
    }
}

/// Normalizes the top level of a path-annotated listing. Top-level packages
/// that do not live at `<modules>/<name>` are still recorded at the root.
pub fn normalize_root<'a, I>(top: I, modules: &Path) -> DependencyMap
where
    I: IntoIterator<Item = (&'a String, &'a PathTreeNode)>,
{
    let mut root = DependencyMap::new();
    let level = normalize_level(top, modules, &mut root);

    for (name, node) in level {
        if !node.is_root_dep {
            insert_first(&mut root, &name, node);
        }
    }

    root
}

fn normalize_level<'a, I>(nodes: I, modules: &Path, root: &mut DependencyMap) -> DependencyMap
where
    I: IntoIterator<Item = (&'a String, &'a PathTreeNode)>,
{
    let mut level = DependencyMap::new();

    for (name, node) in nodes {
        if node.deduped {
            continue;
        }

        let version = node.version.clone().unwrap_or_default();

        if is_hoisted(node, name, modules) {
            if !root.contains_key(name) {
                root.insert(name.clone(), DependencyNode::new(version.clone()));

                let children = normalize_level(node.children(), modules, root);
                if !children.is_empty()
                    && let Some(slot) = root.get_mut(name)
                {
                    slot.dependencies = Some(children);
                }
            }

            insert_first(&mut level, name, DependencyNode::hoisted(version));
        } else {
            let children = normalize_level(node.children(), modules, root);
            let mut entry = DependencyNode::new(version);
            if !children.is_empty() {
                entry.dependencies = Some(children);
            }

            insert_first(&mut level, name, entry);
        }
    }

    level
}

fn is_hoisted(node: &PathTreeNode, name: &str, modules: &Path) -> bool {
    node.path
        .as_deref()
        .map(|path| Path::new(path) == modules.join(name))
        .unwrap_or(false)
}
