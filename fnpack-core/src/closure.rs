use crate::dependency::{DependencyMap, DependencyNode};
use std::collections::BTreeSet;

/// Flattens the dependency closure of `requested` into the list of package
/// names that must be present under the top-level `node_modules`.
///
/// Requested names and every node marked `is_root_dep` are collected once, in
/// discovery order. A collected package is expanded through its entry in the
/// shared `root` map, so a hoisted package reached from several parents is
/// expanded a single time. Nested packages are never collected themselves,
/// but their children are still walked to reach hoisted grandchildren.
pub fn flat_dep(root: &DependencyMap, requested: &[String]) -> Vec<String> {
    let mut collected = Vec::new();
    let mut visited = BTreeSet::new();

    for name in requested {
        if let Some(node) = root.get(name) {
            collect(root, name, node, &mut visited, &mut collected);
        }
    }

    collected
}

fn collect(
    root: &DependencyMap,
    name: &str,
    node: &DependencyNode,
    visited: &mut BTreeSet<String>,
    collected: &mut Vec<String>,
) {
    if !visited.insert(name.to_string()) {
        return;
    }

    collected.push(name.to_string());

    let children = root
        .get(name)
        .and_then(|shared| shared.dependencies.as_ref())
        .or(node.dependencies.as_ref());

    if let Some(children) = children {
        walk(root, children, visited, collected);
    }
}

fn walk(
    root: &DependencyMap,
    dependencies: &DependencyMap,
    visited: &mut BTreeSet<String>,
    collected: &mut Vec<String>,
) {
    for (name, node) in dependencies {
        if node.is_root_dep {
            collect(root, name, node, visited, collected);
        } else if let Some(children) = node.dependencies.as_ref() {
            walk(root, children, visited, collected);
        }
    }
}
