//! Load ordering over the module dependency graph.

use std::collections::{BTreeMap, BTreeSet};

use super::Module;
use crate::{HotbundleError, Result};

/// Kahn's algorithm with an ordered ready set, so ties always resolve by
/// module id and the result does not depend on how the manifest was listed.
///
/// Assumes every dependency id exists (checked by the caller).
pub(super) fn topological_order(modules: &BTreeMap<String, Module>) -> Result<Vec<String>> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (id, module) in modules {
        let deps: BTreeSet<&str> = module.depends_on_ids.iter().map(String::as_str).collect();
        pending.insert(id.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(modules.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        pending.remove(id);
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if pending.is_empty() {
        return Ok(order);
    }

    let remaining: BTreeSet<&str> = pending.into_keys().collect();
    Err(HotbundleError::ManifestCycle(cycle_members(modules, remaining)))
}

/// Narrow the unsorted remainder down to modules that sit on a cycle.
///
/// The remainder also holds modules that depend on a cycle or link two
/// cycles without being on either. A module is on a cycle exactly when it
/// can reach itself through its dependencies.
fn cycle_members(modules: &BTreeMap<String, Module>, remaining: BTreeSet<&str>) -> Vec<String> {
    let edges: BTreeMap<&str, Vec<&str>> = remaining
        .iter()
        .map(|id| {
            let deps = modules
                .get(*id)
                .into_iter()
                .flat_map(|m| m.depends_on_ids.iter().map(String::as_str))
                .filter(|dep| remaining.contains(dep))
                .collect();
            (*id, deps)
        })
        .collect();

    remaining
        .iter()
        .filter(|id| reaches_itself(&edges, id))
        .map(|id| id.to_string())
        .collect()
}

fn reaches_itself(edges: &BTreeMap<&str, Vec<&str>>, start: &str) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = edges.get(start).cloned().unwrap_or_default();
    while let Some(id) = stack.pop() {
        if id == start {
            return true;
        }
        if seen.insert(id) {
            stack.extend(edges.get(id).into_iter().flatten().copied());
        }
    }
    false
}
