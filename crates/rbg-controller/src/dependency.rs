//! Role dependency ordering
//!
//! Roles are visited in lexicographic order and each role's dependencies in
//! declared order, so the resulting topological order is stable across runs.
//! Traversal is an iterative depth-first search over integer-indexed roles.

use crate::error::ValidationError;
use rbg_types::{RoleGroup, RoleSpec};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Topologically order roles so every dependency precedes its dependents.
///
/// Fails with `UnknownDependency` when a dependency names no role and with
/// `CycleDetected` (carrying the offending path) when the graph has a cycle.
pub fn resolve_order(
    dependencies: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>, ValidationError> {
    let names: Vec<&String> = dependencies.keys().collect();
    let index: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let mut edges: Vec<Vec<usize>> = Vec::with_capacity(names.len());
    for (role, deps) in dependencies {
        let mut targets = Vec::with_capacity(deps.len());
        for dep in deps {
            let target = index
                .get(dep.as_str())
                .ok_or_else(|| ValidationError::UnknownDependency {
                    role: role.clone(),
                    dependency: dep.clone(),
                })?;
            targets.push(*target);
        }
        edges.push(targets);
    }

    let mut visiting = vec![false; names.len()];
    let mut done = vec![false; names.len()];
    let mut order = Vec::with_capacity(names.len());
    // (node, index of the next edge to follow)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..names.len() {
        if done[root] {
            continue;
        }
        visiting[root] = true;
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(&child) = edges[node].get(top.1) {
                top.1 += 1;
                if done[child] {
                    continue;
                }
                if visiting[child] {
                    let start = stack
                        .iter()
                        .position(|(n, _)| *n == child)
                        .unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|(n, _)| names[*n].clone()).collect();
                    path.push(names[child].clone());
                    return Err(ValidationError::CycleDetected { path });
                }
                visiting[child] = true;
                stack.push((child, 0));
            } else {
                stack.pop();
                visiting[node] = false;
                done[node] = true;
                order.push(names[node].clone());
            }
        }
    }

    Ok(order)
}

/// Order a group's roles for convergence
pub fn sort_roles(group: &RoleGroup) -> Result<Vec<&RoleSpec>, ValidationError> {
    let mut seen = HashSet::new();
    for role in &group.spec.roles {
        if !seen.insert(role.name.as_str()) {
            return Err(ValidationError::DuplicateRole(role.name.clone()));
        }
    }

    let order = resolve_order(&group.dependency_map())?;
    Ok(order.iter().filter_map(|name| group.role(name)).collect())
}
