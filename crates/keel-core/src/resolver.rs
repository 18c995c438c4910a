//! Dependency resolution.
//!
//! Turns a [`Discovery`] into one deterministic initialization order. The
//! sort is Kahn's algorithm with the ready set ordered by
//! `(priority, discovery index)`, so independent systems come out by
//! ascending priority and equal priorities keep declaration order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, warn};

use keel_protocols::{AliasConflict, KernelError, MissingEdge, SystemKey};

use crate::catalog::{Discovery, SkipReason, SkippedSystem};
use crate::descriptor::SystemDescriptor;

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;

/// A resolved startup plan.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Descriptors in initialization order.
    pub order: Vec<SystemDescriptor>,
    /// Everything discovery or the cascade left out.
    pub skipped: Vec<SkippedSystem>,
}

impl Resolution {
    pub fn names(&self) -> Vec<&'static str> {
        self.order.iter().map(SystemDescriptor::name).collect()
    }
}

/// Resolve the initialization order.
///
/// Checks run in this order, each reporting every offender it finds:
/// duplicate aliases, dependencies with no descriptor at all, then cycles.
/// A dependency on a descriptor that exists but was filtered out disables
/// the dependent instead of failing. A dependency on a contract is an edge
/// to the first enabled descriptor providing it.
pub fn resolve(discovery: &Discovery) -> Result<Resolution, KernelError> {
    let candidates = &discovery.candidates;

    check_aliases(candidates)?;
    check_missing(discovery)?;

    let mut skipped: Vec<SkippedSystem> = discovery
        .filtered
        .iter()
        .map(|(descriptor, reason)| SkippedSystem {
            name: descriptor.name().to_string(),
            reason: reason.clone(),
        })
        .collect();

    let enabled = cascade_disable(discovery, &mut skipped);

    let mut index: HashMap<SystemKey, usize> = enabled
        .iter()
        .enumerate()
        .map(|(i, descriptor)| (descriptor.key(), i))
        .collect();
    for (i, descriptor) in enabled.iter().enumerate() {
        for contract in descriptor.contracts() {
            index.entry(contract.key()).or_insert(i);
        }
    }

    let mut indegree = vec![0usize; enabled.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); enabled.len()];
    for (i, descriptor) in enabled.iter().enumerate() {
        for dep in descriptor.dependencies() {
            if let Some(&j) = index.get(dep) {
                indegree[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let mut ready: BTreeSet<(i32, usize)> = indegree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| (enabled[i].priority(), i))
        .collect();

    let mut order = Vec::with_capacity(enabled.len());
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &k in &dependents[i] {
            indegree[k] -= 1;
            if indegree[k] == 0 {
                ready.insert((enabled[k].priority(), k));
            }
        }
    }

    if order.len() < enabled.len() {
        let systems = cycle_members(&enabled, &indegree, &dependents);
        return Err(KernelError::DependencyCycle { systems });
    }

    let order: Vec<SystemDescriptor> = order.into_iter().map(|i| enabled[i].clone()).collect();
    debug!(
        order = ?order.iter().map(SystemDescriptor::name).collect::<Vec<_>>(),
        skipped = skipped.len(),
        "Dependency order resolved"
    );

    Ok(Resolution { order, skipped })
}

fn check_aliases(candidates: &[SystemDescriptor]) -> Result<(), KernelError> {
    let mut owners: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for descriptor in candidates {
        if let Some(alias) = descriptor.alias() {
            owners
                .entry(alias)
                .or_default()
                .push(descriptor.name().to_string());
        }
    }

    let conflicts: Vec<AliasConflict> = owners
        .into_iter()
        .filter(|(_, systems)| systems.len() > 1)
        .map(|(alias, systems)| AliasConflict {
            alias: alias.to_string(),
            systems,
        })
        .collect();

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(KernelError::DuplicateAlias { conflicts })
    }
}

fn check_missing(discovery: &Discovery) -> Result<(), KernelError> {
    let declared: HashSet<SystemKey> = discovery
        .candidates
        .iter()
        .chain(discovery.filtered.iter().map(|(d, _)| d))
        .flat_map(|d| std::iter::once(d.key()).chain(d.contracts().iter().map(|c| c.key())))
        .collect();

    let edges: Vec<MissingEdge> = discovery
        .candidates
        .iter()
        .flat_map(|descriptor| {
            descriptor
                .dependencies()
                .iter()
                .filter(|dep| !declared.contains(*dep))
                .map(move |dep| MissingEdge::new(descriptor.name(), dep.short_name()))
        })
        .collect();

    if edges.is_empty() {
        Ok(())
    } else {
        Err(KernelError::MissingDependency { edges })
    }
}

/// Drop every candidate that transitively depends on a filtered descriptor.
///
/// Every dependency is declared somewhere once `check_missing` passes, so
/// one that no enabled candidate satisfies was filtered out or cascaded.
fn cascade_disable<'a>(
    discovery: &'a Discovery,
    skipped: &mut Vec<SkippedSystem>,
) -> Vec<&'a SystemDescriptor> {
    let mut enabled: Vec<&SystemDescriptor> = discovery.candidates.iter().collect();

    loop {
        let mut changed = false;
        let mut i = 0;
        while i < enabled.len() {
            let descriptor = enabled[i];
            let unmet = descriptor
                .dependencies()
                .iter()
                .find(|dep| !enabled.iter().any(|other| other.satisfies(dep)))
                .copied();
            let Some(dep) = unmet else {
                i += 1;
                continue;
            };
            warn!(
                system = descriptor.name(),
                dependency = dep.short_name(),
                "System disabled because its dependency is disabled"
            );
            skipped.push(SkippedSystem {
                name: descriptor.name().to_string(),
                reason: SkipReason::DependencyDisabled(dep.short_name().to_string()),
            });
            enabled.remove(i);
            changed = true;
        }
        if !changed {
            return enabled;
        }
    }
}

/// Nodes left after Kahn's algorithm either sit on a cycle or depend on one.
/// Repeatedly dropping nodes that nothing left depends on keeps only the
/// cycle members.
fn cycle_members(
    enabled: &[&SystemDescriptor],
    indegree: &[usize],
    dependents: &[Vec<usize>],
) -> Vec<String> {
    let mut remaining: Vec<bool> = indegree.iter().map(|degree| *degree > 0).collect();

    loop {
        let mut changed = false;
        for i in 0..remaining.len() {
            if remaining[i] && !dependents[i].iter().any(|&k| remaining[k]) {
                remaining[i] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    enabled
        .iter()
        .zip(remaining)
        .filter(|(_, on_cycle)| *on_cycle)
        .map(|(descriptor, _)| descriptor.name().to_string())
        .collect()
}
