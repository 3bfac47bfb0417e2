//! Dependency graph over the futures of one composition.
//!
//! Edges point from a dependency to its dependents ("must complete
//! before"). The graph is validated once per composition: every edge
//! endpoint must exist in the registry and the graph must be acyclic.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::BuildError;
use crate::future::FutureRegistry;
use crate::types::FutureId;

/// Validated, acyclic dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: BTreeMap<FutureId, BTreeSet<FutureId>>,
    dependents: BTreeMap<FutureId, BTreeSet<FutureId>>,
    order: Vec<FutureId>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Derive edges from data references and ordering hints, then check
    /// for unknown ids and cycles.
    pub fn build(registry: &FutureRegistry) -> Result<Self, BuildError> {
        let mut dependencies = BTreeMap::new();
        let mut dependents: BTreeMap<FutureId, BTreeSet<FutureId>> = BTreeMap::new();

        for future in registry.iter() {
            let deps = future.depends_on();
            for dep in &deps {
                if !registry.contains(dep) {
                    return Err(BuildError::UnknownFuture {
                        from: future.id.clone(),
                        missing: dep.clone(),
                    });
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(future.id.clone());
            }
            dependencies.insert(future.id.clone(), deps);
        }

        let order = topological_order(&dependencies)?;
        debug!(nodes = order.len(), "dependency graph built");

        Ok(Self {
            dependencies,
            dependents,
            order,
        })
    }

    /// Futures `id` must wait for.
    pub fn dependencies(&self, id: &FutureId) -> impl Iterator<Item = &FutureId> {
        self.dependencies.get(id).into_iter().flatten()
    }

    /// Futures waiting on `id`.
    pub fn dependents(&self, id: &FutureId) -> impl Iterator<Item = &FutureId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// A valid topological order; dependencies always come first.
    pub fn order(&self) -> &[FutureId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every transitive dependent of `id`.
    pub fn descendants(&self, id: &FutureId) -> BTreeSet<FutureId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&FutureId> = self.dependents(id).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Group futures into batches whose members are independent of each
    /// other; each batch only depends on earlier ones.
    pub fn batches(&self) -> Vec<Vec<FutureId>> {
        let mut depth: BTreeMap<&FutureId, usize> = BTreeMap::new();
        for id in &self.order {
            let level = self
                .dependencies(id)
                .filter_map(|dep| depth.get(dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id, level);
        }
        let mut batches: Vec<Vec<FutureId>> = Vec::new();
        for (id, level) in depth {
            if batches.len() <= level {
                batches.resize_with(level + 1, Vec::new);
            }
            batches[level].push(id.clone());
        }
        batches
    }
}

/// Depth-first traversal with an in-progress marker set. Revisiting an
/// in-progress node reports the members of that cycle.
fn topological_order(
    dependencies: &BTreeMap<FutureId, BTreeSet<FutureId>>,
) -> Result<Vec<FutureId>, BuildError> {
    let mut marks: BTreeMap<&FutureId, Mark> = BTreeMap::new();
    let mut order = Vec::with_capacity(dependencies.len());

    for root in dependencies.keys() {
        if marks.contains_key(root) {
            continue;
        }
        // (node, next child index) pairs; `path` mirrors the in-progress chain.
        let mut stack: Vec<(&FutureId, Vec<&FutureId>)> = Vec::new();
        let mut path: Vec<&FutureId> = Vec::new();
        marks.insert(root, Mark::InProgress);
        path.push(root);
        stack.push((root, children(dependencies, root)));

        while let Some((node, pending)) = stack.last_mut() {
            let node = *node;
            match pending.pop() {
                Some(child) => match marks.get(child) {
                    Some(Mark::Done) => {}
                    Some(Mark::InProgress) => {
                        let start = path.iter().position(|p| *p == child).unwrap_or(0);
                        let mut members: Vec<FutureId> =
                            path[start..].iter().map(|id| (*id).clone()).collect();
                        members.push(child.clone());
                        return Err(BuildError::CycleDetected { members });
                    }
                    None => {
                        marks.insert(child, Mark::InProgress);
                        path.push(child);
                        stack.push((child, children(dependencies, child)));
                    }
                },
                None => {
                    marks.insert(node, Mark::Done);
                    path.pop();
                    stack.pop();
                    order.push(node.clone());
                }
            }
        }
    }

    Ok(order)
}

fn children<'a>(
    dependencies: &'a BTreeMap<FutureId, BTreeSet<FutureId>>,
    id: &FutureId,
) -> Vec<&'a FutureId> {
    // Reversed so popping visits dependencies in id order.
    dependencies
        .get(id)
        .map(|deps| deps.iter().rev().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::{Argument, Future, Payload, Sender};

    fn deploy(id: &str, deps: &[&str]) -> Future {
        Future {
            id: FutureId::new(id),
            payload: Payload::Deployment {
                contract: id.to_string(),
                args: deps
                    .iter()
                    .map(|d| Argument::Future(FutureId::new(*d)))
                    .collect(),
                from: Sender::Default,
                value: 0,
            },
            after: BTreeSet::new(),
        }
    }

    fn registry(futures: Vec<Future>) -> FutureRegistry {
        let mut registry = FutureRegistry::new();
        for future in futures {
            registry.insert(future).unwrap();
        }
        registry
    }

    fn position(order: &[FutureId], id: &str) -> usize {
        order.iter().position(|f| f.as_str() == id).unwrap()
    }

    #[test]
    fn order_respects_every_edge() {
        let graph = DependencyGraph::build(&registry(vec![
            deploy("M#d", &["M#b", "M#c"]),
            deploy("M#c", &["M#a"]),
            deploy("M#b", &["M#a"]),
            deploy("M#a", &[]),
        ]))
        .unwrap();
        let order = graph.order();
        assert!(position(order, "M#a") < position(order, "M#b"));
        assert!(position(order, "M#a") < position(order, "M#c"));
        assert!(position(order, "M#b") < position(order, "M#d"));
        assert!(position(order, "M#c") < position(order, "M#d"));
    }

    #[test]
    fn cycle_is_reported_with_members() {
        let err = DependencyGraph::build(&registry(vec![
            deploy("M#a", &["M#c"]),
            deploy("M#b", &["M#a"]),
            deploy("M#c", &["M#b"]),
            deploy("M#z", &[]),
        ]))
        .unwrap_err();
        let BuildError::CycleDetected { members } = err else {
            panic!("expected cycle");
        };
        assert_eq!(members.first(), members.last());
        assert_eq!(members.len(), 4);
        assert!(!members.iter().any(|m| m.as_str() == "M#z"));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let err = DependencyGraph::build(&registry(vec![deploy("M#a", &["M#a"])])).unwrap_err();
        assert!(matches!(err, BuildError::CycleDetected { .. }));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = DependencyGraph::build(&registry(vec![deploy("M#a", &["M#ghost"])])).unwrap_err();
        assert!(matches!(err, BuildError::UnknownFuture { missing, .. } if missing.as_str() == "M#ghost"));
    }

    #[test]
    fn after_hints_create_edges() {
        let mut late = deploy("M#late", &[]);
        late.after.insert(FutureId::new("M#early"));
        let graph = DependencyGraph::build(&registry(vec![late, deploy("M#early", &[])])).unwrap();
        let order = graph.order();
        assert!(position(order, "M#early") < position(order, "M#late"));
    }

    #[test]
    fn batches_group_independent_futures() {
        let graph = DependencyGraph::build(&registry(vec![
            deploy("M#a", &[]),
            deploy("M#b", &[]),
            deploy("M#c", &["M#a", "M#b"]),
        ]))
        .unwrap();
        let batches = graph.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1], vec![FutureId::new("M#c")]);
    }

    #[test]
    fn descendants_are_transitive() {
        let graph = DependencyGraph::build(&registry(vec![
            deploy("M#a", &[]),
            deploy("M#b", &["M#a"]),
            deploy("M#c", &["M#b"]),
            deploy("M#x", &[]),
        ]))
        .unwrap();
        let descendants = graph.descendants(&FutureId::new("M#a"));
        assert_eq!(descendants.len(), 2);
        assert!(!descendants.contains(&FutureId::new("M#x")));
    }
}
