//! Dependency graph over pending work items

use crate::error::{HandoffError, StallCause};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use relay_core::{Ledger, WorkItem};
use std::collections::{HashMap, HashSet};

/// Pending items of a ledger with `dependency -> dependent` edges
///
/// Built from a snapshot; nodes borrow their ids from the ledger.
#[derive(Debug)]
pub struct DependencyGraph<'a> {
    ledger: &'a Ledger,
    done: HashSet<&'a str>,
    /// Pending items, declaration order
    pending: Vec<&'a WorkItem>,
    graph: DiGraphMap<&'a str, ()>,
    /// Pending items with a dependency that is neither done nor declared
    unresolvable: HashSet<&'a str>,
}

impl<'a> DependencyGraph<'a> {
    #[must_use]
    pub fn new(ledger: &'a Ledger) -> Self {
        let done = ledger.completed_items();
        let pending: Vec<&WorkItem> = ledger
            .work_items
            .iter()
            .filter(|item| !done.contains(item.item_id.as_str()))
            .collect();

        let mut graph = DiGraphMap::new();
        let mut unresolvable = HashSet::new();
        for item in &pending {
            graph.add_node(item.item_id.as_str());
        }
        for item in &pending {
            for dep in &item.depends_on {
                let dep = dep.as_str();
                if done.contains(dep) {
                    continue;
                }
                if graph.contains_node(dep) {
                    graph.add_edge(dep, item.item_id.as_str(), ());
                } else {
                    unresolvable.insert(item.item_id.as_str());
                }
            }
        }

        Self {
            ledger,
            done,
            pending,
            graph,
            unresolvable,
        }
    }

    /// Items not yet done
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether pending items depend on each other in a loop
    #[cfg(test)]
    fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Pending items whose dependencies are all done
    #[must_use]
    pub fn ready(&self) -> Vec<&'a str> {
        self.pending
            .iter()
            .map(|item| item.item_id.as_str())
            .filter(|id| self.is_ready(id))
            .collect()
    }

    /// Successive waves of parallel-eligible items
    ///
    /// # Errors
    /// `Stalled` if some pending item can never be scheduled.
    pub fn waves(&self) -> Result<Vec<Vec<&'a str>>, HandoffError> {
        let position: HashMap<&str, usize> = self
            .pending
            .iter()
            .enumerate()
            .map(|(i, item)| (item.item_id.as_str(), i))
            .collect();
        let mut in_degree: HashMap<&str, usize> = self
            .graph
            .nodes()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut placed: HashSet<&str> = HashSet::new();
        let mut waves = Vec::new();
        let mut wave = self.ready();

        while !wave.is_empty() {
            let mut next = Vec::new();
            for &id in &wave {
                placed.insert(id);
                for dependent in self.graph.neighbors_directed(id, Direction::Outgoing) {
                    let degree = in_degree.entry(dependent).or_default();
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 && !self.unresolvable.contains(dependent) {
                        next.push(dependent);
                    }
                }
            }
            next.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
            next.dedup();
            waves.push(wave);
            wave = next;
        }

        let stuck = self
            .pending
            .iter()
            .map(|item| item.item_id.as_str())
            .find(|id| !placed.contains(id));
        match stuck {
            Some(start) => {
                let mut satisfied = self.done.clone();
                satisfied.extend(placed);
                Err(self.diagnose(start, &satisfied))
            }
            None => Ok(waves),
        }
    }

    /// Walk first unmet dependencies from `start` until the chain
    /// re-enters itself or leaves the declared items
    #[must_use]
    pub fn diagnose(&self, start: &str, satisfied: &HashSet<&str>) -> HandoffError {
        let mut chain = vec![start.to_string()];
        let mut current = start;

        loop {
            let next = self
                .ledger
                .work_item(current)
                .and_then(|item| {
                    item.depends_on
                        .iter()
                        .find(|dep| !satisfied.contains(dep.as_str()))
                });

            let Some(dep) = next else {
                // only reachable if `start` was in fact eligible
                return HandoffError::Stalled {
                    chain,
                    cause: StallCause::UnresolvedDependency,
                };
            };

            let seen = chain.iter().any(|c| c == dep);
            chain.push(dep.clone());
            if seen {
                return HandoffError::Stalled {
                    chain,
                    cause: StallCause::Cycle,
                };
            }
            if self.ledger.work_item(dep).is_none() {
                return HandoffError::Stalled {
                    chain,
                    cause: StallCause::UnresolvedDependency,
                };
            }
            current = dep.as_str();
        }
    }

    fn is_ready(&self, id: &str) -> bool {
        !self.unresolvable.contains(id)
            && self
                .graph
                .neighbors_directed(id, Direction::Incoming)
                .next()
                .is_none()
    }
}
