//! The task DAG.
//!
//! Thin wrapper over `petgraph` keyed by atom id. Validates decomposition
//! output (unknown edges, cycles), assigns Kahn levels, and answers the
//! scheduler's readiness and cascade queries.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::atom::{Atom, AtomStatus};
use crate::error::{Error, Result};

/// Dependency graph over atom ids. Edges point from a dependency to its
/// dependent, so traversal in edge direction walks "downstream".
#[derive(Clone, Debug)]
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    indices: BTreeMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Build and validate the graph: every referenced dependency must exist
    /// and the relation must be acyclic.
    pub fn build(atoms: &[Atom]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut indices = BTreeMap::new();

        for atom in atoms {
            let idx = graph.add_node(atom.id.clone());
            indices.insert(atom.id.clone(), idx);
        }

        for atom in atoms {
            let &to = indices
                .get(&atom.id)
                .unwrap_or_else(|| unreachable!("node registered above"));
            for dep in &atom.dependencies {
                let Some(&from) = indices.get(dep) else {
                    return Err(Error::UnknownDependency {
                        atom: atom.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.add_edge(from, to, ());
            }
        }

        let built = Self { graph, indices };
        built.assert_acyclic()?;
        Ok(built)
    }

    fn assert_acyclic(&self) -> Result<()> {
        toposort(&self.graph, None).map_err(|cycle| Error::CycleDetected {
            atom: self.graph[cycle.node_id()].clone(),
        })?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    /// Direct dependencies of an atom, in id order.
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        let Some(&idx) = self.indices.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect();
        deps.sort();
        deps
    }

    /// Kahn level per atom: roots are level 0, every other atom sits one
    /// past its deepest dependency.
    pub fn levels(&self) -> BTreeMap<String, usize> {
        let mut indegree: BTreeMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();
        let mut levels: BTreeMap<String, usize> = BTreeMap::new();
        let mut queue: VecDeque<NodeIndex> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        for &n in &queue {
            levels.insert(self.graph[n].clone(), 0);
        }

        while let Some(node) = queue.pop_front() {
            let level = levels[&self.graph[node]];
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let entry = levels.entry(self.graph[next].clone()).or_insert(0);
                *entry = (*entry).max(level + 1);
                let remaining = indegree
                    .get_mut(&next)
                    .unwrap_or_else(|| unreachable!("indegree seeded for every node"));
                *remaining -= 1;
                if *remaining == 0 {
                    queue.push_back(next);
                }
            }
        }

        levels
    }

    /// Atoms that are `Pending` with every dependency `Completed`, in id
    /// order. The scheduler re-sorts by dispatch key.
    pub fn ready(&self, statuses: &BTreeMap<String, AtomStatus>) -> Vec<String> {
        self.indices
            .keys()
            .filter(|id| {
                statuses.get(*id) == Some(&AtomStatus::Pending)
                    && self
                        .dependencies_of(id)
                        .iter()
                        .all(|dep| statuses.get(dep) == Some(&AtomStatus::Completed))
            })
            .cloned()
            .collect()
    }

    /// Every atom downstream of `id`, transitively.
    pub fn dependents_transitive(&self, id: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let Some(&start) = self.indices.get(id) else {
            return result;
        };
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if result.insert(self.graph[next].clone()) {
                    queue.push_back(next);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AtomKind, Layer};
    use pretty_assertions::assert_eq;

    fn atom(id: &str, deps: &[&str]) -> Atom {
        let mut a = Atom::new(id, AtomKind::Implementation, Layer::Core, "Services", id);
        for dep in deps {
            a.dependencies.insert((*dep).to_string());
        }
        a
    }

    fn chain() -> Vec<Atom> {
        vec![atom("a", &[]), atom("b", &["a"]), atom("c", &["b"])]
    }

    #[test]
    fn builds_a_linear_chain() {
        let graph = TaskGraph::build(&chain()).expect("build");
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies_of("c"), vec!["b".to_string()]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let atoms = vec![atom("a", &["ghost"])];
        let err = TaskGraph::build(&atoms).expect_err("should fail");
        assert!(matches!(
            err,
            Error::UnknownDependency { atom, dependency }
                if atom == "a" && dependency == "ghost"
        ));
    }

    #[test]
    fn two_node_cycle_is_rejected() {
        let atoms = vec![atom("a", &["b"]), atom("b", &["a"])];
        let err = TaskGraph::build(&atoms).expect_err("should fail");
        assert!(matches!(err, Error::CycleDetected { .. }));
    }

    #[test]
    fn levels_follow_the_deepest_path() {
        let atoms = vec![
            atom("a", &[]),
            atom("b", &[]),
            atom("c", &["a", "b"]),
            atom("d", &["c"]),
        ];
        let graph = TaskGraph::build(&atoms).expect("build");
        let levels = graph.levels();
        assert_eq!(levels["a"], 0);
        assert_eq!(levels["b"], 0);
        assert_eq!(levels["c"], 1);
        assert_eq!(levels["d"], 2);
    }

    #[test]
    fn ready_requires_completed_dependencies() {
        let graph = TaskGraph::build(&chain()).expect("build");
        let mut statuses: BTreeMap<String, AtomStatus> = BTreeMap::from([
            ("a".to_string(), AtomStatus::Pending),
            ("b".to_string(), AtomStatus::Pending),
            ("c".to_string(), AtomStatus::Pending),
        ]);
        assert_eq!(graph.ready(&statuses), vec!["a".to_string()]);

        statuses.insert("a".to_string(), AtomStatus::Completed);
        assert_eq!(graph.ready(&statuses), vec!["b".to_string()]);

        statuses.insert("b".to_string(), AtomStatus::Failed);
        assert!(graph.ready(&statuses).is_empty());
    }

    #[test]
    fn transitive_dependents_cascade() {
        let graph = TaskGraph::build(&chain()).expect("build");
        let downstream = graph.dependents_transitive("a");
        assert_eq!(
            downstream,
            BTreeSet::from(["b".to_string(), "c".to_string()])
        );
        assert!(graph.dependents_transitive("c").is_empty());
    }
}
