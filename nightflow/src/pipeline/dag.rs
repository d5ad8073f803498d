//! Dependency graph resolver.
//!
//! Holds the static task graph of one pipeline. All structural validation
//! (duplicates, dangling predecessors, cycles) happens in
//! [`DependencyGraph::build`], so a constructed graph is always a DAG.

use crate::errors::DefinitionError;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A validated directed acyclic graph of task names.
///
/// Nodes keep their declared order; every query that returns several nodes
/// returns them in that order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pipeline: String,
    names: Vec<String>,
    index: HashMap<String, usize>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    execution_order: Vec<usize>,
}

impl DependencyGraph {
    /// Builds and validates a graph from `(task, predecessors)` pairs in
    /// declared order.
    ///
    /// Repeated predecessors of one task are collapsed.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] for duplicate task names,
    /// self-dependencies, predecessors that name no task of this pipeline,
    /// and cycles.
    pub fn build(
        pipeline: impl Into<String>,
        nodes: &[(String, Vec<String>)],
    ) -> Result<Self, DefinitionError> {
        let pipeline = pipeline.into();
        let mut index = HashMap::with_capacity(nodes.len());
        let mut names = Vec::with_capacity(nodes.len());

        for (name, _) in nodes {
            if index.insert(name.clone(), names.len()).is_some() {
                return Err(DefinitionError::DuplicateTask {
                    pipeline,
                    task: name.clone(),
                });
            }
            names.push(name.clone());
        }

        let mut predecessors = vec![Vec::new(); names.len()];
        let mut successors = vec![Vec::new(); names.len()];
        for (position, (name, deps)) in nodes.iter().enumerate() {
            for dep in deps {
                if dep == name {
                    return Err(DefinitionError::SelfDependency {
                        pipeline,
                        task: name.clone(),
                    });
                }
                let Some(&dep_index) = index.get(dep) else {
                    return Err(DefinitionError::MissingDependency {
                        pipeline,
                        task: name.clone(),
                        dependency: dep.clone(),
                    });
                };
                if !predecessors[position].contains(&dep_index) {
                    predecessors[position].push(dep_index);
                    successors[dep_index].push(position);
                }
            }
        }

        let mut graph = Self {
            pipeline,
            names,
            index,
            predecessors,
            successors,
            execution_order: Vec::new(),
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(DefinitionError::Cycle {
                pipeline: graph.pipeline,
                path: cycle,
            });
        }

        graph.execution_order = graph.topological_order();
        Ok(graph)
    }

    /// Returns the owning pipeline's name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns node names in declared order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns true if the graph contains `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the direct predecessors of `name`, or an empty list if unknown.
    #[must_use]
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| self.resolve(&self.predecessors[i]))
            .unwrap_or_default()
    }

    /// Returns the direct successors of `name` in declared order.
    #[must_use]
    pub fn successors(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                let mut succ = self.successors[i].clone();
                succ.sort_unstable();
                self.resolve(&succ)
            })
            .unwrap_or_default()
    }

    /// Returns nodes without predecessors.
    #[must_use]
    pub fn roots(&self) -> Vec<&str> {
        self.names
            .iter()
            .enumerate()
            .filter(|(i, _)| self.predecessors[*i].is_empty())
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// Returns a topological order, ties broken by declared order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.resolve(&self.execution_order)
    }

    /// Returns the nodes that are unblocked and not yet attempted.
    ///
    /// A node is unblocked when every predecessor is in `succeeded`. Nodes in
    /// `attempted` are excluded whatever their outcome.
    #[must_use]
    pub fn ready(&self, succeeded: &HashSet<String>, attempted: &HashSet<String>) -> Vec<&str> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, name)| !attempted.contains(name.as_str()))
            .filter(|(i, _)| {
                self.predecessors[*i]
                    .iter()
                    .all(|&p| succeeded.contains(self.names[p].as_str()))
            })
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// Returns every node reachable from `name` through successor edges.
    #[must_use]
    pub fn descendants(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut stack = self.successors[start].clone();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.successors[node].iter().copied());
            }
        }
        seen.into_iter().map(|i| self.names[i].as_str()).collect()
    }

    fn resolve(&self, indices: &[usize]) -> Vec<&str> {
        indices.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Depth-first search over predecessor edges, visiting roots of the
    /// search in declared order. Returns the cycle in execution direction.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = vec![false; self.names.len()];
        let mut on_stack = vec![false; self.names.len()];
        let mut path = Vec::new();

        for node in 0..self.names.len() {
            if !visited[node] {
                if let Some(cycle) = self.dfs_cycle(node, &mut visited, &mut on_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: usize,
        visited: &mut [bool],
        on_stack: &mut [bool],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        visited[node] = true;
        on_stack[node] = true;
        path.push(node);

        for &dep in &self.predecessors[node] {
            if !visited[dep] {
                if let Some(cycle) = self.dfs_cycle(dep, visited, on_stack, path) {
                    return Some(cycle);
                }
            } else if on_stack[dep] {
                let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .rev()
                    .map(|&i| self.names[i].clone())
                    .collect();
                cycle.insert(0, self.names[dep].clone());
                return Some(cycle);
            }
        }

        path.pop();
        on_stack[node] = false;
        None
    }

    /// Kahn's algorithm; the ready set is ordered by declared index.
    fn topological_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.names.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &succ in &self.successors[node] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nodes(spec: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        spec.iter()
            .map(|(name, deps)| {
                (
                    (*name).to_string(),
                    deps.iter().map(|d| (*d).to_string()).collect(),
                )
            })
            .collect()
    }

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    fn diamond() -> DependencyGraph {
        DependencyGraph::build(
            "diamond",
            &nodes(&[
                ("extract", &[]),
                ("left", &["extract"]),
                ("right", &["extract"]),
                ("join", &["left", "right"]),
                ("audit", &[]),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_linear_chain_order() {
        let graph = DependencyGraph::build(
            "staging",
            &nodes(&[("debug", &[]), ("test", &["debug"]), ("run", &["test"])]),
        )
        .unwrap();

        assert_eq!(graph.execution_order(), vec!["debug", "test", "run"]);
        assert_eq!(graph.roots(), vec!["debug"]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_ready_requires_all_predecessors_succeeded() {
        let graph = diamond();

        assert_eq!(graph.ready(&set(&[]), &set(&[])), vec!["extract", "audit"]);
        assert_eq!(
            graph.ready(&set(&["extract"]), &set(&["extract", "audit"])),
            vec!["left", "right"]
        );
        assert_eq!(
            graph.ready(&set(&["extract", "left"]), &set(&["extract", "audit", "left", "right"])),
            Vec::<&str>::new()
        );
        assert_eq!(
            graph.ready(
                &set(&["extract", "left", "right"]),
                &set(&["extract", "audit", "left", "right"])
            ),
            vec!["join"]
        );
    }

    #[test]
    fn test_ready_never_releases_after_failed_predecessor() {
        let graph = diamond();
        // "left" was attempted but did not succeed.
        let ready = graph.ready(
            &set(&["extract", "right", "audit"]),
            &set(&["extract", "left", "right", "audit"]),
        );
        assert!(ready.is_empty());
    }

    #[test]
    fn test_execution_order_ties_follow_declaration() {
        let graph = DependencyGraph::build(
            "fan",
            &nodes(&[("b", &["a"]), ("a", &[]), ("c", &["a"]), ("d", &[])]),
        )
        .unwrap();
        assert_eq!(graph.execution_order(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_descendants_and_successors() {
        let graph = diamond();
        assert_eq!(graph.descendants("extract"), vec!["left", "right", "join"]);
        assert_eq!(graph.descendants("join"), Vec::<&str>::new());
        assert_eq!(graph.successors("extract"), vec!["left", "right"]);
        assert_eq!(graph.predecessors("join"), vec!["left", "right"]);
    }

    #[test]
    fn test_duplicate_predecessors_collapse() {
        let graph =
            DependencyGraph::build("p", &nodes(&[("a", &[]), ("b", &["a", "a"])])).unwrap();
        assert_eq!(graph.predecessors("b"), vec!["a"]);
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let err = DependencyGraph::build(
            "loop",
            &nodes(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]),
        )
        .unwrap_err();

        assert_eq!(
            err,
            DefinitionError::Cycle {
                pipeline: "loop".to_string(),
                path: vec!["a".into(), "b".into(), "c".into(), "a".into()],
            }
        );
    }

    #[test]
    fn test_missing_dependency() {
        let err = DependencyGraph::build("p", &nodes(&[("a", &["ghost"])])).unwrap_err();
        assert_eq!(err.code(), "DEF-MISSING-DEP");
    }

    #[test]
    fn test_self_dependency_and_duplicates() {
        let err = DependencyGraph::build("p", &nodes(&[("a", &["a"])])).unwrap_err();
        assert_eq!(err.code(), "DEF-SELF-DEP");

        let err = DependencyGraph::build("p", &nodes(&[("a", &[]), ("a", &[])])).unwrap_err();
        assert_eq!(err.code(), "DEF-DUPLICATE");
    }
}
