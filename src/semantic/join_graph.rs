//! Join-path resolution over the cube graph.
//!
//! Cubes and their declared joins form a directed graph; multi-cube
//! queries need a deterministic join order from the primary cube to every
//! other referenced cube. BFS finds the shortest path, with neighbors
//! visited in lexicographic order so equal-length paths always tie-break
//! the same way (same query, same SQL). Cycles are legal: the visited set
//! halts traversal.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{CompilerError, CompilerResult};
use crate::model::CubeJoin;
use crate::registry::CubeRegistry;

/// One join along a resolved path.
#[derive(Debug, Clone)]
pub struct JoinStep {
    pub from_cube: String,
    pub to_cube: String,
    pub join: CubeJoin,
}

/// Parent information for path reconstruction: the parent node and the
/// edge used to reach the current node.
struct ParentInfo {
    parent: NodeIndex,
    edge_idx: EdgeIndex,
}

/// Graph representation of the registry's cubes and joins.
#[derive(Debug)]
pub struct JoinGraph {
    graph: DiGraph<String, CubeJoin>,
    node_indices: HashMap<String, NodeIndex>,
}

impl JoinGraph {
    /// Build the graph from every registered cube. Joins pointing at
    /// unregistered cubes contribute no edge; paths through them simply
    /// don't exist.
    pub fn from_registry(registry: &CubeRegistry) -> Self {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();

        for cube in registry.all() {
            let idx = graph.add_node(cube.name.clone());
            node_indices.insert(cube.name.clone(), idx);
        }

        for cube in registry.all() {
            let from_idx = node_indices[&cube.name];
            let mut targets: Vec<_> = cube.joins.keys().collect();
            targets.sort();
            for target in targets {
                if let Some(&to_idx) = node_indices.get(target) {
                    graph.add_edge(from_idx, to_idx, cube.joins[target].clone());
                }
            }
        }

        Self {
            graph,
            node_indices,
        }
    }

    /// Find the shortest join path between two cubes using BFS.
    ///
    /// Uses parent pointers instead of cloning paths at each step.
    /// Neighbors are expanded in lexicographic target order, which makes
    /// the equal-length tie-break deterministic.
    pub fn find_path(&self, from: &str, to: &str) -> CompilerResult<Vec<JoinStep>> {
        if from == to {
            return Ok(vec![]);
        }

        let from_idx = self.node_index(from, to)?;
        let to_idx = self.node_index(to, to)?;

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut parents: HashMap<NodeIndex, ParentInfo> = HashMap::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();

        queue.push_back(from_idx);
        visited.insert(from_idx);

        while let Some(current) = queue.pop_front() {
            let mut neighbors: Vec<(NodeIndex, EdgeIndex)> = self
                .graph
                .edges(current)
                .map(|edge_ref| (edge_ref.target(), edge_ref.id()))
                .collect();
            neighbors.sort_by(|a, b| self.graph[a.0].cmp(&self.graph[b.0]));

            for (neighbor, edge_idx) in neighbors {
                if visited.contains(&neighbor) {
                    continue;
                }

                parents.insert(
                    neighbor,
                    ParentInfo {
                        parent: current,
                        edge_idx,
                    },
                );

                if neighbor == to_idx {
                    return Ok(self.reconstruct_path(from_idx, neighbor, &parents));
                }

                visited.insert(neighbor);
                queue.push_back(neighbor);
            }
        }

        Err(CompilerError::JoinResolution {
            from: from.into(),
            to: to.into(),
        })
    }

    /// Walk backward from destination to source using parent pointers,
    /// then reverse to get apply order.
    fn reconstruct_path(
        &self,
        from_idx: NodeIndex,
        to_idx: NodeIndex,
        parents: &HashMap<NodeIndex, ParentInfo>,
    ) -> Vec<JoinStep> {
        let mut steps = Vec::new();
        let mut current = to_idx;

        while current != from_idx {
            let info = &parents[&current];
            steps.push(JoinStep {
                from_cube: self.graph[info.parent].clone(),
                to_cube: self.graph[current].clone(),
                join: self.graph[info.edge_idx].clone(),
            });
            current = info.parent;
        }

        steps.reverse();
        steps
    }

    /// Ordered, deduplicated join steps reaching every target from the
    /// root. Targets are visited in sorted order so the resulting join
    /// list does not depend on query member ordering.
    pub fn join_tree(&self, root: &str, targets: &[String]) -> CompilerResult<Vec<JoinStep>> {
        let mut sorted_targets: Vec<&String> = targets.iter().collect();
        sorted_targets.sort();
        sorted_targets.dedup();

        let mut steps: Vec<JoinStep> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for target in sorted_targets {
            if target == root {
                continue;
            }
            for step in self.find_path(root, target)? {
                let pair = (step.from_cube.clone(), step.to_cube.clone());
                if seen.insert(pair) {
                    steps.push(step);
                }
            }
        }

        Ok(steps)
    }

    fn node_index(&self, name: &str, sought: &str) -> CompilerResult<NodeIndex> {
        self.node_indices
            .get(name)
            .copied()
            .ok_or_else(|| CompilerError::JoinResolution {
                from: name.into(),
                to: sought.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BaseQuery, Cube, CubeJoin, Measure};
    use crate::sql::query::TableRef;

    fn cube(name: &str, joins: Vec<(&str, CubeJoin)>) -> Cube {
        let mut builder = Cube::builder(name)
            .base_query(|_ctx| Ok(BaseQuery::from_table(TableRef::new("t"))))
            .measure("count", Measure::count());
        for (target, join) in joins {
            builder = builder.join(target, join);
        }
        builder.build()
    }

    fn registry() -> CubeRegistry {
        let mut registry = CubeRegistry::new();
        registry.register(cube(
            "Employees",
            vec![
                ("Departments", CubeJoin::belongs_to("department_id", "id")),
                ("Productivity", CubeJoin::has_many("id", "employee_id")),
            ],
        ));
        registry.register(cube("Departments", vec![]));
        registry.register(cube("Productivity", vec![]));
        registry.register(cube("Orphan", vec![]));
        registry
    }

    #[test]
    fn test_direct_path() {
        let graph = JoinGraph::from_registry(&registry());
        let path = graph.find_path("Employees", "Departments").unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].from_cube, "Employees");
        assert_eq!(path[0].to_cube, "Departments");
    }

    #[test]
    fn test_same_cube_is_empty_path() {
        let graph = JoinGraph::from_registry(&registry());
        assert!(graph.find_path("Employees", "Employees").unwrap().is_empty());
    }

    #[test]
    fn test_no_path_errors() {
        let graph = JoinGraph::from_registry(&registry());
        let err = graph.find_path("Employees", "Orphan").unwrap_err();
        assert!(matches!(err, CompilerError::JoinResolution { .. }));
    }

    #[test]
    fn test_transitive_path() {
        let mut registry = CubeRegistry::new();
        registry.register(cube(
            "A",
            vec![("B", CubeJoin::belongs_to("b_id", "id"))],
        ));
        registry.register(cube(
            "B",
            vec![("C", CubeJoin::belongs_to("c_id", "id"))],
        ));
        registry.register(cube("C", vec![]));

        let graph = JoinGraph::from_registry(&registry);
        let path = graph.find_path("A", "C").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].to_cube, "B");
        assert_eq!(path[1].to_cube, "C");
    }

    #[test]
    fn test_cycles_are_legal() {
        let mut registry = CubeRegistry::new();
        registry.register(cube(
            "A",
            vec![("B", CubeJoin::belongs_to("b_id", "id"))],
        ));
        registry.register(cube(
            "B",
            vec![("A", CubeJoin::has_many("id", "b_id"))],
        ));

        let graph = JoinGraph::from_registry(&registry);
        assert_eq!(graph.find_path("A", "B").unwrap().len(), 1);
        assert_eq!(graph.find_path("B", "A").unwrap().len(), 1);
    }

    #[test]
    fn test_tie_break_is_lexicographic() {
        // Two equal-length paths A->B->D and A->C->D; the path through B wins.
        let mut registry = CubeRegistry::new();
        registry.register(cube(
            "A",
            vec![
                ("C", CubeJoin::belongs_to("c_id", "id")),
                ("B", CubeJoin::belongs_to("b_id", "id")),
            ],
        ));
        registry.register(cube(
            "B",
            vec![("D", CubeJoin::belongs_to("d_id", "id"))],
        ));
        registry.register(cube(
            "C",
            vec![("D", CubeJoin::belongs_to("d_id", "id"))],
        ));
        registry.register(cube("D", vec![]));

        let graph = JoinGraph::from_registry(&registry);
        let path = graph.find_path("A", "D").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].to_cube, "B");
    }

    #[test]
    fn test_join_tree_dedups_shared_prefix() {
        let graph = JoinGraph::from_registry(&registry());
        let steps = graph
            .join_tree(
                "Employees",
                &["Departments".into(), "Productivity".into(), "Departments".into()],
            )
            .unwrap();
        assert_eq!(steps.len(), 2);
    }
}
