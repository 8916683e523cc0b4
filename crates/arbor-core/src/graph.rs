//! Project dependency graph using petgraph::StableDiGraph
//!
//! Edges point from a project to the projects it references, so the forward
//! direction answers "what do I depend on" and the reverse direction answers
//! "who depends on me".

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::model::{ProjectId, ProjectModel};

/// The dependency graph of one project model.
#[derive(Clone)]
pub struct DependencyGraph {
    inner: StableDiGraph<ProjectId, ()>,
    index: HashMap<ProjectId, NodeIndex>,
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("project_count", &self.inner.node_count())
            .field("reference_count", &self.inner.edge_count())
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Frame {
    node: NodeIndex,
    dependencies: Vec<NodeIndex>,
    cursor: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            inner: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Build the graph for a model. Never fails: blank ids, duplicate
    /// projects, self references and references outside the model are skipped.
    pub fn build(model: &ProjectModel) -> Self {
        let mut graph = DependencyGraph::new();

        for project in &model.projects {
            if !project.id.is_valid() {
                tracing::warn!("Skipping project with blank id (name: {:?})", project.name);
                continue;
            }
            if graph.index.contains_key(&project.id) {
                tracing::warn!("Duplicate project id {}, keeping the first", project.id);
                continue;
            }
            let idx = graph.inner.add_node(project.id.clone());
            graph.index.insert(project.id.clone(), idx);
        }

        let mut wired = HashSet::new();
        for project in &model.projects {
            let Some(&source) = graph.index.get(&project.id) else {
                continue;
            };
            if !wired.insert(source) {
                continue;
            }
            for reference in &project.project_references {
                let Some(&target) = graph.index.get(reference) else {
                    tracing::debug!("{} references {} outside the model, ignoring", project.id, reference);
                    continue;
                };
                if target == source {
                    tracing::warn!("{} references itself, ignoring", project.id);
                    continue;
                }
                if graph.inner.find_edge(source, target).is_none() {
                    graph.inner.add_edge(source, target, ());
                }
            }
        }

        tracing::debug!(
            "Built dependency graph: {} projects, {} references",
            graph.inner.node_count(),
            graph.inner.edge_count()
        );
        graph
    }

    fn node(&self, id: &ProjectId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Neighbors in insertion (model) order, so every derived list is deterministic.
    fn neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.inner.neighbors_directed(idx, direction).collect();
        neighbors.sort();
        neighbors.dedup();
        neighbors
    }

    fn ids(&self, nodes: impl IntoIterator<Item = NodeIndex>) -> Vec<ProjectId> {
        nodes.into_iter().map(|idx| self.inner[idx].clone()).collect()
    }

    pub fn contains(&self, id: &ProjectId) -> bool {
        self.index.contains_key(id)
    }

    /// Total number of projects.
    pub fn project_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Total number of project references.
    pub fn reference_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Iterate over all projects in model order.
    pub fn projects(&self) -> impl Iterator<Item = &ProjectId> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    /// Direct dependencies of a project (forward edges).
    pub fn dependencies(&self, id: &ProjectId) -> Vec<ProjectId> {
        self.node(id)
            .map(|idx| self.ids(self.neighbors(idx, Direction::Outgoing)))
            .unwrap_or_default()
    }

    /// Direct dependents of a project (reverse edges).
    pub fn dependents(&self, id: &ProjectId) -> Vec<ProjectId> {
        self.node(id)
            .map(|idx| self.ids(self.neighbors(idx, Direction::Incoming)))
            .unwrap_or_default()
    }

    /// Projects without dependencies. These are compiled first when prewarming.
    pub fn leaf_projects(&self) -> Vec<ProjectId> {
        self.projects_without(Direction::Outgoing)
    }

    /// Projects nothing depends on.
    pub fn root_projects(&self) -> Vec<ProjectId> {
        self.projects_without(Direction::Incoming)
    }

    fn projects_without(&self, direction: Direction) -> Vec<ProjectId> {
        self.inner
            .node_indices()
            .filter(|&idx| self.inner.neighbors_directed(idx, direction).next().is_none())
            .map(|idx| self.inner[idx].clone())
            .collect()
    }

    /// The project and every project depending on it, directly or
    /// transitively, in breadth-first order starting with the seed.
    /// Unknown ids yield an empty list.
    pub fn downstream(&self, id: &ProjectId) -> Vec<ProjectId> {
        self.closure(id, Direction::Incoming)
    }

    /// The project and everything it depends on, seed first.
    pub fn upstream(&self, id: &ProjectId) -> Vec<ProjectId> {
        self.closure(id, Direction::Outgoing)
    }

    fn closure(&self, id: &ProjectId, direction: Direction) -> Vec<ProjectId> {
        let Some(start) = self.node(id) else {
            return Vec::new();
        };

        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut order = Vec::new();

        while let Some(current) = queue.pop_front() {
            order.push(current);
            for next in self.neighbors(current, direction) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        self.ids(order)
    }

    /// Dependencies before dependents. A reference that closes a cycle is
    /// not followed, so cyclic models still get a (degraded) complete order.
    pub fn topological_order(&self) -> Vec<ProjectId> {
        let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();
        let mut order = Vec::with_capacity(self.inner.node_count());

        for start in self.inner.node_indices() {
            if marks.contains_key(&start) {
                continue;
            }
            marks.insert(start, Mark::Visiting);
            let mut stack = vec![Frame {
                node: start,
                dependencies: self.neighbors(start, Direction::Outgoing),
                cursor: 0,
            }];

            while let Some(frame) = stack.last_mut() {
                let next = frame.dependencies.get(frame.cursor).copied();
                frame.cursor += 1;

                match next {
                    Some(dependency) => match marks.get(&dependency) {
                        None => {
                            marks.insert(dependency, Mark::Visiting);
                            stack.push(Frame {
                                node: dependency,
                                dependencies: self.neighbors(dependency, Direction::Outgoing),
                                cursor: 0,
                            });
                        }
                        Some(Mark::Visiting) => {
                            tracing::warn!(
                                "Reference cycle between {} and {}, truncating order",
                                self.inner[frame.node],
                                self.inner[dependency]
                            );
                        }
                        Some(Mark::Done) => {}
                    },
                    None => {
                        let node = frame.node;
                        stack.pop();
                        marks.insert(node, Mark::Done);
                        order.push(self.inner[node].clone());
                    }
                }
            }
        }

        order
    }

    /// Groups of projects that reference each other in a cycle.
    pub fn cycles(&self) -> Vec<Vec<ProjectId>> {
        petgraph::algo::tarjan_scc(&self.inner)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|mut component| {
                component.sort();
                self.ids(component)
            })
            .collect()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles().is_empty()
    }

    /// Dependencies that can be compiled before this project. A reference
    /// R is dropped when R itself depends (transitively) on this project;
    /// the remaining references always form an acyclic graph.
    pub fn effective_dependencies(&self, id: &ProjectId) -> Vec<ProjectId> {
        let dependencies = self.dependencies(id);
        if dependencies.is_empty() {
            return dependencies;
        }
        let downstream: HashSet<ProjectId> = self.downstream(id).into_iter().collect();
        dependencies
            .into_iter()
            .filter(|dependency| !downstream.contains(dependency))
            .collect()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
