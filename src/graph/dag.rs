// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! DAG validation and ordering for pipeline stages
//!
//! Wraps petgraph to topologically order stages, detect cycles, and render
//! the template for inspection.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::errors::{StrucflowError, StrucflowResult};
use crate::graph::spec::{Edge, EdgeKind, PipelineGraph, StageSpec};

/// Builder for stage dependency DAGs
pub struct DagBuilder {
    graph: DiGraph<usize, EdgeKind>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
}

impl DagBuilder {
    /// Build a DAG from stage specs and edges
    pub fn build(stages: &[StageSpec], edges: &[Edge]) -> StrucflowResult<Self> {
        let mut builder = Self {
            graph: DiGraph::new(),
            name_to_index: HashMap::new(),
            index_to_name: HashMap::new(),
        };

        for (idx, stage) in stages.iter().enumerate() {
            let node = builder.graph.add_node(idx);
            builder.name_to_index.insert(stage.name.clone(), node);
            builder.index_to_name.insert(node, stage.name.clone());
        }

        for edge in edges {
            let from = builder.name_to_index.get(&edge.from).ok_or_else(|| {
                StrucflowError::UnknownStage {
                    stage: edge.from.clone(),
                }
            })?;
            let to = builder.name_to_index.get(&edge.to).ok_or_else(|| {
                StrucflowError::UnknownStage {
                    stage: edge.to.clone(),
                }
            })?;

            // Parallel port connections only need one dependency edge
            if !builder.graph.contains_edge(*from, *to) {
                builder.graph.add_edge(*from, *to, edge.kind);
            }
        }

        builder.validate_acyclic()?;

        Ok(builder)
    }

    /// Build the DAG of an already-validated pipeline graph
    pub fn of(graph: &PipelineGraph) -> StrucflowResult<Self> {
        Self::build(graph.stages(), graph.edges())
    }

    fn validate_acyclic(&self) -> StrucflowResult<()> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(StrucflowError::CircularDependency {
                stages: self.find_cycle_members(cycle.node_id()),
            }),
        }
    }

    /// Find all stages involved in a cycle
    fn find_cycle_members(&self, start: NodeIndex) -> Vec<String> {
        use petgraph::visit::{depth_first_search, DfsEvent};

        let mut in_cycle = vec![self.index_to_name[&start].clone()];
        let mut visited = std::collections::HashSet::new();

        depth_first_search(&self.graph, Some(start), |event| {
            if let DfsEvent::Discover(node, _) = event {
                let name = &self.index_to_name[&node];
                if visited.contains(name) {
                    in_cycle.push(name.clone());
                    return petgraph::visit::Control::Break(());
                }
                visited.insert(name.clone());
                in_cycle.push(name.clone());
            }
            petgraph::visit::Control::Continue
        });

        in_cycle
    }

    /// Topologically sorted stage indices
    pub fn topological_order_indices(&self) -> StrucflowResult<Vec<usize>> {
        toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|n| self.graph[n]).collect())
            .map_err(|cycle| StrucflowError::CircularDependency {
                stages: self.find_cycle_members(cycle.node_id()),
            })
    }

    /// Topologically sorted stage names
    pub fn topological_order_names(&self) -> StrucflowResult<Vec<String>> {
        toposort(&self.graph, None)
            .map(|nodes| {
                nodes
                    .into_iter()
                    .map(|n| self.index_to_name[&n].clone())
                    .collect()
            })
            .map_err(|cycle| StrucflowError::CircularDependency {
                stages: self.find_cycle_members(cycle.node_id()),
            })
    }

    /// Stages that must run before `stage_name`
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        Some(
            self.graph
                .neighbors_directed(*node, petgraph::Direction::Incoming)
                .map(|n| self.index_to_name[&n].clone())
                .collect(),
        )
    }

    /// Stages that depend on `stage_name`
    pub fn dependents(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        Some(
            self.graph
                .neighbors_directed(*node, petgraph::Direction::Outgoing)
                .map(|n| self.index_to_name[&n].clone())
                .collect(),
        )
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_on(&self, stage_a: &str, stage_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(stage_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(stage_b) else {
            return false;
        };

        petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Generate a Mermaid diagram; join edges are dotted
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for (name, _) in &self.name_to_index {
            out.push_str(&format!("    {}[{}]\n", name, name));
        }

        for edge in self.graph.edge_indices() {
            let (from, to) = match self.graph.edge_endpoints(edge) {
                Some(pair) => pair,
                None => continue,
            };
            let arrow = match self.graph[edge] {
                EdgeKind::PerBinding => "-->",
                EdgeKind::JoinBindings => "-.->",
            };
            out.push_str(&format!(
                "    {} {} {}\n",
                self.index_to_name[&from], arrow, self.index_to_name[&to]
            ));
        }

        out
    }

    /// Generate a DOT diagram; join edges are dashed
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for edge in self.graph.edge_indices() {
            let (from, to) = match self.graph.edge_endpoints(edge) {
                Some(pair) => pair,
                None => continue,
            };
            let style = match self.graph[edge] {
                EdgeKind::PerBinding => "",
                EdgeKind::JoinBindings => " [style=dashed]",
            };
            out.push_str(&format!(
                "    \"{}\" -> \"{}\"{};\n",
                self.index_to_name[&from], self.index_to_name[&to], style
            ));
        }

        for (name, node) in &self.name_to_index {
            if self.graph.neighbors_undirected(*node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Text representation of the execution order
    pub fn to_text(&self, graph: &PipelineGraph) -> StrucflowResult<String> {
        let order = self.topological_order_indices()?;
        let mut out = String::new();

        for (i, idx) in order.iter().enumerate() {
            let stage = &graph.stages()[*idx];
            let deps = self.dependencies(&stage.name).unwrap_or_default();

            out.push_str(&format!("{}. {} ({})", i + 1, stage.name, stage.tool_name()));

            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }
}
