// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Runtime instantiation of the pipeline template

use crate::graph::{PipelineGraph, StageScope};
use crate::params::ParameterBinding;

/// Binding id under which shared stages run and publish
pub const GROUP_BINDING: &str = "group";

/// Lifecycle of one execution node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    /// All work satisfied from the cache
    Cached,
    Succeeded,
    Failed,
    /// Not attempted because its binding already failed upstream
    Skipped,
}

/// One (stage, binding) instantiation
#[derive(Debug, Clone)]
pub struct ExecutionNode {
    pub stage: String,
    pub binding_id: String,
    /// The parameter binding, absent for shared nodes
    pub binding: Option<ParameterBinding>,
    pub status: NodeStatus,
}

impl ExecutionNode {
    fn per_binding(stage: &str, binding: &ParameterBinding) -> Self {
        Self {
            stage: stage.to_string(),
            binding_id: binding.id(),
            binding: Some(binding.clone()),
            status: NodeStatus::Pending,
        }
    }

    fn shared(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            binding_id: GROUP_BINDING.to_string(),
            binding: None,
            status: NodeStatus::Pending,
        }
    }
}

/// Expand the pipeline template over the parameter bindings
///
/// Per-binding stages produce one node per binding, in binding order;
/// shared stages produce a single group node. Node order follows the
/// frozen topological stage order.
pub fn expand(graph: &PipelineGraph, bindings: &[ParameterBinding]) -> Vec<ExecutionNode> {
    let mut nodes = Vec::new();
    for stage in graph.topological_order() {
        match stage.scope {
            StageScope::PerBinding => {
                for binding in bindings {
                    nodes.push(ExecutionNode::per_binding(&stage.name, binding));
                }
            }
            StageScope::Shared => nodes.push(ExecutionNode::shared(&stage.name)),
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::FieldTranspose;
    use crate::graph::{GraphBuilder, StageSpec};
    use crate::ops::testing::RecordingOp;
    use std::sync::Arc;

    fn graph() -> PipelineGraph {
        GraphBuilder::new()
            .stage(
                StageSpec::map(
                    "segment",
                    Arc::new(RecordingOp::new("seg", &["image"], &["maps"])),
                )
                .template("image", "{subject_id}/*.nii"),
            )
            .stage(StageSpec::aggregator(
                "gather",
                Arc::new(FieldTranspose::new(["grey", "white"])),
            ))
            .stage(
                StageSpec::plain(
                    "template",
                    Arc::new(RecordingOp::new("tpl", &["grey", "white"], &["out"])),
                )
                .shared(),
            )
            .join("segment", "maps", "gather", "records")
            .connect("gather", "grey", "template", "grey")
            .connect("gather", "white", "template", "white")
            .build()
            .unwrap()
    }

    #[test]
    fn test_expand_one_node_per_binding_plus_group_nodes() {
        let bindings = vec![
            ParameterBinding::single("subject_id", "sub-01"),
            ParameterBinding::single("subject_id", "sub-02"),
            ParameterBinding::single("subject_id", "sub-03"),
        ];

        let nodes = expand(&graph(), &bindings);
        let ids: Vec<_> = nodes
            .iter()
            .map(|n| format!("{}[{}]", n.stage, n.binding_id))
            .collect();

        assert_eq!(
            ids,
            vec![
                "segment[sub-01]",
                "segment[sub-02]",
                "segment[sub-03]",
                "gather[group]",
                "template[group]",
            ]
        );
        assert!(nodes.iter().all(|n| n.status == NodeStatus::Pending));
    }
}
