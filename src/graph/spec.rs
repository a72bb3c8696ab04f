// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Stage specifications and the immutable pipeline graph

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::errors::{StrucflowError, StrucflowResult};
use crate::graph::dag::DagBuilder;
use crate::ops::ExternalOperation;

/// How a stage is instantiated at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// One execution per instantiation
    Plain,
    /// Replicated over the elements of its single list input
    MapExpanded,
    /// Pure fan-in reshape, no external invocation
    Aggregate,
}

/// Whether a stage runs once per binding or once across all bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageScope {
    PerBinding,
    Shared,
}

/// Edge type between stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Connects stages within the same binding (or between shared stages)
    PerBinding,
    /// Gathers one value per binding into a shared consumer
    JoinBindings,
}

/// Declaration of a single pipeline stage
///
/// Owns no runtime data; execution state lives in `exec::ExecutionNode`.
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    pub scope: StageScope,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub operation: Option<Arc<dyn ExternalOperation>>,
    pub aggregate: Option<Arc<dyn Aggregate>>,
    /// Inputs fed directly from resolved path templates instead of edges
    pub templates: BTreeMap<String, String>,
    /// Whether successful outputs are published to the artifact store
    pub publish: bool,
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("publish", &self.publish)
            .finish()
    }
}

impl StageSpec {
    /// A plain stage wrapping one external operation
    pub fn plain(name: &str, operation: Arc<dyn ExternalOperation>) -> Self {
        Self {
            name: name.to_string(),
            kind: StageKind::Plain,
            scope: StageScope::PerBinding,
            inputs: operation.inputs(),
            outputs: operation.outputs(),
            operation: Some(operation),
            aggregate: None,
            templates: BTreeMap::new(),
            publish: false,
        }
    }

    /// A map stage: the operation runs once per element of its list input
    pub fn map(name: &str, operation: Arc<dyn ExternalOperation>) -> Self {
        Self {
            kind: StageKind::MapExpanded,
            ..Self::plain(name, operation)
        }
    }

    /// A fan-in aggregator stage (shared by default)
    pub fn aggregator(name: &str, aggregate: Arc<dyn Aggregate>) -> Self {
        Self {
            name: name.to_string(),
            kind: StageKind::Aggregate,
            scope: StageScope::Shared,
            inputs: aggregate.inputs(),
            outputs: aggregate.outputs(),
            operation: None,
            aggregate: Some(aggregate),
            templates: BTreeMap::new(),
            publish: false,
        }
    }

    /// Mark the stage as running once across all bindings
    pub fn shared(mut self) -> Self {
        self.scope = StageScope::Shared;
        self
    }

    /// Feed an input from a resolved path template instead of an edge
    pub fn template(mut self, input: &str, template: &str) -> Self {
        self.templates.insert(input.to_string(), template.to_string());
        self
    }

    /// Publish successful outputs to the artifact store
    pub fn publish(mut self) -> Self {
        self.publish = true;
        self
    }

    /// Name of the wrapped operation or aggregator, for display
    pub fn tool_name(&self) -> &str {
        if let Some(op) = &self.operation {
            op.name()
        } else if let Some(agg) = &self.aggregate {
            agg.name()
        } else {
            "unknown"
        }
    }
}

/// A typed connection `(from, output) -> (to, input)`
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub output: String,
    pub to: String,
    pub input: String,
    pub kind: EdgeKind,
}

/// Where one declared input gets its value from
#[derive(Debug, Clone)]
pub enum InputSource {
    Edge {
        from: String,
        output: String,
        kind: EdgeKind,
    },
    Template(String),
}

/// Immutable pipeline template
///
/// No stage may be added once built; expansion and execution only read it.
pub struct PipelineGraph {
    stages: Vec<StageSpec>,
    edges: Vec<Edge>,
    order: Vec<usize>,
    input_sources: BTreeMap<String, BTreeMap<String, InputSource>>,
}

impl PipelineGraph {
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> StrucflowResult<&StageSpec> {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| StrucflowError::UnknownStage {
                stage: name.to_string(),
            })
    }

    /// Stages in topological order
    pub fn topological_order(&self) -> impl Iterator<Item = &StageSpec> {
        self.order.iter().map(move |&i| &self.stages[i])
    }

    /// Input bindings for a stage, keyed by input name
    pub fn input_sources(&self, stage: &str) -> StrucflowResult<&BTreeMap<String, InputSource>> {
        self.input_sources
            .get(stage)
            .ok_or_else(|| StrucflowError::UnknownStage {
                stage: stage.to_string(),
            })
    }
}

/// Builder for `PipelineGraph`
///
/// Collects stages and connections, then validates the whole template in
/// `build`: unique names, declared ports, scope-consistent edge kinds,
/// fully bound inputs, and acyclicity.
#[derive(Default)]
pub struct GraphBuilder {
    stages: Vec<StageSpec>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage
    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    /// Connect a producer output to a consumer input within each binding
    pub fn connect(self, from: &str, output: &str, to: &str, input: &str) -> Self {
        self.edge(from, output, to, input, EdgeKind::PerBinding)
    }

    /// Gather a producer output across ALL bindings into a shared consumer
    pub fn join(self, from: &str, output: &str, to: &str, input: &str) -> Self {
        self.edge(from, output, to, input, EdgeKind::JoinBindings)
    }

    fn edge(mut self, from: &str, output: &str, to: &str, input: &str, kind: EdgeKind) -> Self {
        self.edges.push(Edge {
            from: from.to_string(),
            output: output.to_string(),
            to: to.to_string(),
            input: input.to_string(),
            kind,
        });
        self
    }

    /// Validate and freeze the template
    pub fn build(self) -> StrucflowResult<PipelineGraph> {
        let mut names = BTreeSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name.clone()) {
                return Err(StrucflowError::InvalidStage {
                    stage: stage.name.clone(),
                    reason: "duplicate stage name".to_string(),
                });
            }

            match stage.kind {
                StageKind::Plain | StageKind::MapExpanded => {
                    if stage.operation.is_none() {
                        return Err(StrucflowError::InvalidStage {
                            stage: stage.name.clone(),
                            reason: "stage has no external operation".to_string(),
                        });
                    }
                }
                StageKind::Aggregate => {
                    if stage.aggregate.is_none() {
                        return Err(StrucflowError::InvalidStage {
                            stage: stage.name.clone(),
                            reason: "aggregator stage has no aggregate transform".to_string(),
                        });
                    }
                }
            }

            if stage.kind == StageKind::MapExpanded && stage.inputs.len() != 1 {
                return Err(StrucflowError::InvalidStage {
                    stage: stage.name.clone(),
                    reason: format!(
                        "map stage must declare exactly one input, found {}",
                        stage.inputs.len()
                    ),
                });
            }

            if stage.outputs.is_empty() {
                return Err(StrucflowError::InvalidStage {
                    stage: stage.name.clone(),
                    reason: "stage declares no outputs".to_string(),
                });
            }

            for input in stage.templates.keys() {
                if !stage.inputs.contains(input) {
                    return Err(StrucflowError::InvalidStage {
                        stage: stage.name.clone(),
                        reason: format!("template bound to undeclared input '{}'", input),
                    });
                }
            }
        }

        let find = |name: &str| self.stages.iter().find(|s| s.name == name);

        for edge in &self.edges {
            let from = find(&edge.from).ok_or_else(|| StrucflowError::UnknownStage {
                stage: edge.from.clone(),
            })?;
            let to = find(&edge.to).ok_or_else(|| StrucflowError::UnknownStage {
                stage: edge.to.clone(),
            })?;

            if !from.outputs.contains(&edge.output) {
                return Err(StrucflowError::InvalidEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    reason: format!("'{}' declares no output '{}'", edge.from, edge.output),
                });
            }
            if !to.inputs.contains(&edge.input) {
                return Err(StrucflowError::InvalidEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    reason: format!("'{}' declares no input '{}'", edge.to, edge.input),
                });
            }

            match edge.kind {
                EdgeKind::JoinBindings => {
                    if from.scope != StageScope::PerBinding || to.scope != StageScope::Shared {
                        return Err(StrucflowError::InvalidEdge {
                            from: edge.from.clone(),
                            to: edge.to.clone(),
                            reason: "join edges must gather a per-binding producer into a shared stage"
                                .to_string(),
                        });
                    }
                }
                EdgeKind::PerBinding => {
                    if from.scope != to.scope {
                        return Err(StrucflowError::InvalidEdge {
                            from: edge.from.clone(),
                            to: edge.to.clone(),
                            reason: "per-binding edges must connect stages of the same scope; use a join edge to cross into a shared stage"
                                .to_string(),
                        });
                    }
                }
            }
        }

        // Every declared input must be bound exactly once
        let mut input_sources: BTreeMap<String, BTreeMap<String, InputSource>> = BTreeMap::new();
        for stage in &self.stages {
            let mut sources = BTreeMap::new();
            for (input, template) in &stage.templates {
                sources.insert(input.clone(), InputSource::Template(template.clone()));
            }
            for edge in self.edges.iter().filter(|e| e.to == stage.name) {
                let replaced = sources.insert(
                    edge.input.clone(),
                    InputSource::Edge {
                        from: edge.from.clone(),
                        output: edge.output.clone(),
                        kind: edge.kind,
                    },
                );
                if replaced.is_some() {
                    return Err(StrucflowError::InvalidStage {
                        stage: stage.name.clone(),
                        reason: format!("input '{}' is bound more than once", edge.input),
                    });
                }
            }

            for input in &stage.inputs {
                if !sources.contains_key(input) {
                    return Err(StrucflowError::InvalidStage {
                        stage: stage.name.clone(),
                        reason: format!("input '{}' is not bound by any edge or template", input),
                    });
                }
            }

            input_sources.insert(stage.name.clone(), sources);
        }

        // Validate acyclicity and freeze the execution order
        let dag = DagBuilder::build(&self.stages, &self.edges)?;
        let order = dag.topological_order_indices()?;

        Ok(PipelineGraph {
            stages: self.stages,
            edges: self.edges,
            order,
            input_sources,
        })
    }
}
