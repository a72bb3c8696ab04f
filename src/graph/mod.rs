// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Pipeline graph template
//!
//! A `PipelineGraph` is the immutable template of stages and typed edges,
//! built once by `GraphBuilder` before any execution begins. Expansion
//! across parameter bindings happens in the `exec` module.

mod dag;
mod spec;

pub use dag::DagBuilder;
pub use spec::{
    Edge, EdgeKind, GraphBuilder, InputSource, PipelineGraph, StageKind, StageScope, StageSpec,
};
