// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Pipeline execution
//!
//! `node` instantiates the template over the parameter bindings; the
//! `scheduler` walks the stage waves and drives cached tool invocations.

mod node;
mod scheduler;

pub use node::{expand, ExecutionNode, NodeStatus, GROUP_BINDING};
pub use scheduler::{BindingFailure, RunOptions, RunReport, Scheduler};
