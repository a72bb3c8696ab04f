// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! External operation boundary
//!
//! An `ExternalOperation` wraps one invocation of an opaque external tool:
//! input paths and parameters in, declared output paths out, exit status
//! checked. The engine never inspects the tool's internals.

mod command;
mod dartel;
mod segment;

#[cfg(test)]
pub mod testing;

pub use command::{CommandOperation, OutputArity, OutputSpec};
pub use dartel::{DartelParams, DartelTemplateOp, IterationStep};
pub use segment::{NewSegmentOp, SegmentParams};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::StrucflowResult;
use crate::value::Value;

/// Named stage inputs
pub type Inputs = BTreeMap<String, Value>;
/// Named stage outputs
pub type Outputs = BTreeMap<String, Value>;

/// Context for one operation invocation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Stage being executed
    pub stage: String,
    /// Binding id the execution runs for
    pub binding: String,
    /// Private scratch directory for this invocation
    ///
    /// Derived deterministically from the cache key, so re-runs land in
    /// the same place.
    pub workspace: PathBuf,
}

/// Trait for external tool operations
#[async_trait]
pub trait ExternalOperation: Send + Sync {
    /// Operation name for diagnostics and display
    fn name(&self) -> &str;

    /// Declared input names
    fn inputs(&self) -> Vec<String>;

    /// Declared output names
    fn outputs(&self) -> Vec<String>;

    /// Parameters that affect results, for cache key derivation
    fn fingerprint(&self) -> serde_json::Value;

    /// Invoke the tool synchronously (blocking from the worker's view)
    ///
    /// Must produce every declared output or fail with `StageExecution`.
    async fn invoke(&self, ctx: &InvocationContext, inputs: &Inputs) -> StrucflowResult<Outputs>;

    /// Check the backing tool is installed
    async fn check_available(&self) -> StrucflowResult<bool> {
        Ok(true)
    }
}
