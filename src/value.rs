// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Values flowing along pipeline edges
//!
//! Stage inputs and outputs are paths, lists of values, or small text
//! payloads. Values are serializable so cache entries and artifact
//! manifests can round-trip through JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A value produced or consumed by a pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// A single filesystem path
    Path(PathBuf),
    /// An ordered list of values
    List(Vec<Value>),
    /// A small text payload (e.g. a parameter echoed by a tool)
    Text(String),
}

impl Value {
    /// Build a list of paths
    pub fn paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self::List(paths.into_iter().map(Value::Path).collect())
    }

    /// The path, if this is a single path value
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    /// The elements, if this is a list value
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// All paths referenced by this value, depth-first
    ///
    /// Order is deterministic: list order, nested lists flattened in place.
    pub fn files(&self) -> Vec<&Path> {
        let mut out = Vec::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            Self::Path(p) => out.push(p),
            Self::List(items) => {
                for item in items {
                    item.collect_files(out);
                }
            }
            Self::Text(_) => {}
        }
    }

    /// Number of elements for a list, 1 otherwise
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            _ => 1,
        }
    }

    /// True for an empty list
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::List(items) if items.is_empty())
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}

impl From<Vec<PathBuf>> for Value {
    fn from(paths: Vec<PathBuf>) -> Self {
        Self::paths(paths)
    }
}
