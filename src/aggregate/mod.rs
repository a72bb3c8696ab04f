// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Fan-in aggregators
//!
//! An aggregator is a pure reshape of upstream records into inputs for a
//! downstream shared stage. No external tool is invoked and nothing is
//! cached; recomputation is cheap.

use std::collections::BTreeMap;

use crate::errors::{StrucflowError, StrucflowResult};
use crate::value::Value;

/// A pure fan-in transform
pub trait Aggregate: Send + Sync {
    /// Aggregator name for diagnostics
    fn name(&self) -> &str;

    /// Declared input names (a single `records` input by default)
    fn inputs(&self) -> Vec<String> {
        vec!["records".to_string()]
    }

    /// Declared output names
    fn outputs(&self) -> Vec<String>;

    /// Reshape the gathered records into named outputs
    fn aggregate(
        &self,
        stage: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> StrucflowResult<BTreeMap<String, Value>>;
}

/// Un-nests a list of k-field records into k parallel lists
///
/// Given N records each holding k fields, produces k lists each of length
/// >= N, preserving per-field relative order. A field that is itself a
/// list is extended into the output (one entry per element); a scalar
/// field is appended. This matches the classic tissue-class reshape:
/// records of (grey-matter paths, white-matter paths) become one
/// grey-matter list and one white-matter list across all subjects.
pub struct FieldTranspose {
    fields: Vec<String>,
}

impl FieldTranspose {
    /// Create a transpose naming each field position's output
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Aggregate for FieldTranspose {
    fn name(&self) -> &str {
        "field_transpose"
    }

    fn outputs(&self) -> Vec<String> {
        self.fields.clone()
    }

    fn aggregate(
        &self,
        stage: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> StrucflowResult<BTreeMap<String, Value>> {
        let records = inputs
            .get("records")
            .and_then(Value::as_list)
            .ok_or_else(|| StrucflowError::Aggregation {
                stage: stage.to_string(),
                reason: "expected a list of records on input 'records'".to_string(),
            })?;

        let k = self.fields.len();
        let mut columns: Vec<Vec<Value>> = vec![Vec::new(); k];

        for (i, record) in records.iter().enumerate() {
            let fields = record.as_list().ok_or_else(|| StrucflowError::Aggregation {
                stage: stage.to_string(),
                reason: format!("record {} is not a field list", i),
            })?;

            if fields.len() != k {
                return Err(StrucflowError::Aggregation {
                    stage: stage.to_string(),
                    reason: format!(
                        "record {} has {} fields, expected {}",
                        i,
                        fields.len(),
                        k
                    ),
                });
            }

            for (j, field) in fields.iter().enumerate() {
                match field {
                    Value::List(items) => columns[j].extend(items.iter().cloned()),
                    other => columns[j].push(other.clone()),
                }
            }
        }

        Ok(self
            .fields
            .iter()
            .cloned()
            .zip(columns.into_iter().map(Value::List))
            .collect())
    }
}
