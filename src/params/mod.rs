// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Parameter bindings and their enumeration
//!
//! A `ParameterBinding` is one concrete assignment of values to the
//! pipeline's iteration parameters (e.g. one subject). The whole pipeline
//! template is replicated once per binding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{StrucflowError, StrucflowResult};

/// An immutable mapping from parameter name to value
///
/// Field order is the sort order of the names; the binding id joins the
/// values with `_` and is used for artifact store layout and reporting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParameterBinding {
    fields: BTreeMap<String, String>,
}

impl ParameterBinding {
    /// Create a binding from (name, value) pairs
    pub fn new(fields: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Create a binding with a single field
    pub fn single(field: &str, value: &str) -> Self {
        Self::new([(field.to_string(), value.to_string())])
    }

    /// Look up a field value
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Iterate over (name, value) pairs in field order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Stable display id: field values joined with `_`
    pub fn id(&self) -> String {
        self.fields
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl std::fmt::Display for ParameterBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Produces the set of parameter bindings the pipeline is replicated over
pub struct ParameterSource;

impl ParameterSource {
    /// One binding per value of a single field
    ///
    /// Fails if the value set is empty or contains duplicates.
    pub fn single<S: AsRef<str>>(field: &str, values: &[S]) -> StrucflowResult<Vec<ParameterBinding>> {
        Self::product(&[(field, values)])
    }

    /// Cartesian product across several fields
    ///
    /// Bindings are emitted in row-major order: the last field varies
    /// fastest. With a single field this degenerates to plain enumeration.
    pub fn product<S: AsRef<str>>(
        fields: &[(&str, &[S])],
    ) -> StrucflowResult<Vec<ParameterBinding>> {
        if fields.is_empty() {
            return Err(StrucflowError::configuration(
                "parameter source has no fields",
            ));
        }

        for (name, values) in fields {
            if values.is_empty() {
                return Err(StrucflowError::Configuration {
                    reason: format!("parameter field '{}' has no values", name),
                    help: Some("Add at least one value (e.g. one subject id)".into()),
                });
            }

            let mut seen = std::collections::BTreeSet::new();
            for value in values.iter() {
                if !seen.insert(value.as_ref()) {
                    return Err(StrucflowError::configuration(format!(
                        "parameter field '{}' has duplicate value '{}'",
                        name,
                        value.as_ref()
                    )));
                }
            }
        }

        let mut bindings = vec![ParameterBinding::new([])];
        for (name, values) in fields {
            let mut next = Vec::with_capacity(bindings.len() * values.len());
            for binding in &bindings {
                for value in values.iter() {
                    let mut fields: BTreeMap<String, String> =
                        binding.fields().map(|(k, v)| (k.into(), v.into())).collect();
                    fields.insert(name.to_string(), value.as_ref().to_string());
                    next.push(ParameterBinding { fields });
                }
            }
            bindings = next;
        }

        Ok(bindings)
    }
}
