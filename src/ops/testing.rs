// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Test doubles for external operations

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{ExternalOperation, Inputs, InvocationContext, Outputs};
use crate::errors::{StrucflowError, StrucflowResult};
use crate::value::Value;

/// Write an executable shell script into `dir` and return its path
pub fn write_fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, script).expect("write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake tool");
    path
}

/// A fake segmentation tool writing class maps into its working directory
pub fn fake_segment_script(classes: usize, import_classes: usize) -> String {
    let mut script = String::from("#!/bin/sh\n");
    for class in 1..=classes {
        script.push_str(&format!(": > \"c{}_map.nii\"\n", class));
    }
    for class in 1..=import_classes {
        script.push_str(&format!(": > \"rc{}_map.nii\"\n", class));
    }
    script
}

/// A fake template tool writing one flow field per --grey input plus a
/// final template into its working directory
pub fn fake_dartel_script() -> String {
    r#"#!/bin/sh
prefix="Template"
prev=""
for a in "$@"; do
  if [ "$prev" = "--grey" ]; then
    b=$(basename "$a")
    : > "u_${b%.*}.nii"
  fi
  if [ "$prev" = "--template-prefix" ]; then
    prefix="$a"
  fi
  prev="$a"
done
: > "${prefix}_final.nii"
"#
    .to_string()
}

type FailurePredicate = Arc<dyn Fn(&Inputs) -> bool + Send + Sync>;

/// An in-process operation that records invocations
///
/// Outputs are deterministic text values derived from the inputs, so
/// cache-key and idempotence behaviour can be asserted without touching
/// any real tool.
pub struct RecordingOp {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    calls: Arc<AtomicUsize>,
    fail_when: Option<FailurePredicate>,
}

impl RecordingOp {
    pub fn new(name: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_when: None,
        }
    }

    /// Shared invocation counter
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Fail any invocation whose inputs satisfy the predicate
    pub fn fail_when(
        mut self,
        predicate: impl Fn(&Inputs) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fail_when = Some(Arc::new(predicate));
        self
    }
}

/// True if any input value mentions `needle` in its JSON form
pub fn inputs_mention(inputs: &Inputs, needle: &str) -> bool {
    inputs.values().any(|v| {
        serde_json::to_string(v)
            .map(|s| s.contains(needle))
            .unwrap_or(false)
    })
}

#[async_trait]
impl ExternalOperation for RecordingOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn fingerprint(&self) -> serde_json::Value {
        serde_json::json!({ "op": self.name })
    }

    async fn invoke(&self, ctx: &InvocationContext, inputs: &Inputs) -> StrucflowResult<Outputs> {
        if let Some(predicate) = &self.fail_when {
            if predicate(inputs) {
                return Err(StrucflowError::stage_execution(
                    &ctx.stage,
                    &ctx.binding,
                    "simulated tool failure",
                ));
            }
        }

        self.calls.fetch_add(1, Ordering::SeqCst);

        let digest = crate::cache::hash_string(&serde_json::to_string(inputs)?);
        Ok(self
            .outputs
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    Value::Text(format!("{}:{}:{}", self.name, name, &digest[..12])),
                )
            })
            .collect())
    }
}
