// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Artifact resolver
//!
//! Turns a path template with `{field}` placeholders and glob wildcards
//! into concrete input paths for one parameter binding.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{StrucflowError, StrucflowResult};
use crate::params::ParameterBinding;

/// What to do when a template matches more than one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
    /// More than one match is an error (default)
    #[default]
    Strict,
    /// Pick the lexicographically smallest path
    ///
    /// Candidates are sorted by full path before selection, so repeated
    /// runs pick the same file.
    First,
}

/// Resolves path templates against a base directory for one binding
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    base_dir: PathBuf,
    policy: AmbiguityPolicy,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Template placeholders are simple identifiers: {subject_id}
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid placeholder regex"))
}

impl ArtifactResolver {
    /// Create a resolver rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>, policy: AmbiguityPolicy) -> Self {
        Self {
            base_dir: base_dir.into(),
            policy,
        }
    }

    /// The resolver's base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Substitute `{field}` placeholders from the binding
    pub fn substitute(&self, template: &str, binding: &ParameterBinding) -> StrucflowResult<String> {
        let mut missing = None;
        let substituted = placeholder_re().replace_all(template, |caps: &regex::Captures| {
            let field = &caps[1];
            match binding.get(field) {
                Some(value) => value.to_string(),
                None => {
                    missing.get_or_insert_with(|| field.to_string());
                    String::new()
                }
            }
        });

        if let Some(field) = missing {
            return Err(StrucflowError::Configuration {
                reason: format!(
                    "template '{}' references unknown parameter field '{}'",
                    template, field
                ),
                help: Some(format!(
                    "Binding '{}' defines: {}",
                    binding,
                    binding
                        .fields()
                        .map(|(k, _)| k)
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            });
        }

        Ok(substituted.into_owned())
    }

    /// Resolve a template to exactly one path
    ///
    /// Zero matches is a `Resolution` error. Multiple matches are an
    /// `AmbiguousResolution` error under `Strict`, or the lexicographically
    /// smallest path under `First`.
    pub fn resolve(&self, template: &str, binding: &ParameterBinding) -> StrucflowResult<PathBuf> {
        let candidates = self.resolve_all(template, binding)?;

        match (candidates.len(), self.policy) {
            (1, _) => Ok(candidates.into_iter().next().ok_or_else(|| {
                StrucflowError::Resolution {
                    template: template.to_string(),
                    binding: binding.id(),
                }
            })?),
            (_, AmbiguityPolicy::First) => {
                let chosen = candidates
                    .first()
                    .cloned()
                    .ok_or_else(|| StrucflowError::Resolution {
                        template: template.to_string(),
                        binding: binding.id(),
                    })?;
                tracing::debug!(
                    template,
                    binding = %binding,
                    chosen = %chosen.display(),
                    candidates = candidates.len(),
                    "ambiguity-tolerant resolution picked smallest path"
                );
                Ok(chosen)
            }
            (_, AmbiguityPolicy::Strict) => Err(StrucflowError::AmbiguousResolution {
                template: template.to_string(),
                binding: binding.id(),
                candidates,
            }),
        }
    }

    /// Resolve a template to all matching paths, sorted lexicographically
    ///
    /// Zero matches is still a `Resolution` error: a stage input that
    /// matches nothing can never satisfy its consumer.
    pub fn resolve_all(
        &self,
        template: &str,
        binding: &ParameterBinding,
    ) -> StrucflowResult<Vec<PathBuf>> {
        let pattern = self.substitute(template, binding)?;
        let full_pattern = if Path::new(&pattern).is_absolute() {
            pattern
        } else {
            self.base_dir.join(&pattern).to_string_lossy().to_string()
        };

        let mut candidates: Vec<PathBuf> = glob::glob(&full_pattern)?
            .filter_map(Result::ok)
            .collect();
        candidates.sort();

        if candidates.is_empty() {
            return Err(StrucflowError::Resolution {
                template: template.to_string(),
                binding: binding.id(),
            });
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn binding() -> ParameterBinding {
        ParameterBinding::single("subject_id", "sub-01")
    }

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_substitute_replaces_placeholders() {
        let resolver = ArtifactResolver::new("/data", AmbiguityPolicy::Strict);
        let result = resolver
            .substitute("{subject_id}/anat/{subject_id}_acq-T1w.nii", &binding())
            .unwrap();
        assert_eq!(result, "sub-01/anat/sub-01_acq-T1w.nii");
    }

    #[test]
    fn test_substitute_unknown_field_fails() {
        let resolver = ArtifactResolver::new("/data", AmbiguityPolicy::Strict);
        let result = resolver.substitute("{run_id}/anat.nii", &binding());
        assert!(matches!(result, Err(StrucflowError::Configuration { .. })));
    }

    #[test]
    fn test_resolve_single_match() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sub-01_acq-T1w.nii");

        let resolver = ArtifactResolver::new(dir.path(), AmbiguityPolicy::Strict);
        let path = resolver.resolve("{subject_id}_acq-*.nii", &binding()).unwrap();
        assert_eq!(path, dir.path().join("sub-01_acq-T1w.nii"));
    }

    #[test]
    fn test_resolve_no_match_fails() {
        let dir = TempDir::new().unwrap();
        let resolver = ArtifactResolver::new(dir.path(), AmbiguityPolicy::Strict);
        let result = resolver.resolve("{subject_id}_acq-*.nii", &binding());
        assert!(matches!(result, Err(StrucflowError::Resolution { .. })));
    }

    #[test]
    fn test_resolve_ambiguous_strict_fails() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sub-01_b.nii");
        touch(dir.path(), "sub-01_a.nii");

        let resolver = ArtifactResolver::new(dir.path(), AmbiguityPolicy::Strict);
        let result = resolver.resolve("{subject_id}_*.nii", &binding());
        assert!(matches!(
            result,
            Err(StrucflowError::AmbiguousResolution { .. })
        ));
    }

    #[test]
    fn test_resolve_ambiguous_first_picks_smallest_stably() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sub-01_b.nii");
        touch(dir.path(), "sub-01_a.nii");

        let resolver = ArtifactResolver::new(dir.path(), AmbiguityPolicy::First);
        let first = resolver.resolve("{subject_id}_*.nii", &binding()).unwrap();
        let second = resolver.resolve("{subject_id}_*.nii", &binding()).unwrap();

        assert_eq!(first, dir.path().join("sub-01_a.nii"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_all_sorted() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sub-01_c.nii");
        touch(dir.path(), "sub-01_a.nii");
        touch(dir.path(), "sub-01_b.nii");

        let resolver = ArtifactResolver::new(dir.path(), AmbiguityPolicy::Strict);
        let all = resolver.resolve_all("{subject_id}_*.nii", &binding()).unwrap();
        let names: Vec<_> = all
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["sub-01_a.nii", "sub-01_b.nii", "sub-01_c.nii"]);
    }
}
