// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! End-to-end CLI tests against the compiled binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path) {
    let yaml = format!(
        r#"
data_dir: {data}
output_dir: {out}
subjects: [sub-01, sub-02]
segment:
  tpm: {data}/TPM.nii
"#,
        data = dir.join("bids").display(),
        out = dir.join("derivatives").display(),
    );
    std::fs::create_dir_all(dir.join("bids")).unwrap();
    std::fs::write(dir.join(".strucflow.yaml"), yaml).unwrap();
}

fn strucflow(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("strucflow").unwrap();
    cmd.current_dir(dir);
    cmd
}

#[test]
fn validate_reports_stages_and_subjects() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());

    strucflow(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 stage(s), 2 subject(s)"));
}

#[test]
fn run_without_config_fails_with_hint() {
    let dir = TempDir::new().unwrap();

    strucflow(dir.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read config file"));
}

#[test]
fn graph_text_lists_execution_order() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());

    strucflow(dir.path())
        .arg("graph")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("1. segment")
                .and(predicate::str::contains("3. template (dartel)")),
        );
}

#[test]
fn graph_dot_marks_join_edges() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());

    strucflow(dir.path())
        .args(["graph", "--format", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "\"segment\" -> \"gather\" [style=dashed];",
        ));
}

#[test]
fn dry_run_expands_all_subjects() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());

    strucflow(dir.path())
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("segment [sub-01]")
                .and(predicate::str::contains("segment [sub-02]"))
                .and(predicate::str::contains("template [group]")),
        );
}

#[test]
fn cache_stats_on_fresh_project_is_empty() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path());

    strucflow(dir.path())
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:  0"));
}
