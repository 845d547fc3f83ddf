#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SPEC: &str = "\
# Technical Specification: User Auth

## Overview
Email and password login.

# Implementation Tasks

## Phase 1: Foundation
- [x] **1.1 Create users table** Maps to: Story 1
  - [x] Migration applied
- [ ] **1.2 Password hashing**
  Depends on: 1.1

## Phase 2: API
- [ ] **2.1 Login endpoint**
- [ ] **2.2 Logout endpoint**
  Depends on: 2.1
- [ ] **2.3 Session refresh**
";

fn sam(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sam").unwrap();
    cmd.current_dir(dir.path())
        .env("SAM_ROOT", dir.path())
        .env_remove("SAM_MAX_PARALLEL_SUBAGENTS");
    cmd
}

fn feature(dir: &TempDir, id: &str, spec: &str) -> PathBuf {
    let path = dir.path().join(".sam").join(id);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join("TECHNICAL_SPEC.md"), spec).unwrap();
    path
}

fn json_output(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in std::fs::read_dir(&d).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path.clone());
                out.push((path, Vec::new()));
            } else {
                let data = std::fs::read(&path).unwrap();
                out.push((path, data));
            }
        }
    }
    out.sort();
    out
}

// ---------------------------------------------------------------------------
// sam parse
// ---------------------------------------------------------------------------

#[test]
fn parse_writes_registry() {
    let dir = TempDir::new().unwrap();
    let f = feature(&dir, "001_user_auth", SPEC);

    sam(&dir)
        .args(["parse", "001_user_auth"])
        .assert()
        .success()
        .stdout(predicate::str::contains("User Auth"))
        .stdout(predicate::str::contains("1/5"));

    let registry: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(f.join("TASKS.json")).unwrap()).unwrap();
    assert_eq!(registry["metadata"]["feature_id"], "001_user_auth");
    assert_eq!(registry["metadata"]["total_tasks"], 5);
    assert_eq!(registry["metadata"]["completed_tasks"], 1);
    assert_eq!(registry["metadata"]["current_phase"], "1");
    assert_eq!(registry["metadata"]["spec_version"], "2.0");
    assert_eq!(registry["phases"][0]["tasks"][0]["story_mapping"], "1");
    assert_eq!(registry["phases"][0]["tasks"][1]["dependencies"][0], "1.1");
}

#[test]
fn parse_accepts_feature_path() {
    let dir = TempDir::new().unwrap();
    let f = feature(&dir, "001_user_auth", SPEC);
    sam(&dir)
        .args(["parse", f.to_str().unwrap()])
        .assert()
        .success();
    assert!(f.join("TASKS.json").is_file());
}

#[test]
fn spec_without_task_region_has_no_phases() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "002_notes", "# Notes\n\nJust prose.\n## Phase 1: Not tasks\n");

    let out = json_output(sam(&dir).args(["parse", "002_notes", "--json"]));
    assert_eq!(out["progress"]["total_tasks"], 0);
    assert_eq!(out["phases"].as_array().unwrap().len(), 0);
}

#[test]
fn phases_keep_discovery_order() {
    let dir = TempDir::new().unwrap();
    let spec = "\
# Implementation Tasks

## Phase 2: Backend
- [ ] **2.1 API**

## Phase 1: Foundation
- [ ] **1.1 Schema**
";
    feature(&dir, "003_order", spec);

    let out = json_output(sam(&dir).args(["parse", "003_order", "--json"]));
    let ids: Vec<_> = out["phases"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["phase_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["2", "1"]);
    assert_eq!(out["out_of_order_phases"][0], "1");
}

#[test]
fn malformed_phase_heading_fails_without_writing() {
    let dir = TempDir::new().unwrap();
    let f = feature(&dir, "004_bad", "# Implementation Tasks\n\n## Phase 1:\n- [ ] **1.1 X**\n");

    sam(&dir)
        .args(["parse", "004_bad"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("line 3"));
    assert!(!f.join("TASKS.json").exists());
}

#[test]
fn duplicate_task_ids_fail() {
    let dir = TempDir::new().unwrap();
    feature(
        &dir,
        "005_dup",
        "# Implementation Tasks\n## Phase 1: A\n- [ ] **1.1 a**\n- [ ] **1.1 b**\n",
    );
    sam(&dir)
        .args(["parse", "005_dup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate task id '1.1'"));
}

#[test]
fn unknown_feature_fails() {
    let dir = TempDir::new().unwrap();
    sam(&dir)
        .args(["parse", "999_missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("999_missing"));
}

// ---------------------------------------------------------------------------
// sam outline
// ---------------------------------------------------------------------------

#[test]
fn outline_lists_sections() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);

    sam(&dir)
        .args(["outline", "001_user_auth"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Technical Specification: User Auth"))
        .stdout(predicate::str::contains("Phase 2: API"))
        .stdout(predicate::str::contains("2 phases, 5 tasks"));

    let out = json_output(sam(&dir).args(["outline", "001_user_auth", "--json"]));
    assert_eq!(out["sections"][0]["level"], 1);
    assert_eq!(out["sections"][0]["line_start"], 1);
    assert_eq!(out["sections"][0]["line_count"], 2);
    assert_eq!(out["phases"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// sam migrate
// ---------------------------------------------------------------------------

#[test]
fn migrate_splits_spec() {
    let dir = TempDir::new().unwrap();
    let f = feature(&dir, "001_user_auth", SPEC);

    sam(&dir)
        .args(["migrate", "001_user_auth"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 phases"));

    assert!(f.join("TASKS.json").is_file());
    assert!(f.join("IMPLEMENTATION_TASKS/PHASE_1_FOUNDATION.md").is_file());
    assert!(f.join("IMPLEMENTATION_TASKS/PHASE_2_API.md").is_file());
    assert!(f.join("IMPLEMENTATION_TASKS/IMPLEMENTATION_TASKS.md").is_file());
    assert_eq!(
        std::fs::read_to_string(f.join("TECHNICAL_SPEC.md.backup")).unwrap(),
        SPEC
    );

    let main = std::fs::read_to_string(f.join("TECHNICAL_SPEC.md")).unwrap();
    assert!(main.starts_with("# Technical Specification: User Auth"));
    assert!(main.contains("IMPLEMENTATION_TASKS/PHASE_1_FOUNDATION.md"));
    assert!(!main.contains("Password hashing"));

    let phase = std::fs::read_to_string(f.join("IMPLEMENTATION_TASKS/PHASE_1_FOUNDATION.md")).unwrap();
    assert!(phase.starts_with("# Phase 1: Foundation\n\n## Phase 1: Foundation\n"));
    assert!(phase.contains("Password hashing"));
}

#[test]
fn migrate_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);
    let before = snapshot(dir.path());

    let preview = json_output(sam(&dir).args(["migrate", "001_user_auth", "--dry-run", "--json"]));
    assert_eq!(snapshot(dir.path()), before);
    assert_eq!(preview["dry_run"], true);
    assert!(preview["backup"].is_null());

    let real = json_output(sam(&dir).args(["migrate", "001_user_auth", "--json"]));
    assert_eq!(preview["phase_count"], real["phase_count"]);
    assert_eq!(preview["files"], real["files"]);
}

#[test]
fn second_migrate_without_force_is_refused() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);
    sam(&dir).args(["migrate", "001_user_auth"]).assert().success();

    let before = snapshot(dir.path());
    sam(&dir)
        .args(["migrate", "001_user_auth"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"))
        .stderr(predicate::str::contains("--force"));
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn migrate_force_overwrites() {
    let dir = TempDir::new().unwrap();
    let f = feature(&dir, "001_user_auth", SPEC);
    std::fs::write(f.join("TASKS.json"), "{}").unwrap();

    sam(&dir)
        .args(["migrate", "001_user_auth"])
        .assert()
        .failure();
    sam(&dir)
        .args(["migrate", "001_user_auth", "--force"])
        .assert()
        .success();
    let registry = std::fs::read_to_string(f.join("TASKS.json")).unwrap();
    assert!(registry.contains("\"total_tasks\": 5"));
}

// ---------------------------------------------------------------------------
// sam task
// ---------------------------------------------------------------------------

#[test]
fn task_update_and_show() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);
    sam(&dir).args(["parse", "001_user_auth"]).assert().success();

    sam(&dir)
        .args(["task", "update", "001_user_auth", "1.2", "--status", "completed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated task [1.2] to completed"));

    let out = json_output(sam(&dir).args(["task", "show", "001_user_auth", "--json"]));
    assert_eq!(out["metadata"]["completed_tasks"], 2);
    assert_eq!(out["metadata"]["current_phase"], "2");

    sam(&dir)
        .args(["task", "show", "001_user_auth"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Foundation"))
        .stdout(predicate::str::contains("completed"));
}

#[test]
fn task_update_rejects_unknown_task_and_status() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);
    sam(&dir).args(["parse", "001_user_auth"]).assert().success();

    sam(&dir)
        .args(["task", "update", "001_user_auth", "9.9", "--status", "completed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task not found: 9.9"));
    sam(&dir)
        .args(["task", "update", "001_user_auth", "1.2", "--status", "done"])
        .assert()
        .failure();
}

#[test]
fn task_get_shows_details() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);
    sam(&dir).args(["parse", "001_user_auth"]).assert().success();

    sam(&dir)
        .args(["task", "get", "001_user_auth", "1.1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Create users table"))
        .stdout(predicate::str::contains("Migration applied"));
}

#[test]
fn task_commands_need_a_registry() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);
    sam(&dir)
        .args(["task", "show", "001_user_auth"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sam parse 001_user_auth"));
}

#[test]
fn checkpoint_increments_iteration() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);
    sam(&dir).args(["parse", "001_user_auth"]).assert().success();

    sam(&dir)
        .args(["task", "checkpoint", "001_user_auth", "--task", "1.1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("iteration 1"));
    let out = json_output(sam(&dir).args([
        "task",
        "checkpoint",
        "001_user_auth",
        "--gate",
        "lint=passed",
        "--json",
    ]));
    assert_eq!(out["iteration_count"], 2);
    assert_eq!(out["last_completed_task"], "1.1");
    assert_eq!(out["last_quality_gate_result"]["lint"], "passed");
}

#[test]
fn resume_parallel_respects_limit_and_dependencies() {
    let dir = TempDir::new().unwrap();
    feature(&dir, "001_user_auth", SPEC);
    sam(&dir).args(["parse", "001_user_auth"]).assert().success();
    sam(&dir)
        .args(["task", "update", "001_user_auth", "1.2", "--status", "completed"])
        .assert()
        .success();

    let out = json_output(sam(&dir).args(["task", "resume", "001_user_auth", "--parallel", "--json"]));
    assert_eq!(out["current_phase"], "2");
    assert_eq!(out["max_parallel"], 3);
    let ready: Vec<_> = out["next_tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["task_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ready, ["2.1", "2.3"]);

    let out = json_output(
        sam(&dir)
            .env("SAM_MAX_PARALLEL_SUBAGENTS", "1")
            .args(["task", "resume", "001_user_auth", "--parallel", "--json"]),
    );
    assert_eq!(out["next_tasks"].as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// sam context
// ---------------------------------------------------------------------------

fn context_fixture(dir: &TempDir) -> PathBuf {
    let f = feature(dir, "001_user_auth", SPEC);
    std::fs::create_dir_all(dir.path().join(".sam/templates")).unwrap();
    std::fs::write(
        dir.path().join(".sam/templates/CONTEXT.yaml"),
        "application:\n  name: Platform\n  version: 0.1.0\ndatabase:\n  host: localhost\n  port: 5432\n",
    )
    .unwrap();
    std::fs::write(
        f.join("CONTEXT.yaml"),
        "application:\n  name: MyApp\n  version: 1.0.0\ndatabase:\n  port: 3306\n",
    )
    .unwrap();
    f
}

#[test]
fn context_get_merges_layers() {
    let dir = TempDir::new().unwrap();
    context_fixture(&dir);

    sam(&dir)
        .args(["context", "get", "001_user_auth", "database.port"])
        .assert()
        .success()
        .stdout("3306\n");
    sam(&dir)
        .args(["context", "get", "001_user_auth", "database.host"])
        .assert()
        .success()
        .stdout("localhost\n");
    sam(&dir)
        .args(["context", "get", "001_user_auth", "database.user"])
        .assert()
        .failure();
    sam(&dir)
        .args(["context", "get", "001_user_auth", "database.user", "--default", "app"])
        .assert()
        .success()
        .stdout("app\n");
}

#[test]
fn context_resolve_interpolates_and_fails_open() {
    let dir = TempDir::new().unwrap();
    context_fixture(&dir);

    sam(&dir)
        .args([
            "context",
            "resolve",
            "001_user_auth",
            "{{application.name}} v{{application.version}}",
        ])
        .assert()
        .success()
        .stdout("MyApp v1.0.0");
    sam(&dir)
        .args(["context", "resolve", "001_user_auth", "{{missing.path}}"])
        .assert()
        .success()
        .stdout("{{missing.path}}");
}

#[test]
fn context_resolve_strict_requires_required_placeholders() {
    let dir = TempDir::new().unwrap();
    context_fixture(&dir);

    sam(&dir)
        .args([
            "context",
            "resolve",
            "001_user_auth",
            "{{application.description}}",
            "--strict",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("application.description"));
}

#[test]
fn context_resolve_file_to_file() {
    let dir = TempDir::new().unwrap();
    context_fixture(&dir);
    let input = dir.path().join("README.tmpl.md");
    let output = dir.path().join("out/README.md");
    std::fs::write(&input, "# {{application.name}}\nport {{database.port}}\n").unwrap();

    sam(&dir)
        .args(["context", "resolve", "001_user_auth", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "# MyApp\nport 3306\n"
    );
}

#[test]
fn context_set_writes_feature_layer_only() {
    let dir = TempDir::new().unwrap();
    let f = context_fixture(&dir);
    let global_before = std::fs::read_to_string(dir.path().join(".sam/templates/CONTEXT.yaml")).unwrap();

    sam(&dir)
        .args(["context", "set", "001_user_auth", "cache.ttl", "600"])
        .assert()
        .success();
    sam(&dir)
        .args(["context", "get", "001_user_auth", "cache.ttl"])
        .assert()
        .success()
        .stdout("600\n");

    assert!(std::fs::read_to_string(f.join("CONTEXT.yaml")).unwrap().contains("ttl: 600"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join(".sam/templates/CONTEXT.yaml")).unwrap(),
        global_before
    );
}

#[test]
fn context_export_json() {
    let dir = TempDir::new().unwrap();
    context_fixture(&dir);
    let out = json_output(sam(&dir).args(["context", "export", "001_user_auth", "--format", "json"]));
    assert_eq!(out["database"]["port"], 3306);
    assert_eq!(out["database"]["host"], "localhost");
}

#[test]
fn context_check_reports_problems() {
    let dir = TempDir::new().unwrap();
    let f = feature(&dir, "006_bare", SPEC);
    std::fs::write(f.join("CONTEXT.yaml"), "database:\n  port: 1\n").unwrap();
    let global = dir.path().join("global.yaml");
    std::fs::write(&global, "{}\n").unwrap();

    sam(&dir)
        .args(["context", "check", "006_bare", "--global"])
        .arg(&global)
        .assert()
        .success()
        .stdout(predicate::str::contains("missing required context section: application"));
    sam(&dir)
        .args(["context", "check", "006_bare", "--strict", "--global"])
        .arg(&global)
        .assert()
        .failure();
}

#[test]
fn context_check_template_report() {
    let dir = TempDir::new().unwrap();
    context_fixture(&dir);
    let template = dir.path().join("t.md");
    std::fs::write(&template, "{{application.name}} {{api.port}}\n").unwrap();

    let out = json_output(
        sam(&dir)
            .args(["context", "check", "001_user_auth", "--json", "--template"])
            .arg(&template),
    );
    assert_eq!(out["template"]["missing_optional"][0], "api.port");
    assert_eq!(out["template"]["suggestions"]["api.port"], "3000");
    assert!(out["problems"].as_array().unwrap().is_empty());
}
