use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(name)
}

fn ghostflow(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ghostflow").unwrap();
    cmd.current_dir(workdir)
        .env("GHOSTFLOW_ARTIFACTS", workdir.join("artifacts"))
        .env("GHOSTFLOW_CONFIG", workdir.join("no-config.yml"))
        .env_remove("GHOSTFLOW_LIMITS")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_preview() {
    let dir = tempfile::tempdir().unwrap();
    ghostflow(dir.path())
        .arg("preview")
        .arg(fixture("flows/hello.yml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow: hello (5 steps)"))
        .stdout(predicate::str::contains("flaky_check"))
        .stdout(predicate::str::contains("2/0.5s/2"));
}

#[test]
fn test_lint_fails_on_cycle() {
    let dir = tempfile::tempdir().unwrap();
    ghostflow(dir.path())
        .arg("lint")
        .arg(fixture("tests/fixtures/cycle.yml"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[ERROR] workflow: dependency cycle"));
}

#[test]
fn test_lint_passes_with_warnings() {
    let dir = tempfile::tempdir().unwrap();
    ghostflow(dir.path())
        .arg("lint")
        .arg(fixture("flows/hello.yml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("0 error(s)"));
}

#[test]
fn test_invalid_workflow_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    ghostflow(dir.path())
        .arg("preview")
        .arg(fixture("tests/fixtures/bad_target.yml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("moon"));
}

#[test]
fn test_dry_run_executes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    ghostflow(dir.path())
        .args(["run", "--dry-run"])
        .arg(fixture("tests/fixtures/chain.yml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow: chain (3 steps)"))
        .stdout(predicate::str::contains("FAIL").not());
    assert!(!dir.path().join(".ghostflow").exists());
}

#[test]
fn test_run_then_rerun_failed() {
    let dir = tempfile::tempdir().unwrap();
    ghostflow(dir.path())
        .arg("run")
        .arg(fixture("tests/fixtures/chain.yml"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("OK first"))
        .stdout(predicate::str::contains("FAIL broken (exit 3"))
        .stdout(predicate::str::contains("SKIPPED last"))
        .stdout(predicate::str::contains("FAIL 1 · SKIPPED 1"));
    assert!(dir.path().join(".ghostflow/last_run.json").is_file());

    ghostflow(dir.path())
        .args(["rerun", "failed"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("broken (failed)"))
        .stdout(predicate::str::contains("chain (rerun failed) (1 steps)"));
}

#[test]
fn test_run_from_index() {
    let dir = tempfile::tempdir().unwrap();
    ghostflow(dir.path())
        .args(["run", "--from", "3"])
        .arg(fixture("tests/fixtures/chain.yml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("OK last"))
        .stdout(predicate::str::contains("first").not());
}

#[test]
fn test_rerun_without_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    ghostflow(dir.path())
        .args(["rerun", "changed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no previous run"));
}
