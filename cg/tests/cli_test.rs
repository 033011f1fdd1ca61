//! Binary surface tests for `cg`

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cg(dir: &TempDir) -> Command {
    let config = dir.path().join("consentgen.yml");
    std::fs::write(&config, "connector:\n  token-env: CONSENTGEN_CLI_TEST_TOKEN\n").unwrap();
    let mut cmd = Command::cargo_bin("cg").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("CONSENTGEN_CLI_TEST_TOKEN")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .arg("--config")
        .arg(&config);
    cmd
}

#[test]
fn test_expand_all() {
    let dir = TempDir::new().unwrap();
    let output = cg(&dir).arg("expand").assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output).unwrap();
    assert_eq!(stdout.lines().count(), 40);
    assert!(stdout.contains("Evidon Consent Blocking - Formsubmission - Analytics"));
    assert!(stdout.contains("Evidon Consent Blocking - Youtubevideo - Undefined"));
}

#[test]
fn test_expand_subset_json() {
    let dir = TempDir::new().unwrap();
    let output = cg(&dir)
        .args([
            "expand",
            "--format",
            "json",
            "--kind",
            "pageview",
            "--kind",
            "customEvent",
            "--category",
            "analytics",
            "--category",
            "undefined",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let triggers: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let triggers = triggers.as_array().unwrap();
    assert_eq!(triggers.len(), 4);
    assert_eq!(triggers[0]["name"], "Evidon Consent Blocking - Pageview - Analytics");
    assert_eq!(triggers[0]["type"], "pageview");
    assert_eq!(triggers[0]["filter"][0]["type"], "matchRegex");
    assert_eq!(triggers[0]["filter"][0]["parameter"][1]["value"], "analytics|all");
    assert!(triggers[0].get("customEventFilter").is_none());
    assert_eq!(triggers[1]["filter"][0]["parameter"][1]["value"], "undefined");
    assert_eq!(triggers[2]["name"], "Evidon Consent Blocking - Customevent - Analytics");
    assert!(triggers[2].get("customEventFilter").is_some());
    assert!(triggers[3].get("customEventFilter").is_some());
}

#[test]
fn test_run_without_container_fails_fast() {
    let dir = TempDir::new().unwrap();
    cg(&dir)
        .args(["run", "--workspace", "Consent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("container"));
}

#[test]
fn test_plan_without_token_fails_fast() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("with-container.yml");
    std::fs::write(
        &config,
        "connector:\n  container-path: accounts/1/containers/2\n  token-env: CONSENTGEN_CLI_TEST_TOKEN\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("cg").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("CONSENTGEN_CLI_TEST_TOKEN")
        .arg("--config")
        .arg(&config)
        .args(["plan", "--workspace", "Consent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONSENTGEN_CLI_TEST_TOKEN"));
}

#[test]
fn test_unknown_category_rejected() {
    let dir = TempDir::new().unwrap();
    cg(&dir)
        .args(["expand", "--category", "essential"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown consent category"));
}

#[test]
fn test_rust_log_used_when_no_level_given() {
    let dir = TempDir::new().unwrap();
    cg(&dir)
        .env("RUST_LOG", "debug")
        .args(["expand", "-k", "click", "-g", "undefined"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Expander::expand: called"));
}

#[test]
fn test_default_level_hides_debug() {
    let dir = TempDir::new().unwrap();
    cg(&dir)
        .args(["expand", "-k", "click", "-g", "undefined"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Expander::expand: called").not());
}

#[test]
fn test_log_level_flag_beats_rust_log() {
    let dir = TempDir::new().unwrap();
    cg(&dir)
        .env("RUST_LOG", "debug")
        .args(["--log-level", "warn", "expand", "-k", "click", "-g", "undefined"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Expander::expand: called").not());
}
