//! CLI binary smoke tests using assert_cmd.
//!
//! These run the compiled `clinpred` binary against a small generated table
//! to check argument parsing, config loading and the JSON outputs.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn cmd() -> Command {
    Command::cargo_bin("clinpred").unwrap()
}

const SCHEMA: &str = r#"{
    "name": "toy",
    "inputs": [
        {"name": "dose", "kind": "numeric", "min": {"value": 0.0}},
        {"name": "smoker", "kind": "yes_no"}
    ],
    "outputs": [
        {"name": "dose", "op": "field", "field": "dose"},
        {"name": "dose_log", "op": "log1p", "field": "dose"},
        {"name": "smoker", "op": "field", "field": "smoker"}
    ],
    "target": {"column": "outcome", "classes": ["well", "ill"]}
}"#;

/// Writes a labelled table and a config next to it; returns the config path.
fn fixture(dir: &Path) -> PathBuf {
    let data = dir.join("toy.csv");
    let mut table = String::from("dose,smoker,outcome\n");
    for i in 0..80 {
        let dose = (i * 37 % 80) as f64 / 2.0;
        let smokes = i % 3 == 0;
        let risk = dose + if smokes { 8.0 } else { 0.0 };
        let smoker = if smokes { "Yes" } else { "No" };
        let outcome = if risk > 22.0 { "ill" } else { "well" };
        table.push_str(&format!("{},{},{}\n", dose, smoker, outcome));
    }
    std::fs::write(&data, table).unwrap();

    let config = dir.join("dashboard.json");
    let json = format!(
        r#"{{"dataset": "{}", "schema": {}, "default_model": "lr"}}"#,
        data.display(),
        SCHEMA
    );
    std::fs::write(&config, json).unwrap();
    config
}

// ---------------------------------------------------------------------------
// Top-level
// ---------------------------------------------------------------------------

#[test]
fn no_args_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_flag() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("evaluate"))
        .stdout(predicate::str::contains("explain"))
        .stdout(predicate::str::contains("predict"));
}

#[test]
fn version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("clinpred"));
}

#[test]
fn variants_lists_the_registry() {
    cmd()
        .arg("variants")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"lightgbm\""))
        .stdout(predicate::str::contains("\"random_forest\""))
        .stdout(predicate::str::contains("\"logistic_regression\""));
}

// ---------------------------------------------------------------------------
// Config handling
// ---------------------------------------------------------------------------

#[test]
fn evaluate_no_config_prints_template() {
    cmd()
        .arg("evaluate")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dataset\""))
        .stdout(predicate::str::contains("\"default_model\""))
        .stderr(predicate::str::contains("No config file provided"));
}

#[test]
fn evaluate_nonexistent_config_errors() {
    cmd()
        .args(["evaluate", "/nonexistent/dashboard.json"])
        .assert()
        .failure();
}

#[test]
fn unknown_model_override_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path());
    cmd()
        .arg("evaluate")
        .arg(&config)
        .args(["--model", "naive_bayes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("naive_bayes"));
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn evaluate_writes_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path());
    let out = dir.path().join("eval.json");
    cmd()
        .arg("evaluate")
        .arg(&config)
        .args(["-m", "xgb", "-o"])
        .arg(&out)
        .assert()
        .success();

    let json = std::fs::read_to_string(&out).unwrap();
    assert!(json.contains("\"model_id\": \"xgboost\""));
    assert!(json.contains("Accuracy"));
}

#[test]
fn explain_linear_model_needs_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path());
    cmd()
        .arg("explain")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("model-agnostic"));

    cmd()
        .arg("explain")
        .arg(&config)
        .args(["--allow-model-agnostic", "--top-n", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"ranking\""))
        .stdout(predicate::str::contains("mean_abs_shap"));
}

#[test]
fn predict_with_waterfall() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path());
    let record = dir.path().join("patient.json");
    std::fs::write(&record, r#"{"dose": 30, "smoker": "yes"}"#).unwrap();

    cmd()
        .arg("predict")
        .arg(&config)
        .args(["-m", "rf", "--waterfall", "--record"])
        .arg(&record)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"probabilities\""))
        .stdout(predicate::str::contains("\"kind\": \"waterfall\""));
}

#[test]
fn predict_rejects_invalid_record() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path());
    let record = dir.path().join("patient.json");
    std::fs::write(&record, r#"{"dose": -1, "smoker": "yes"}"#).unwrap();

    cmd()
        .arg("predict")
        .arg(&config)
        .arg("--record")
        .arg(&record)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid record"));
}
