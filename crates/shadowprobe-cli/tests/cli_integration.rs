use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// A command with no credentials or config coming from the environment.
fn shadowprobe() -> Command {
    let mut cmd = Command::cargo_bin("shadowprobe").unwrap();
    for var in [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_SESSION_TOKEN",
        "ACCESS_KEY_ID",
        "SECRET_ACCESS_KEY",
        "SHADOWPROBE_CONFIG",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_exits_zero() {
    shadowprobe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("shadowprobe"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("observe"));
}

#[test]
fn test_config_prints_effective_json() {
    let assert = shadowprobe()
        .args(["config", "--config"])
        .arg(fixture_path("bench.json"))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let config: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(config["shadow"]["thing_name"], "BenchSensor");
    assert_eq!(config["shadow"]["region"], "eu-west-1");
    assert_eq!(config["simulator"]["port"], 7411);
    assert_eq!(config["trial"]["count"], 5);
    assert_eq!(config["trial"]["mode"], "fail_fast");
    // Unset values fall back to defaults.
    assert_eq!(config["shadow"]["field_path"], "state.desired.temprature");
    assert_eq!(config["trial"]["stimulus"]["line"], "BUTTON1");
}

#[test]
fn test_config_show_path() {
    let path = fixture_path("bench.json");
    shadowprobe()
        .args(["config", "--show-path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains(path.to_str().unwrap()));
}

#[test]
fn test_config_init_writes_defaults_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    shadowprobe()
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .success();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["trial"]["count"], 20);
    assert_eq!(written["trial"]["window"]["low"], 20.0);

    shadowprobe()
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_missing_explicit_config_is_error() {
    shadowprobe()
        .args(["config", "--config", "definitely_missing_config_file.json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("definitely_missing_config_file.json"));
}

#[test]
fn test_unparseable_config_is_error() {
    shadowprobe()
        .args(["run", "--config"])
        .arg(fixture_path("not_json.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_inverted_window_in_file_is_rejected() {
    shadowprobe()
        .args(["run", "--config"])
        .arg(fixture_path("inverted_window.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("greater than upper bound"));
}

#[test]
fn test_inverted_window_flags_are_rejected() {
    shadowprobe()
        .args(["run", "--low", "50", "--high", "10", "--config"])
        .arg(fixture_path("bench.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("greater than upper bound"));
}

#[test]
fn test_zero_trials_is_rejected() {
    shadowprobe()
        .args(["run", "--trials", "0", "--config"])
        .arg(fixture_path("bench.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("trial.count"));
}

#[test]
fn test_run_without_credentials_is_config_error() {
    shadowprobe()
        .args(["run", "--config"])
        .arg(fixture_path("bench.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("AWS_ACCESS_KEY_ID"));
}

#[test]
fn test_observe_without_credentials_is_config_error() {
    shadowprobe()
        .args(["observe", "BenchSensor", "--config"])
        .arg(fixture_path("bench.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("AWS_ACCESS_KEY_ID"));
}

#[test]
fn test_unknown_subcommand() {
    shadowprobe()
        .arg("totally-fake-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
