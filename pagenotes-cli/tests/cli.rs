use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

/// Runs the binary with config, data and log directories inside `home`.
fn pagenotes(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pagenotes").expect("binary should be built");
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env_remove("PAGENOTES_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn write(path: &Path, contents: &str) {
    fs::write(path, contents).expect("fixture should be written");
}

#[test]
fn help_lists_commands() {
    let home = tempdir().unwrap();
    pagenotes(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("view"))
        .stdout(predicate::str::contains("notes"))
        .stdout(predicate::str::contains("ask"));
}

#[test]
fn notes_fails_for_missing_file() {
    let home = tempdir().unwrap();
    pagenotes(&home)
        .arg("notes")
        .arg(home.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn reversed_range_is_rejected_by_argument_parsing() {
    let home = tempdir().unwrap();
    pagenotes(&home)
        .args(["notes", "doc.pdf", "--range", "9-3"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("start page 9 is after end page 3"));
}

#[test]
fn explicit_config_must_exist() {
    let home = tempdir().unwrap();
    pagenotes(&home)
        .arg("--config")
        .arg(home.path().join("nope.toml"))
        .args(["notes", "doc.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn invalid_config_is_reported() {
    let home = tempdir().unwrap();
    let config = home.path().join("config.toml");
    write(&config, "[notes]\nmin_output_ratio = 3.0\n");
    pagenotes(&home)
        .arg("--config")
        .arg(&config)
        .args(["notes", "doc.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("notes.min_output_ratio"));
}

#[test]
fn ask_requires_a_credential() {
    let home = tempdir().unwrap();
    let pdf = home.path().join("doc.pdf");
    write(&pdf, "%PDF-1.4\n");
    pagenotes(&home)
        .arg("ask")
        .arg(&pdf)
        .arg("what is this?")
        .assert()
        .failure()
        .stderr(predicate::str::contains("PAGENOTES_API_KEY"));
}
