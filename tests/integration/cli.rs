#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

#[test]
fn help_lists_node_flags() {
    let output = cargo_bin_cmd!("meridian").arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--port", "--bindall", "--nomutations", "--trace", "--allow-origin"] {
        assert!(stdout.contains(flag), "missing {flag} in:\n{stdout}");
    }
}

#[test]
fn missing_config_file_fails() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let output = cargo_bin_cmd!("meridian")
        .arg("--config")
        .arg(&path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read config"), "{stderr}");
}

#[test]
fn flags_are_validated_after_merging_the_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(&path, "trace = 0.5\n").unwrap();
    let output = cargo_bin_cmd!("meridian")
        .arg("--config")
        .arg(&path)
        .args(["--trace", "2"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid trace"), "{stderr}");
}
