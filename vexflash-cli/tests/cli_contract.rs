//! Integration tests for core CLI contract behavior.

use {
    predicates::prelude::*,
    std::{fs, path::Path},
    tempfile::{TempDir, tempdir},
};

const SMALL_HEX: &str = ":050800000102030405E4\n:00000001FF\n";

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("vexflash")
}

/// A command isolated from the user's own configuration files.
fn isolated_cmd(dir: &Path) -> assert_cmd::Command {
    let config = dir.join("empty.toml");
    fs::write(&config, "").expect("write empty config");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir)
        .env_remove("VEXFLASH_PORT")
        .env_remove("VEXFLASH_TIMEOUT")
        .env_remove("VEXFLASH_NON_INTERACTIVE")
        .arg("--config")
        .arg(config);
    cmd
}

fn write_hex(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = tempdir().expect("tempdir should be created");
    let path = dir.path().join("robot.hex");
    fs::write(&path, contents).expect("write hex file");
    (dir, path)
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("vexflash"))
        .stdout(predicate::str::contains("upload"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vexflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn info_json_reports_image_summary() {
    let (dir, hex) = write_hex(SMALL_HEX);

    let output = isolated_cmd(dir.path())
        .arg("info")
        .arg("--json")
        .arg(&hex)
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    assert_eq!(parsed["data"]["start_address"], "0x0800");
    assert_eq!(parsed["data"]["length"], 5);
    assert_eq!(parsed["data"]["erase_rows"], 1);
}

#[test]
fn info_text_writes_summary_to_stderr() {
    let (dir, hex) = write_hex(SMALL_HEX);

    isolated_cmd(dir.path())
        .arg("info")
        .arg(&hex)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("0x0800"));
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.hex");

    isolated_cmd(dir.path())
        .arg("info")
        .arg("--json")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn info_rejects_bad_checksum() {
    let (dir, hex) = write_hex(":050800000102030405E5\n:00000001FF\n");

    isolated_cmd(dir.path())
        .arg("info")
        .arg(&hex)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("checksum"));
}

#[test]
fn non_interactive_upload_without_yes_is_usage_error() {
    let (dir, hex) = write_hex(SMALL_HEX);

    isolated_cmd(dir.path())
        .arg("--non-interactive")
        .arg("upload")
        .arg(&hex)
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn upload_missing_file_fails_before_touching_ports() {
    let dir = tempdir().expect("tempdir should be created");

    isolated_cmd(dir.path())
        .args(["--port", "INVALID_PORT_NAME_XYZ", "upload", "--yes"])
        .arg(dir.path().join("missing.hex"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("missing.hex"));
}

#[test]
fn upload_to_invalid_port_fails() {
    let (dir, hex) = write_hex(SMALL_HEX);

    isolated_cmd(dir.path())
        .args(["--port", "INVALID_PORT_NAME_XYZ", "upload", "--yes"])
        .arg(&hex)
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
}

#[test]
fn read_length_above_limit_is_usage_error() {
    let mut cmd = cli_cmd();
    cmd.args(["read", "--address", "0x0800", "--length", "101"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn read_with_bad_address_is_usage_error() {
    let mut cmd = cli_cmd();
    cmd.args(["read", "--address", "zz"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid hex address"));
}

#[test]
fn unknown_command_is_usage_error() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("json"));
}

#[test]
fn list_ports_text_goes_to_stderr() {
    let dir = tempdir().expect("tempdir should be created");

    isolated_cmd(dir.path())
        .arg("list-ports")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Serial ports"));
}

#[test]
fn list_ports_json_is_a_single_document() {
    let dir = tempdir().expect("tempdir should be created");

    let output = isolated_cmd(dir.path())
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    assert!(parsed["data"]["ports"].is_array());
}

#[test]
fn invalid_config_file_is_not_fatal() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("broken.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["list-ports", "--json"])
        .assert()
        .success();
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_vexflash()"));
}

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    let dir = tempdir().expect("tempdir should be created");

    isolated_cmd(dir.path())
        .arg("info")
        .arg("--")
        .arg("-robot.hex")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn non_interactive_environment_variable_works() {
    let mut cmd = cli_cmd();
    cmd.env("VEXFLASH_NON_INTERACTIVE", "true")
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn colors_disabled_when_not_tty() {
    let output = cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(!stdout.contains("\x1b["), "Colors should be disabled in non-TTY mode");
}
