use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

fn gsh() -> assert_cmd::Command {
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("gsh").into();
    cmd.env_remove("GSH_ACCESS_TOKEN");
    cmd
}

fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let config_path = dir.path().join("config.toml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    write!(f, "{contents}").unwrap();
    config_path
}

fn empty_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    write_config(dir, "")
}

#[test]
fn help_works() {
    gsh()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("SSH, SCP and container instances"))
        .stdout(predicate::str::contains("create-with-container"));
}

#[test]
fn missing_config_shows_error() {
    gsh()
        .args(["--config", "/nonexistent/gsh.toml", "ssh", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn malformed_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, "[ssh]\nstrict_host_key_checking = \"maybe\"\n");

    gsh()
        .args(["--config", config_path.to_str().unwrap(), "ssh", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("strict_host_key_checking"));
}

#[test]
fn malformed_ssh_target_is_an_argument_error() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = empty_config(&dir);

    gsh()
        .args(["--config", config_path.to_str().unwrap(), "ssh", "@web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[USER@]INSTANCE"));
}

#[test]
fn scp_needs_a_remote_side() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = empty_config(&dir);

    gsh()
        .args(["--config", config_path.to_str().unwrap(), "scp", "a.txt", "b.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("either the sources"));
}

#[test]
fn scp_rejects_two_instances() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = empty_config(&dir);

    gsh()
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "scp",
            "web:/a",
            "db:/b",
            ".",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("all remote sources"));
}

#[test]
fn missing_project_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = empty_config(&dir);

    gsh()
        .args(["--config", config_path.to_str().unwrap(), "ssh", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no project set"));
}

#[test]
fn missing_zone_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, "[core]\nproject = \"myproj\"\n");

    gsh()
        .args(["--config", config_path.to_str().unwrap(), "add-key", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no zone set"));
}

#[test]
fn bad_restart_policy_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = empty_config(&dir);

    gsh()
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "create-with-container",
            "web",
            "--container-image",
            "busybox",
            "--container-restart-policy",
            "sometimes",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--container-restart-policy"));
}

#[test]
fn create_with_container_requires_image() {
    gsh()
        .args(["create-with-container", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--container-image"));
}
