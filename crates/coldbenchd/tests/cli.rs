//! End-to-end checks of the `coldbenchd` binary against a filesystem store.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn write_manager_config(dir: &Path) -> PathBuf {
    let store = dir.join("store");
    let config = dir.join("manager.toml");
    std::fs::write(
        &config,
        format!(
            "[store]\nbackend = \"fs\"\npath = '{}'\n\n[orchestrator]\ndiscovery_timeout_secs = 5\n",
            store.display()
        ),
    )
    .unwrap();
    config
}

fn coldbenchd(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_coldbenchd"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn help_lists_subcommands() {
    let output = coldbenchd(&["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["agent", "dispatch", "run", "collect", "report", "baseline", "registry"] {
        assert!(text.contains(command), "missing {command} in help");
    }
}

#[test]
fn registry_put_then_discover() {
    let dir = TempDir::new().unwrap();
    let config = write_manager_config(dir.path());
    let descriptor = dir.path().join("echo.json");
    std::fs::write(
        &descriptor,
        r#"{"service_type":"echo","endpoint":"http://127.0.0.1:9","implementations":[{"name":"alpha"}]}"#,
    )
    .unwrap();
    let config = config.to_str().unwrap();

    let put = coldbenchd(&["registry", "--config", config, "put", descriptor.to_str().unwrap()]);
    assert!(put.status.success(), "{}", String::from_utf8_lossy(&put.stderr));
    assert_eq!(stdout(&put).trim(), "registry/agents/echo.manifest");

    let discover = coldbenchd(&["discover", "--config", config]);
    assert!(discover.status.success());
    let catalog: serde_json::Value = serde_json::from_str(&stdout(&discover)).unwrap();
    assert_eq!(catalog[0]["service_type"], "echo");
    assert_eq!(catalog[0]["implementations"][0]["name"], "alpha");

    let remove = coldbenchd(&["registry", "--config", config, "remove", "echo"]);
    assert!(remove.status.success());
    let discover = coldbenchd(&["discover", "--config", config]);
    let catalog: serde_json::Value = serde_json::from_str(&stdout(&discover)).unwrap();
    assert_eq!(catalog, serde_json::json!([]));
}

#[test]
fn invalid_descriptor_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = write_manager_config(dir.path());
    let descriptor = dir.path().join("bad.json");
    std::fs::write(&descriptor, r#"{"service_type":"Not A Slug","endpoint":"ftp://x"}"#).unwrap();

    let put = coldbenchd(&[
        "registry",
        "--config",
        config.to_str().unwrap(),
        "put",
        descriptor.to_str().unwrap(),
    ]);
    assert!(!put.status.success());
}

#[test]
fn report_of_unknown_run_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_manager_config(dir.path());
    let config = config.to_str().unwrap();

    assert!(!coldbenchd(&["report", "--config", config, "nosuchrun"]).status.success());
    assert!(!coldbenchd(&["report", "--config", config, "--latest"]).status.success());
    assert!(!coldbenchd(&["baseline", "--config", config, "show"]).status.success());
}

#[test]
fn dispatch_once_with_no_triggers() {
    let dir = TempDir::new().unwrap();
    let config = write_manager_config(dir.path());

    let output = coldbenchd(&["dispatch", "--config", config.to_str().unwrap(), "--once"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout(&output).trim(), "0");
}

#[test]
fn missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(!coldbenchd(&["discover", "--config", missing.to_str().unwrap()]).status.success());
}
