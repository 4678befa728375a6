//! Device-mode behavior, with `sh` standing in for the device shell.
#![cfg(unix)]

mod common;

use common::{Harness, sh_device_config};
use remcon_agent::device::DeviceShellConfig;
use remcon_common::Mode;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Write an executable `sh` script standing in for the device binary.
fn device_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-device");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn script_config(program: PathBuf) -> DeviceShellConfig {
    let mut config = DeviceShellConfig::new(program);
    config.args = Vec::new();
    config.teardown_grace = Duration::from_millis(500);
    config
}

/// Start the shell and give it time to close its stdin.
async fn start_and_settle(harness: &Harness) {
    harness.router.dispatch("mode device").await.unwrap();
    assert!(harness.device.as_ref().unwrap().ensure_started().await);
    tokio::time::sleep(Duration::from_millis(300)).await;
}

async fn wait_until_dead(harness: &Harness) {
    let device = harness.device.as_ref().expect("device configured");
    tokio::time::timeout(Duration::from_secs(5), async {
        while device.is_alive().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("device shell did not exit");
}

#[tokio::test]
async fn test_echo_in_device_mode_streams_one_line() {
    let root = tempfile::tempdir().unwrap();
    let mut harness = Harness::with_device(root.path(), sh_device_config());

    let reply = harness.router.dispatch("mode device").await;
    assert_eq!(reply.as_deref(), Some("Switched to device mode\ndevice$ "));

    assert_eq!(harness.router.dispatch("echo hi").await, None);
    assert_eq!(harness.next_output().await, "hi");
    harness.assert_quiet(Duration::from_millis(300)).await;

    harness.device.as_ref().unwrap().teardown().await;
}

#[tokio::test]
async fn test_first_command_spawns_once_and_live_shell_is_reused() {
    let root = tempfile::tempdir().unwrap();
    let mut harness = Harness::with_device(root.path(), sh_device_config());
    let device = harness.device.clone().unwrap();

    harness.router.dispatch("mode adb").await.unwrap();
    assert_eq!(device.spawn_count(), 0);

    harness.router.dispatch("echo one").await;
    assert_eq!(device.spawn_count(), 1);
    assert_eq!(harness.next_output().await, "one");

    harness.router.dispatch("echo two").await;
    harness.router.dispatch("echo three").await;
    assert_eq!(harness.next_output().await, "two");
    assert_eq!(harness.next_output().await, "three");
    assert_eq!(device.spawn_count(), 1);

    device.teardown().await;
}

#[tokio::test]
async fn test_dead_shell_is_replaced_on_next_command() {
    let root = tempfile::tempdir().unwrap();
    let mut harness = Harness::with_device(root.path(), sh_device_config());
    let device = harness.device.clone().unwrap();

    harness.router.dispatch("mode device").await.unwrap();
    harness.router.dispatch("echo before").await;
    assert_eq!(harness.next_output().await, "before");

    assert_eq!(harness.router.dispatch("exit").await, None);
    wait_until_dead(&harness).await;

    assert_eq!(harness.router.dispatch("echo after").await, None);
    assert_eq!(harness.next_output().await, "after");
    assert_eq!(device.spawn_count(), 2);

    device.teardown().await;
}

#[tokio::test]
async fn test_stderr_is_streamed_too() {
    let root = tempfile::tempdir().unwrap();
    let mut harness = Harness::with_device(root.path(), sh_device_config());

    harness.router.dispatch("mode device").await.unwrap();
    harness.router.dispatch("echo oops >&2").await;

    assert_eq!(harness.next_output().await, "oops");
    harness.device.as_ref().unwrap().teardown().await;
}

#[tokio::test]
async fn test_pwd_is_forwarded_in_device_mode() {
    let root = tempfile::tempdir().unwrap();
    let mut harness = Harness::with_device(root.path(), sh_device_config());

    harness.router.dispatch("mode device").await.unwrap();
    assert_eq!(harness.router.dispatch("pwd").await, None);

    let line = harness.next_output().await;
    assert!(line.starts_with('/'), "{line:?}");
    harness.device.as_ref().unwrap().teardown().await;
}

#[tokio::test]
async fn test_start_failure_replies_with_prompt() {
    let root = tempfile::tempdir().unwrap();
    let mut config = sh_device_config();
    config.program = "/nonexistent/remcon-device-shell".into();
    let harness = Harness::with_device(root.path(), config);

    harness.router.dispatch("mode device").await.unwrap();
    let reply = harness.router.dispatch("echo hi").await;

    assert_eq!(
        reply.as_deref(),
        Some("Failed to start device shell\ndevice$ ")
    );
    assert_eq!(harness.state.mode(), Mode::Device);
}

#[tokio::test]
async fn test_switching_back_to_local_keeps_device_alive() {
    let root = tempfile::tempdir().unwrap();
    let mut harness = Harness::with_device(root.path(), sh_device_config());
    let device = harness.device.clone().unwrap();

    harness.router.dispatch("mode device").await.unwrap();
    harness.router.dispatch("echo up").await;
    assert_eq!(harness.next_output().await, "up");

    let reply = harness.router.dispatch("echo local").await;
    assert_eq!(reply, None);
    assert_eq!(harness.next_output().await, "local");

    harness.router.dispatch("mode local").await.unwrap();
    let reply = harness.router.dispatch("echo here").await.unwrap();
    assert!(reply.starts_with("here\nlocal:"));
    assert!(device.is_alive().await);

    harness.router.dispatch("mode device").await.unwrap();
    harness.router.dispatch("echo again").await;
    assert_eq!(harness.next_output().await, "again");
    assert_eq!(device.spawn_count(), 1);

    device.teardown().await;
}

#[tokio::test]
async fn test_teardown_finishes_when_shell_ignores_sigterm() {
    let root = tempfile::tempdir().unwrap();
    let mut harness = Harness::with_device(root.path(), sh_device_config());
    let device = harness.device.clone().unwrap();

    harness.router.dispatch("mode device").await.unwrap();
    harness.router.dispatch("trap '' TERM; echo trapped").await;
    assert_eq!(harness.next_output().await, "trapped");

    tokio::time::timeout(Duration::from_secs(5), device.teardown())
        .await
        .expect("teardown must finish after the grace period");
    assert!(!device.is_alive().await);
}

#[tokio::test]
async fn test_help_lists_device_entries_when_available() {
    let root = tempfile::tempdir().unwrap();
    let harness = Harness::with_device(root.path(), sh_device_config());

    let reply = harness.router.dispatch("help").await.unwrap();

    assert!(reply.contains("- mode device (or mode adb)"));
    assert!(reply.contains("Any device shell command"));
    assert!(harness.router.welcome_banner().contains("'mode device'"));
}

#[tokio::test]
async fn test_failed_write_restarts_shell_and_resends() {
    let root = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    // First run stops reading stdin but stays alive; later runs are a normal shell.
    let script = device_script(
        bin.path(),
        "marker=\"$(dirname \"$0\")/first-run\"\n\
         if [ ! -e \"$marker\" ]; then\n  : > \"$marker\"\n  exec 0<&-\n  exec sleep 30\nfi\n\
         exec sh",
    );
    let mut harness = Harness::with_device(root.path(), script_config(script));
    let device = harness.device.clone().unwrap();

    start_and_settle(&harness).await;
    assert_eq!(device.spawn_count(), 1);

    assert_eq!(harness.router.dispatch("echo resent").await, None);
    assert_eq!(device.spawn_count(), 2);
    assert_eq!(harness.next_output().await, "resent");

    device.teardown().await;
}

#[tokio::test]
async fn test_failed_write_without_restart_replies_with_error() {
    let root = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    // The script removes itself, so the restart cannot spawn it again.
    let script = device_script(bin.path(), "rm -f \"$0\"\nexec 0<&-\nexec sleep 30");
    let harness = Harness::with_device(root.path(), script_config(script));
    let device = harness.device.clone().unwrap();

    start_and_settle(&harness).await;

    let reply = harness.router.dispatch("echo lost").await.unwrap();
    assert!(
        reply.starts_with("Failed to send command to device shell:"),
        "{reply}"
    );
    assert!(reply.ends_with("\ndevice$ "));
    assert_eq!(device.spawn_count(), 1);
    assert!(!device.is_alive().await);
}
