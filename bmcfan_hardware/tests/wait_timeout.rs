#![cfg(unix)]

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use bmcfan_hardware::command::wait_with_timeout;
use bmcfan_hardware::error::HwError;

fn spawn(script: &str) -> std::process::Child {
    Command::new("sh")
        .arg("-c")
        .arg(script)
        .stdout(Stdio::null())
        .spawn()
        .expect("spawn sh")
}

#[test]
fn wait_returns_exit_status() {
    let mut child = spawn("exit 0");
    let status = wait_with_timeout(
        &mut child,
        Duration::from_secs(5),
        Duration::from_millis(1),
    )
    .expect("child exits");
    assert!(status.success());
}

#[test]
fn wait_kills_on_timeout() {
    let mut child = spawn("exec sleep 10");
    let started = Instant::now();
    let err = wait_with_timeout(
        &mut child,
        Duration::from_millis(50),
        Duration::from_millis(5),
    )
    .expect_err("expected timeout error");

    match err {
        HwError::Timeout { timeout_ms, .. } => assert_eq!(timeout_ms, 50),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    // Already reaped by the timeout path.
    assert!(child.try_wait().map(|s| s.is_some()).unwrap_or(true));
}
