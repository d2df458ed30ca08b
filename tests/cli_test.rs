//! Integration tests for the nagome binary.
//!
//! These run the real executable with the test holding its stdin, the way
//! a front end hosting nagome as its main plugin does.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn spawn_hub(save: &TempDir) -> Child {
    Command::new(env!("CARGO_BIN_EXE_nagome"))
        .arg("--save-path")
        .arg(save.path())
        .arg("--no-tcp")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start nagome")
}

/// Wait for the process to exit, giving up after `timeout`.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    return None;
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }
}

#[test]
fn test_version_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_nagome"))
        .arg("--version")
        .output()
        .expect("Failed to run --version");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_stdin_eof_stops_hub_and_saves_settings() {
    let save = tempfile::tempdir().unwrap();
    let mut child = spawn_hub(&save);
    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut first = String::new();
    stdout.read_line(&mut first).unwrap();
    assert!(first.contains("Plug.Enabled"), "{first}");

    drop(child.stdin.take());

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.is_some(), "nagome kept running after stdin closed");
    assert!(save.path().join("settings.yml").exists());
}

#[cfg(unix)]
#[test]
fn test_interrupt_exits_while_stdin_stays_open() {
    let save = tempfile::tempdir().unwrap();
    let mut child = spawn_hub(&save);
    let _stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut first = String::new();
    stdout.read_line(&mut first).unwrap();
    assert!(first.contains("Plug.Enabled"), "{first}");
    // Let the Ctrl-C listener register.
    thread::sleep(Duration::from_millis(300));

    let pid = i32::try_from(child.id()).unwrap();
    unsafe {
        libc::kill(pid, libc::SIGINT);
    }

    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    if status.is_none() {
        let _ = child.kill();
    }
    let status = status.expect("nagome hung on its open stdin after Ctrl-C");
    assert!(status.success(), "{status:?}");
    assert!(save.path().join("settings.yml").exists());
}
