//! System runner and terminator tests against real child processes
#![cfg(unix)]

use pitunnel_core::{
    Invocation, ProcessTerminator, SignalTerminator, SystemToolRunner, ToolRunner, TunnelError,
};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Write a throwaway tool script; it is run through `/bin/sh`
fn script(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("fake-pitunnel.sh");
    fs::write(&path, format!("{}\n", body)).unwrap();
    path
}

fn sh(script: &PathBuf, args: &[&str]) -> Vec<String> {
    let mut argv = vec!["/bin/sh".to_string(), script.display().to_string()];
    argv.extend(args.iter().map(|arg| arg.to_string()));
    argv
}

#[tokio::test]
async fn test_run_captures_stdout_and_args() {
    let dir = TempDir::new().unwrap();
    let tool = script(&dir, "echo \"$@\"");

    let output = SystemToolRunner::new()
        .run(&Invocation::new(
            sh(&tool, &["--port=8080", "--http"]),
            Duration::from_secs(5),
        ))
        .await
        .unwrap();

    assert!(output.success());
    assert_eq!(output.stdout, "--port=8080 --http\n");
    assert_eq!(output.stderr, "");
}

#[tokio::test]
async fn test_run_reports_exit_code_and_stderr() {
    let dir = TempDir::new().unwrap();
    let tool = script(&dir, "echo 'Error: not authenticated' >&2\nexit 3");

    let output = SystemToolRunner::new()
        .run(&Invocation::new(sh(&tool, &[]), Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(output.status, Some(3));
    assert!(!output.success());
    assert_eq!(output.diagnostic(), "Error: not authenticated\n");
}

#[tokio::test]
async fn test_run_times_out_and_leaves_process() {
    let dir = TempDir::new().unwrap();
    let tool = script(&dir, "sleep 5");

    let started = Instant::now();
    let err = SystemToolRunner::new()
        .run(&Invocation::new(
            sh(&tool, &["--port=80"]),
            Duration::from_millis(200),
        ))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    match err {
        TunnelError::InvocationTimedOut { command, timeout } => {
            assert!(command.ends_with("--port=80"));
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_run_with_log_file_reads_new_output_only() {
    let dir = TempDir::new().unwrap();
    let tool = script(&dir, "echo \"starting $1\"\necho 'Error: port in use' >&2\nexit 1");
    let log = dir.path().join("logs").join("pitunnel-80.log");
    let runner = SystemToolRunner::new();

    let first = runner
        .run(
            &Invocation::new(sh(&tool, &["first"]), Duration::from_secs(5))
                .with_log_file(log.clone()),
        )
        .await
        .unwrap();
    assert_eq!(first.status, Some(1));
    assert_eq!(first.stdout, "");
    assert_eq!(first.stderr, "starting first\nError: port in use\n");

    let second = runner
        .run(
            &Invocation::new(sh(&tool, &["second"]), Duration::from_secs(5))
                .with_log_file(log.clone()),
        )
        .await
        .unwrap();
    assert_eq!(second.stderr, "starting second\nError: port in use\n");

    let contents = fs::read_to_string(&log).unwrap();
    assert!(contents.contains("starting first"));
    assert!(contents.contains("starting second"));
}

#[test]
fn test_signal_terminator_stops_process() {
    let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();

    SignalTerminator::new().terminate(child.id()).unwrap();
    let status = child.wait().unwrap();
    assert_eq!(status.signal(), Some(15));

    let err = SignalTerminator::new().terminate(child.id()).unwrap_err();
    assert_eq!(err, TunnelError::StaleReference { pid: child.id() });
}

#[test]
fn test_signal_terminator_reports_permission_denied() {
    // A file we create is owned by our effective uid
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("owner");
    fs::write(&marker, "").unwrap();
    let uid = fs::metadata(&marker).unwrap().uid();

    // Skip when we are allowed to signal pid 1 (root, or our own container init)
    let init_owner = fs::metadata("/proc/1").map(|meta| meta.uid()).ok();
    if uid == 0 || init_owner == Some(uid) {
        return;
    }

    let err = SignalTerminator::new().terminate(1).unwrap_err();
    assert_eq!(err, TunnelError::PermissionDenied { pid: 1 });
}
