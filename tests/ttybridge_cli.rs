use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn ttybridge_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_ttybridge").expect("ttybridge test binary not built")
}

fn temp_session_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ttybridge_cli_{tag}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

/// Spawn the bridge in pipes mode with a held-open stdin pipe so the bridge
/// only terminates through child-output hang-up.
fn spawn_bridge(dir: &PathBuf, command: &[&str]) -> Child {
    let mut cmd = Command::new(ttybridge_bin());
    cmd.arg("--attach")
        .arg("pipes")
        .arg(dir)
        .args(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.spawn().expect("spawn ttybridge")
}

fn wait_for_fifo(dir: &PathBuf) -> PathBuf {
    let path = dir.join("in");
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        assert!(Instant::now() < deadline, "FIFO never appeared at {path:?}");
        thread::sleep(Duration::from_millis(10));
    }
    path
}

#[test]
fn missing_arguments_print_usage_and_fail() {
    let output = Command::new(ttybridge_bin())
        .output()
        .expect("run ttybridge without arguments");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.to_lowercase().contains("usage"), "stderr: {stderr}");
}

#[test]
fn session_dir_argument_alone_is_not_enough() {
    let output = Command::new(ttybridge_bin())
        .arg("/tmp/ttybridge_nonexistent")
        .output()
        .expect("run ttybridge with only a directory");
    assert!(!output.status.success());
}

#[test]
fn pipes_mode_mirrors_stdout_and_stderr_into_capture_files() {
    let dir = temp_session_dir("capture");
    let mut child = spawn_bridge(&dir, &["sh", "-c", "echo out_line; echo err_line >&2"]);

    // Keep the bridge's stdin open until it has exited on its own.
    let _stdin = child.stdin.take();
    let output = child.wait_with_output().expect("wait for bridge");

    assert!(output.status.success(), "bridge exited with {output:?}");
    assert_eq!(fs::read(dir.join("out")).expect("out file"), b"out_line\n");
    assert_eq!(fs::read(dir.join("err")).expect("err file"), b"err_line\n");
    // The same bytes were forwarded to the real streams.
    assert_eq!(output.stdout, b"out_line\n");
    assert_eq!(output.stderr, b"err_line\n");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn real_stdin_bytes_reach_the_child() {
    let dir = temp_session_dir("stdin");
    let mut child = spawn_bridge(&dir, &["sh", "-c", "read line; echo \"typed $line\""]);

    let mut stdin = child.stdin.take().expect("bridge stdin");
    stdin.write_all(b"hello\n").expect("write to bridge stdin");
    // Hold stdin open; the bridge exits when the wrapped shell does.
    let output = child.wait_with_output().expect("wait for bridge");
    drop(stdin);

    assert!(output.status.success(), "bridge exited with {output:?}");
    assert_eq!(
        fs::read(dir.join("out")).expect("out file"),
        b"typed hello\n"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn injected_bytes_reach_the_child_like_typed_input() {
    let dir = temp_session_dir("inject");
    let mut child = spawn_bridge(&dir, &["sh", "-c", "read line; echo \"got $line\""]);
    let _stdin = child.stdin.take();

    let fifo = wait_for_fifo(&dir);
    // Opening the write side blocks until the bridge's reader is attached.
    let mut writer = fs::OpenOptions::new()
        .write(true)
        .open(&fifo)
        .expect("open injection FIFO");
    writer.write_all(b"hello\n").expect("write injection");
    drop(writer);

    let output = child.wait_with_output().expect("wait for bridge");
    assert!(output.status.success(), "bridge exited with {output:?}");
    assert_eq!(fs::read(dir.join("out")).expect("out file"), b"got hello\n");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn a_second_writer_can_attach_after_the_first_disconnects() {
    let dir = temp_session_dir("reattach");
    let mut child = spawn_bridge(&dir, &["sh", "-c", "read a; read b; echo \"$a$b\""]);
    let _stdin = child.stdin.take();

    let fifo = wait_for_fifo(&dir);
    let mut first = fs::OpenOptions::new()
        .write(true)
        .open(&fifo)
        .expect("first writer open");
    first.write_all(b"x\n").expect("first writer write");
    drop(first);

    let mut second = fs::OpenOptions::new()
        .write(true)
        .open(&fifo)
        .expect("second writer open");
    second.write_all(b"y\n").expect("second writer write");
    drop(second);

    let output = child.wait_with_output().expect("wait for bridge");
    assert!(output.status.success(), "bridge exited with {output:?}");
    assert_eq!(fs::read(dir.join("out")).expect("out file"), b"xy\n");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn capture_files_are_truncated_between_runs() {
    let dir = temp_session_dir("truncate");

    let mut child = spawn_bridge(&dir, &["sh", "-c", "echo first_run"]);
    let _stdin = child.stdin.take();
    assert!(child.wait_with_output().expect("first run").status.success());
    assert_eq!(fs::read(dir.join("out")).expect("out file"), b"first_run\n");

    let mut child = spawn_bridge(&dir, &["true"]);
    let _stdin = child.stdin.take();
    assert!(child
        .wait_with_output()
        .expect("second run")
        .status
        .success());
    assert_eq!(fs::read(dir.join("out")).expect("out file"), b"");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn pty_mode_without_a_tty_is_a_startup_error() {
    let dir = temp_session_dir("notty");
    let output = Command::new(ttybridge_bin())
        .arg(&dir)
        .arg("true")
        .stdin(Stdio::null())
        .output()
        .expect("run ttybridge in pty mode without a tty");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("not a terminal"),
        "stderr should explain the tty requirement: {stderr}"
    );

    let _ = fs::remove_dir_all(&dir);
}
