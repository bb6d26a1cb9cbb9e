#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    io::Read,
    os::unix::{
        net::{UnixListener, UnixStream},
        process::ExitStatusExt,
    },
    time::Duration,
};

use common::{LockDir, open_gate, wait_for_exit, wait_for_gate, wait_for_path};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use predicates::str::contains;
use sockexec::lock::{LockSocket, probe};

#[test]
fn child_exit_code_is_propagated() {
    let dir = LockDir::new();

    dir.command()
        .args(["sh", "-c", "exit 7"])
        .assert()
        .code(7);

    assert!(dir.socket_dir().is_dir());
    assert!(!dir.socket_path().exists(), "socket must be removed on exit");
}

#[test]
fn child_sees_the_lock_while_running() {
    let dir = LockDir::new();
    let script = format!("test -S '{}'", dir.socket_path().display());

    dir.command()
        .args(["sh", "-c", &script])
        .assert()
        .success();

    assert!(!dir.socket_path().exists());
}

#[test]
fn missing_program_is_spawn_failure() {
    let dir = LockDir::new();

    dir.command()
        .arg("sockexec-test-no-such-program")
        .assert()
        .code(127)
        .stderr(contains("Cannot run"));

    assert!(!dir.socket_path().exists(), "cleanup must run after spawn failure");
}

#[test]
fn missing_service_name_creates_nothing() {
    let dir = LockDir::new();

    dir.command()
        .env_remove("RC_SVCNAME")
        .arg("true")
        .assert()
        .code(125)
        .stderr(contains("RC_SVCNAME"));

    assert!(!dir.socket_dir().exists());
}

#[test]
fn unusable_socket_dir_is_reported() {
    let dir = LockDir::new();
    fs::write(dir.socket_dir(), b"in the way").unwrap();

    dir.command()
        .arg("true")
        .assert()
        .code(125)
        .stderr(contains("Cannot create directory"));
}

#[test]
fn lock_excludes_second_instance_and_answers_probes() {
    let dir = LockDir::new();
    let gate = dir.root().join("gate");
    let socket = dir.socket_path();

    let mut first = dir.spawn(wait_for_gate(&gate));
    wait_for_path(&socket);

    let mut client = UnixStream::connect(&socket).expect("probe while running");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).expect("reaper closes probe"), 0);

    dir.command()
        .arg("true")
        .assert()
        .code(125)
        .stderr(contains("already running"));

    dir.command()
        .arg("--allow-running")
        .args(["sh", "-c", "exit 3"])
        .assert()
        .success();

    assert!(socket.exists(), "duplicate starts must not remove the live socket");

    open_gate(&gate);
    let status = wait_for_exit(&mut first);
    assert_eq!(status.code(), Some(0));
    assert!(!socket.exists());
    assert!(!probe(&socket));
}

#[test]
fn sigterm_stops_child_and_removes_socket() {
    let dir = LockDir::new();
    let socket = dir.socket_path();

    let mut supervisor = dir.spawn(["sleep", "30"]);
    wait_for_path(&socket);

    signal::kill(Pid::from_raw(supervisor.id() as i32), Signal::SIGTERM)
        .expect("failed to signal sockexec");

    let status = wait_for_exit(&mut supervisor);
    assert_eq!(status.signal(), None, "sockexec must exit, not die");
    assert_eq!(status.code(), Some(128 + libc::SIGTERM));
    assert!(!socket.exists());
}

#[test]
fn stale_socket_is_reclaimed() {
    let dir = LockDir::new();
    fs::create_dir_all(dir.socket_dir()).unwrap();
    drop(UnixListener::bind(dir.socket_path()).expect("failed to create stale socket"));
    assert!(dir.socket_path().exists());

    dir.command().arg("true").assert().success();

    assert!(!dir.socket_path().exists());
}

#[test]
fn library_holder_blocks_the_binary() {
    let dir = LockDir::new();
    fs::create_dir_all(dir.socket_dir()).unwrap();

    let mut lock = LockSocket::acquire(dir.socket_path()).expect("acquire");
    lock.serve_probes().expect("reaper");

    dir.command()
        .arg("true")
        .assert()
        .code(125)
        .stderr(contains("already running"));

    lock.release();
    dir.command().arg("true").assert().success();
}
