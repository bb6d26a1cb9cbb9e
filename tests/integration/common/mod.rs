#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Child, Command as StdCommand, ExitStatus},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use tempfile::TempDir;

pub const SERVICE: &str = "demo";

/// Temporary socket directory plus helpers to run the binary against it.
pub struct LockDir {
    temp: TempDir,
}

impl LockDir {
    pub fn new() -> Self {
        Self {
            temp: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.temp.path().join("execsockets")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir().join(format!("{SERVICE}.sock"))
    }

    /// `sockexec --keep-privileges --socket-dir <dir>` with `RC_SVCNAME` set.
    ///
    /// Privileges are kept so runs as root can still use the caller's tempdir.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_sockexec"));
        cmd.env("RC_SVCNAME", SERVICE)
            .env_remove("RUST_LOG")
            .arg("--keep-privileges")
            .arg("--socket-dir")
            .arg(self.socket_dir());
        cmd
    }

    /// Same as [`LockDir::command`] but spawned in the background.
    pub fn spawn<I, S>(&self, program: I) -> Child
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        StdCommand::new(env!("CARGO_BIN_EXE_sockexec"))
            .env("RC_SVCNAME", SERVICE)
            .env_remove("RUST_LOG")
            .arg("--keep-privileges")
            .arg("--socket-dir")
            .arg(self.socket_dir())
            .args(program)
            .spawn()
            .expect("failed to spawn sockexec")
    }
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_exit(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().expect("failed to poll sockexec") {
            return status;
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("Timed out waiting for sockexec to exit");
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// Shell snippet that blocks until `gate` exists.
pub fn wait_for_gate(gate: &Path) -> Vec<String> {
    vec![
        "sh".into(),
        "-c".into(),
        "while [ ! -e \"$1\" ]; do sleep 0.05; done".into(),
        "sh".into(),
        gate.display().to_string(),
    ]
}

pub fn open_gate(gate: &Path) {
    fs::write(gate, b"").expect("failed to open gate");
}
