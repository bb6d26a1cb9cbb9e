//! Error handling for sockexec.
use std::{ffi::OsString, io, path::PathBuf};

use thiserror::Error;

/// Exit status used for supervisor setup failures.
pub const EXIT_SETUP_FAILURE: i32 = 125;

/// Exit status when the child program exists but cannot be executed.
pub const EXIT_CANNOT_EXECUTE: i32 = 126;

/// Exit status when the child program cannot be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Exit status when a termination signal arrives before the child starts.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Defines all fatal errors the supervisor can hit before or while running the child.
#[derive(Debug, Error)]
pub enum SockexecError {
    /// The environment variable naming the service is unset or empty.
    #[error("Environment variable \"{var}\" is not set")]
    MissingServiceName {
        /// Name of the variable that was expected.
        var: &'static str,
    },

    /// The socket directory could not be created.
    #[error("Cannot create directory \"{}\": {source}", .path.display())]
    DirectoryUnavailable {
        /// Directory that was being prepared.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Another live instance already listens on the lock socket.
    #[error("Service is already running: \"{}\" is held by another process", .path.display())]
    AlreadyRunning {
        /// Path of the contended lock socket.
        path: PathBuf,
    },

    /// Creating, binding or listening on the lock socket failed.
    #[error("Cannot set up socket \"{}\": {source}", .path.display())]
    SocketUnavailable {
        /// Path of the lock socket.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Switching to the unprivileged identity failed.
    #[error("Cannot drop privileges to uid {uid}/gid {gid}: {source}")]
    PrivilegeDrop {
        /// Target user id.
        uid: u32,
        /// Target group id.
        gid: u32,
        /// The underlying error that occurred.
        #[source]
        source: nix::errno::Errno,
    },

    /// The child program could not be started.
    #[error("Cannot run {program:?}: {source}")]
    SpawnFailure {
        /// Program that was requested.
        program: OsString,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Waiting for the child to terminate failed.
    #[error("Failed to wait for child process: {0}")]
    WaitFailure(#[source] io::Error),

    /// A termination signal arrived before the child was started.
    #[error("Interrupted before the child process was started")]
    Interrupted,
}

impl SockexecError {
    /// Process exit status that reports this error to the caller.
    pub fn exit_code(&self) -> i32 {
        match self {
            SockexecError::SpawnFailure { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => EXIT_NOT_FOUND,
                _ => EXIT_CANNOT_EXECUTE,
            },
            SockexecError::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_SETUP_FAILURE,
        }
    }
}
