//! Runs the supervised program and maps its termination to an exit status.
use std::{
    ffi::OsString,
    fmt, io,
    os::unix::process::ExitStatusExt,
    process::{Command, ExitStatus},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::{debug, info, warn};

use crate::error::SockexecError;

/// How the child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Normal exit with the given code.
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
}

impl ChildExit {
    /// Exit status the supervisor reports: the child's code, or `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChildExit::Exited(code) => *code,
            ChildExit::Signaled(signal) => 128 + signal,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Exited(0))
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ChildExit::Exited(code);
        }
        match status.signal() {
            Some(signal) => ChildExit::Signaled(signal),
            // wait() only reports terminated children, so this is not expected.
            None => ChildExit::Exited(libc::EXIT_FAILURE),
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildExit::Exited(code) => write!(f, "exit code {code}"),
            ChildExit::Signaled(signal) => match Signal::try_from(*signal) {
                Ok(name) => write!(f, "signal {signal} ({name})"),
                Err(_) => write!(f, "signal {signal}"),
            },
        }
    }
}

/// Termination requests shared between the signal handler and the main thread.
///
/// The handler calls [`ShutdownSignal::request`]; a running child gets
/// SIGTERM, and a child that has not been spawned yet never will be.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
    /// PID of the unreaped child. Signals are sent with the lock held, so a
    /// PID is never signalled after it has been cleared and reaped.
    child: Mutex<Option<i32>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a termination request and forwards it to the child, if any.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.forward_to_child();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn register_child(&self, pid: u32) {
        *self.child_slot() = Some(pid as i32);
        // Catches a request that landed between the spawn and the store above.
        if self.is_requested() {
            self.forward_to_child();
        }
    }

    fn clear_child(&self) {
        *self.child_slot() = None;
    }

    fn child_slot(&self) -> MutexGuard<'_, Option<i32>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forward_to_child(&self) {
        let slot = self.child_slot();
        let Some(pid) = *slot else {
            return;
        };

        match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => debug!("Forwarded SIGTERM to child {pid}"),
            Err(Errno::ESRCH) => {}
            Err(err) => warn!("Failed to signal child {pid}: {err}"),
        }
    }
}

/// Spawns `argv[0]` with the remaining arguments and waits for it to exit.
///
/// The program is looked up in `PATH` and inherits stdio and environment.
pub fn run_child(
    argv: &[OsString],
    shutdown: &ShutdownSignal,
) -> Result<ChildExit, SockexecError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(SockexecError::SpawnFailure {
            program: OsString::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "no program given"),
        });
    };

    if shutdown.is_requested() {
        return Err(SockexecError::Interrupted);
    }

    debug!("Spawning {program:?} with {} argument(s)", args.len());
    let mut child = Command::new(program).args(args).spawn().map_err(|source| {
        SockexecError::SpawnFailure {
            program: program.clone(),
            source,
        }
    })?;

    let pid = child.id();
    shutdown.register_child(pid);
    info!("Started {program:?} with PID {pid}");

    // The PID stays valid until the reap below, so it is withdrawn from the
    // signal path while the child is still a zombie.
    if let Err(err) = wait_until_exited(pid) {
        debug!("Waiting for child {pid} without reaping failed: {err}");
    }
    shutdown.clear_child();
    let status = child.wait();
    let exit = ChildExit::from(status.map_err(SockexecError::WaitFailure)?);

    match exit {
        ChildExit::Exited(0) => info!("Child {pid} exited normally"),
        ChildExit::Exited(_) => info!("Child {pid} exited with {exit}"),
        ChildExit::Signaled(_) => warn!("Child {pid} was terminated by {exit}"),
    }

    Ok(exit)
}

/// Blocks until `pid` has terminated but leaves it unreaped.
fn wait_until_exited(pid: u32) -> io::Result<()> {
    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
