//! Sockexec runs a program while holding a named unix-domain socket open. The
//! socket exists, and accepts connections, exactly as long as the program is
//! running, so its presence at `<socket-dir>/<service>.sock` doubles as a
//! single-instance lock and a liveness probe for init scripts.

/// CLI interface.
pub mod cli;

/// Error handling.
pub mod error;

/// Lock socket lifecycle.
pub mod lock;

/// Privilege drop helpers.
pub mod privilege;

/// Background acceptor that services liveness probes.
pub mod reaper;

/// Service name and socket path resolution.
pub mod runtime;

/// Child process supervision and signal forwarding.
pub mod supervisor;

#[cfg(test)]
mod test_utils;
