//! Accept-and-drop loop for the lock socket.
//!
//! Clients connect to the lock socket only to learn whether the service is up.
//! The reaper accepts every connection and closes it straight away so probes
//! never sit in the backlog, and it never reads or writes a byte.
use std::{
    fmt, io,
    os::{
        fd::AsFd,
        unix::net::{UnixListener, UnixStream},
    },
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
};
use tracing::{debug, trace, warn};

/// Background thread that drains connections from a listening socket.
pub struct ConnectionReaper {
    wake: Option<UnixStream>,
    handle: Option<JoinHandle<()>>,
    probes: Arc<AtomicU64>,
}

impl ConnectionReaper {
    /// Starts reaping connections on `listener`.
    ///
    /// The listener is switched to non-blocking mode; pass a duplicate
    /// (`try_clone`) if the caller keeps its own handle.
    pub fn start(listener: UnixListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let (wake_tx, wake_rx) = UnixStream::pair()?;
        let probes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&probes);

        let handle = thread::Builder::new()
            .name("sockexec-reaper".into())
            .spawn(move || reap(listener, wake_rx, counter))?;

        Ok(Self {
            wake: Some(wake_tx),
            handle: Some(handle),
            probes,
        })
    }

    /// Number of connections accepted and dropped so far.
    pub fn probes_served(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Whether the reaper thread is still looping.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wakes the reaper and waits for its thread to exit. Safe to call twice.
    pub fn stop(&mut self) {
        // Hanging up the wake channel is what unblocks the poll.
        drop(self.wake.take());

        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Connection reaper thread panicked");
        }
    }
}

impl fmt::Debug for ConnectionReaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionReaper")
            .field("running", &self.is_running())
            .field("probes_served", &self.probes_served())
            .finish()
    }
}

impl Drop for ConnectionReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reap(listener: UnixListener, wake: UnixStream, probes: Arc<AtomicU64>) {
    debug!("Connection reaper started");

    loop {
        let mut fds = [
            PollFd::new(listener.as_fd(), PollFlags::POLLIN),
            PollFd::new(wake.as_fd(), PollFlags::POLLIN),
        ];

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(err) => {
                debug!("Waiting on lock socket failed, stopping reaper: {err}");
                break;
            }
        }

        let woken = fds[1].revents().is_some_and(|events| !events.is_empty());
        let events = fds[0].revents().unwrap_or_else(PollFlags::empty);

        if woken {
            break;
        }

        if events.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            debug!("Lock socket reported {events:?}, stopping reaper");
            break;
        }

        if !events.contains(PollFlags::POLLIN) {
            continue;
        }

        match listener.accept() {
            Ok((stream, _)) => {
                drop(stream);
                let served = probes.fetch_add(1, Ordering::SeqCst) + 1;
                trace!("Dropped probe connection #{served}");
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                ) => {}
            Err(err) => {
                warn!("Accept on lock socket failed, stopping reaper: {err}");
                break;
            }
        }
    }

    debug!(
        "Connection reaper stopped after {} probe(s)",
        probes.load(Ordering::SeqCst)
    );
}
