//! Named lock socket: bind-or-fail, listen, and guaranteed teardown.
use std::{
    fs::{self, File},
    io,
    os::{
        fd::{AsRawFd, OwnedFd},
        unix::{
            fs::{FileTypeExt, MetadataExt},
            net::{UnixListener, UnixStream},
        },
    },
    path::{Path, PathBuf},
};

use fs2::FileExt;
use nix::{
    errno::Errno,
    sys::socket::{AddressFamily, Backlog, SockFlag, SockType, UnixAddr, bind, listen, socket},
};
use tracing::{debug, info, warn};

use crate::{error::SockexecError, reaper::ConnectionReaper};

/// Pending connections the lock socket queues; enough for a few concurrent probes.
pub const SOCKET_BACKLOG: i32 = 5;

/// A bound, listening unix socket whose existence marks the service as running.
///
/// Dropping the value releases the lock. [`LockSocket::release`] may be called
/// any number of times; only the first call has an effect.
#[derive(Debug)]
pub struct LockSocket {
    path: PathBuf,
    listener: Option<UnixListener>,
    /// Device and inode of the socket file this handle created.
    identity: Option<(u64, u64)>,
    reaper: Option<ConnectionReaper>,
}

impl LockSocket {
    /// Binds and listens on `path`.
    ///
    /// A path held by a live listener yields [`SockexecError::AlreadyRunning`].
    /// A stale socket file left by a crashed instance is removed and the bind
    /// retried.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, SockexecError> {
        let path = path.into();
        let _dir_lock = lock_directory(&path).map_err(|err| unavailable(&path, err))?;

        let listener = match bind_listener(&path) {
            Ok(Some(listener)) => listener,
            Ok(None) => reclaim(&path)?,
            Err(err) => return Err(unavailable(&path, err)),
        };

        let identity = fs::symlink_metadata(&path)
            .map(|meta| (meta.dev(), meta.ino()))
            .ok();

        info!("Acquired lock socket {}", path.display());
        Ok(Self {
            path,
            listener: Some(listener),
            identity,
            reaper: None,
        })
    }

    /// Starts the background reaper that answers liveness probes.
    pub fn serve_probes(&mut self) -> Result<(), SockexecError> {
        if self.reaper.is_some() {
            return Ok(());
        }

        let Some(listener) = &self.listener else {
            return Err(unavailable(
                &self.path,
                io::Error::new(io::ErrorKind::NotConnected, "lock socket already released"),
            ));
        };

        let reaper = listener
            .try_clone()
            .and_then(ConnectionReaper::start)
            .map_err(|err| unavailable(&self.path, err))?;
        self.reaper = Some(reaper);
        Ok(())
    }

    /// Stops the reaper, closes the socket and unlinks its path.
    pub fn release(&mut self) {
        if let Some(mut reaper) = self.reaper.take() {
            reaper.stop();
        }

        let Some(listener) = self.listener.take() else {
            return;
        };
        drop(listener);

        // Without the directory lock a reclaiming instance could bind the path
        // between our identity check and the unlink.
        let _dir_lock = lock_directory(&self.path)
            .inspect_err(|err| debug!("Unlinking {} unlocked: {err}", self.path.display()))
            .ok();

        if !self.owns_path() {
            debug!(
                "Lock socket {} was replaced or removed, leaving it alone",
                self.path.display()
            );
            return;
        }

        match fs::remove_file(&self.path) {
            Ok(()) => info!("Released lock socket {}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove lock socket {}: {err}", self.path.display()),
        }
    }

    /// Whether the socket is still open.
    pub fn is_held(&self) -> bool {
        self.listener.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connections the reaper has accepted and dropped.
    pub fn probes_served(&self) -> u64 {
        self.reaper
            .as_ref()
            .map_or(0, ConnectionReaper::probes_served)
    }

    fn owns_path(&self) -> bool {
        match (self.identity, fs::symlink_metadata(&self.path)) {
            (Some((dev, ino)), Ok(meta)) => meta.dev() == dev && meta.ino() == ino,
            (None, Ok(meta)) => meta.file_type().is_socket(),
            (_, Err(_)) => false,
        }
    }
}

impl Drop for LockSocket {
    fn drop(&mut self) {
        self.release();
    }
}

/// Liveness probe: true when something accepts connections at `path`.
pub fn probe(path: &Path) -> bool {
    UnixStream::connect(path).is_ok()
}

/// Exclusive advisory lock on the socket's directory.
///
/// Every bind, stale-file reclaim and unlink of a lock socket happens under
/// it, so a socket that is bound but not yet listening is never mistaken for
/// a stale one by a concurrent instance.
fn lock_directory(path: &Path) -> io::Result<File> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let handle = File::open(dir)?;
    handle.lock_exclusive()?;
    Ok(handle)
}

/// Creates, binds and listens. `Ok(None)` means the address is in use.
fn bind_listener(path: &Path) -> io::Result<Option<UnixListener>> {
    let addr = UnixAddr::new(path)?;
    let fd = socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)?;
    set_cloexec(&fd)?;

    match bind(fd.as_raw_fd(), &addr) {
        Ok(()) => {}
        Err(Errno::EADDRINUSE) => return Ok(None),
        Err(errno) => return Err(errno.into()),
    }

    if let Err(errno) = Backlog::new(SOCKET_BACKLOG).and_then(|backlog| listen(&fd, backlog)) {
        let _ = fs::remove_file(path);
        return Err(errno.into());
    }

    Ok(Some(UnixListener::from(fd)))
}

/// The child must not inherit the lock, or it would outlive the supervisor.
fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Handles a bind that hit an existing path: live listener or stale file.
/// Must run under [`lock_directory`].
fn reclaim(path: &Path) -> Result<UnixListener, SockexecError> {
    match UnixStream::connect(path) {
        Ok(_) => {
            return Err(SockexecError::AlreadyRunning {
                path: path.to_path_buf(),
            });
        }
        Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
            let is_socket = fs::symlink_metadata(path)
                .map(|meta| meta.file_type().is_socket())
                .unwrap_or(false);
            if !is_socket {
                return Err(unavailable(
                    path,
                    io::Error::new(io::ErrorKind::AlreadyExists, "path exists and is not a socket"),
                ));
            }

            warn!("Removing stale lock socket {}", path.display());
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(unavailable(path, err)),
            }
        }
        // The holder released between our bind and connect.
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(unavailable(path, err)),
    }

    match bind_listener(path) {
        Ok(Some(listener)) => Ok(listener),
        Ok(None) => Err(SockexecError::AlreadyRunning {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(unavailable(path, err)),
    }
}

fn unavailable(path: &Path, source: io::Error) -> SockexecError {
    SockexecError::SocketUnavailable {
        path: path.to_path_buf(),
        source,
    }
}
