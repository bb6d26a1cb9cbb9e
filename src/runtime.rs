//! Service naming and lock socket paths.
use std::{
    env,
    ffi::{OsStr, OsString},
    fmt, fs, io,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::SockexecError;

/// Environment variable that names the supervised service.
pub const SERVICE_NAME_VAR: &str = "RC_SVCNAME";

/// Where lock sockets live unless overridden on the command line.
pub const DEFAULT_SOCKET_DIR: &str = "/run/openrc/execsockets";

/// Mode applied when the socket directory has to be created.
const SOCKET_DIR_MODE: u32 = 0o700;

/// Opaque, non-empty service identifier.
///
/// The name is used verbatim as a path component, byte for byte, so it need
/// not be UTF-8. Callers must keep `/` and other path-breaking characters out
/// of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceName(OsString);

impl ServiceName {
    /// Wraps `name`, rejecting the empty string.
    pub fn new(name: impl Into<OsString>) -> Result<Self, SockexecError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SockexecError::MissingServiceName {
                var: SERVICE_NAME_VAR,
            });
        }
        Ok(Self(name))
    }

    /// Reads the service name from [`SERVICE_NAME_VAR`].
    pub fn from_env() -> Result<Self, SockexecError> {
        let name = env::var_os(SERVICE_NAME_VAR).ok_or(SockexecError::MissingServiceName {
            var: SERVICE_NAME_VAR,
        })?;
        Self::new(name)
    }

    pub fn as_os_str(&self) -> &OsStr {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string_lossy())
    }
}

/// Lock socket path for `name` under `socket_dir`, without touching the filesystem.
pub fn socket_path(socket_dir: &Path, name: &ServiceName) -> PathBuf {
    let mut file_name = name.0.clone();
    file_name.push(".sock");
    socket_dir.join(file_name)
}

/// Ensures `socket_dir` exists and returns the lock socket path for `name`.
pub fn resolve(socket_dir: &Path, name: &ServiceName) -> Result<PathBuf, SockexecError> {
    ensure_socket_dir(socket_dir)?;
    let path = socket_path(socket_dir, name);
    debug!("Resolved lock socket for '{name}' to {}", path.display());
    Ok(path)
}

fn ensure_socket_dir(dir: &Path) -> Result<(), SockexecError> {
    let unavailable = |source: io::Error| SockexecError::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source,
    };

    match fs::DirBuilder::new()
        .recursive(true)
        .mode(SOCKET_DIR_MODE)
        .create(dir)
    {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(err) => return Err(unavailable(err)),
    }

    // A plain file in the way also surfaces as AlreadyExists.
    if !dir.is_dir() {
        return Err(unavailable(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a directory",
        )));
    }

    Ok(())
}
