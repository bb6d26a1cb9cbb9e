//! One-shot privilege drop for supervisors started as root.
use nix::{
    errno::Errno,
    unistd::{Gid, Uid, getuid, setgid, setuid},
};
use tracing::info;

use crate::error::SockexecError;

/// User id the supervisor switches to by default (`daemon` on most systems).
pub const DEFAULT_UID: u32 = 1;

/// Group id the supervisor switches to by default.
pub const DEFAULT_GID: u32 = 1;

/// Switches to `uid`/`gid` when running as root.
///
/// Supplementary groups are cleared first, then the group and finally the
/// user is changed, since a non-root process can no longer change groups.
/// Returns `Ok(false)` without touching anything when not running as root.
pub fn drop_privileges(uid: u32, gid: u32) -> Result<bool, SockexecError> {
    if !getuid().is_root() {
        return Ok(false);
    }

    let failed = |source: Errno| SockexecError::PrivilegeDrop { uid, gid, source };

    clear_supplementary_groups(gid).map_err(failed)?;
    setgid(Gid::from_raw(gid)).map_err(failed)?;
    setuid(Uid::from_raw(uid)).map_err(failed)?;

    info!("Dropped privileges to uid {uid}, gid {gid}");
    Ok(true)
}

fn clear_supplementary_groups(gid: u32) -> Result<(), Errno> {
    let groups = [gid as libc::gid_t];
    #[cfg(target_os = "linux")]
    let group_len = groups.len() as libc::size_t;
    #[cfg(not(target_os = "linux"))]
    let group_len = groups.len() as libc::c_int;

    if unsafe { libc::setgroups(group_len, groups.as_ptr()) } != 0 {
        return Err(Errno::last());
    }
    Ok(())
}
