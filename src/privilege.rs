//! The irreversible privilege transition: root-invoked Collector to either the crashing user's
//! own uid/gid, or a dedicated service identity for system crashes.
//!
//! Per the spec's design notes: this is a single one-way step. No file descriptor survives it
//! except the core's own working descriptor, which is opened before the drop and simply
//! inherited across `setresgid`/`setresuid` (dropping privileges never closes existing fds).

use nix::unistd::{Gid, Uid, User};
use tracing::warn;

pub const SERVICE_USER: &str = "systemd-coredump";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

/// Resolves which identity the Collector should drop to for a crash reported as `uid`/`gid`.
/// System identities (`uid <= SYSTEM_UID_MAX`) are rehomed onto the dedicated service account;
/// everyone else keeps their own uid/gid exactly. Falls back to 0/0 with a warning if the
/// service account can't be resolved — the spec prefers a logged downgrade over aborting here,
/// since by this point the core is already safely on disk.
pub fn resolve_identity(uid: u32, gid: u32) -> Identity {
    if uid > crate::storage::SYSTEM_UID_MAX {
        return Identity { uid, gid };
    }
    match User::from_name(SERVICE_USER) {
        Ok(Some(user)) => Identity {
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        },
        _ => {
            warn!(service_user = SERVICE_USER, "could not resolve service identity, falling back to 0/0");
            Identity { uid: 0, gid: 0 }
        }
    }
}

/// Irreversibly drops privileges to `identity`. Group first, then user, as is required on
/// Linux (dropping the uid first removes the ability to change the gid).
pub fn drop_privileges(identity: Identity) -> Result<(), nix::Error> {
    nix::unistd::setresgid(
        Gid::from_raw(identity.gid),
        Gid::from_raw(identity.gid),
        Gid::from_raw(identity.gid),
    )?;
    nix::unistd::setresuid(
        Uid::from_raw(identity.uid),
        Uid::from_raw(identity.uid),
        Uid::from_raw(identity.uid),
    )?;
    Ok(())
}
