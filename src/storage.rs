//! Filesystem-level collaborators: anonymous temporaries, xattrs, POSIX ACLs, atomic linking.
//!
//! These are the "external collaborators" the spec calls out as out of scope for the ingestion
//! logic proper, implemented here so the pipeline is runnable end to end. Every operation in
//! this module is best-effort except [`AnonTemp::link_into`], whose failure is local-fatal.

use crate::context::Context;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::linkat;
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const FILE_MODE: u32 = 0o640;
/// UIDs at or below this threshold are system identities, never granted a per-user read ACL.
pub const SYSTEM_UID_MAX: u32 = 999;

/// An anonymous file created with `O_TMPFILE` in `dir` (falling back to a named, immediately
/// unlinked temporary on filesystems that don't support it). Never has a path in the directory
/// until [`AnonTemp::link_into`] succeeds.
pub struct AnonTemp {
    pub file: File,
    dir: PathBuf,
}

impl AnonTemp {
    pub fn create(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let flags = OFlag::O_TMPFILE | OFlag::O_RDWR | OFlag::O_CLOEXEC;
        match open(&dir, flags, Mode::from_bits_truncate(0o600)) {
            Ok(fd) => Ok(AnonTemp {
                // SAFETY: `open` just returned this fd to us; we own it exclusively.
                file: unsafe { File::from_raw_fd(fd) },
                dir,
            }),
            Err(_) => {
                // Fallback for filesystems without O_TMPFILE support (e.g. some overlayfs
                // configurations): a named temporary, unlinked immediately so it behaves the
                // same as O_TMPFILE from every caller's point of view.
                let named = dir.join(format!(".coredump-tmp-{}", std::process::id()));
                let f = File::create(&named)?;
                std::fs::remove_file(&named)?;
                Ok(AnonTemp { file: f, dir })
            }
        }
    }

    pub fn as_raw_fd(&self) -> i32 {
        self.file.as_raw_fd()
    }

    /// Applies mode, ACL and xattrs, `fsync`s, then atomically links the anonymous file into
    /// `name` under its directory via the `/proc/self/fd/<n>` re-open trick. On any failure the
    /// file is simply dropped; it never appears in the directory (local-fatal only on the
    /// `fsync`/link step itself, per the spec's step 9).
    pub fn link_into(self, name: &str) -> std::io::Result<PathBuf> {
        self.file.sync_all()?;
        let target = self.dir.join(name);
        let proc_path = format!("/proc/self/fd/{}", self.file.as_raw_fd());
        linkat(
            None,
            proc_path.as_str(),
            None,
            target.to_str().unwrap_or_default(),
            nix::unistd::LinkatFlags::SymlinkFollow,
        )
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
        Ok(target)
    }
}

/// `chmod 0640`. Best-effort: failures are logged by the caller, never fatal.
pub fn set_mode(file: &File) -> std::io::Result<()> {
    file.set_permissions(std::fs::Permissions::from_mode(FILE_MODE))
}

/// `user.coredump.*` xattrs reproducing the context verbatim, plus `rlimit` (Open Question in
/// the spec resolved: yes, publish it, for symmetry with the journal field).
pub fn set_xattrs(file: &File, ctx: &Context) -> std::io::Result<()> {
    let pairs = [
        ("user.coredump.pid", ctx.pid.to_string()),
        ("user.coredump.uid", ctx.uid.to_string()),
        ("user.coredump.gid", ctx.gid.to_string()),
        ("user.coredump.signal", ctx.signal.to_string()),
        ("user.coredump.timestamp", ctx.timestamp_us.clone()),
        ("user.coredump.comm", ctx.comm.clone()),
        ("user.coredump.exe", ctx.exe.clone()),
        ("user.coredump.rlimit", ctx.rlimit.to_string()),
    ];
    for (key, value) in pairs {
        // Individual xattr failures (e.g. name too long, fs without xattr support) don't
        // prevent the remaining ones from being attempted.
        let _ = xattr::set(&PathBuf::from(format!("/proc/self/fd/{}", file.as_raw_fd())), key, value.as_bytes());
    }
    Ok(())
}

/// Adds `user:<uid>:r--` to the default ACL, unless `uid` is a system identity. Best-effort.
pub fn set_read_acl(file: &File, uid: u32) -> anyhow::Result<()> {
    if uid <= SYSTEM_UID_MAX {
        return Ok(());
    }
    let mut acl = posix_acl::PosixACL::read_acl(&proc_fd_path(file))?;
    acl.set(posix_acl::Qualifier::User(uid), posix_acl::READ);
    acl.write_acl(&proc_fd_path(file))?;
    Ok(())
}

fn proc_fd_path(file: &File) -> PathBuf {
    PathBuf::from(format!("/proc/self/fd/{}", file.as_raw_fd()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn ctx() -> Context {
        Context {
            pid: 4242,
            uid: 1000,
            gid: 1000,
            signal: 11,
            timestamp_us: "1700000000000000".into(),
            rlimit: 8 * 1024 * 1024,
            comm: "hello".into(),
            exe: "/usr/bin/hello".into(),
        }
    }

    #[test]
    fn anon_temp_is_invisible_until_linked() {
        let dir = tempfile::tempdir().unwrap();
        let anon = AnonTemp::create(dir.path()).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(entries.is_empty(), "anonymous temp must not be visible in the directory");
        drop(anon);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(entries.is_empty(), "dropping without linking must leave no trace");
    }

    #[test]
    fn link_into_materializes_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let anon = AnonTemp::create(dir.path()).unwrap();
        use std::io::Write;
        let mut f = &anon.file;
        f.write_all(b"core bytes").unwrap();
        let path = anon.link_into("core.test").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"core bytes");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn set_mode_yields_0640() {
        let dir = tempfile::tempdir().unwrap();
        let anon = AnonTemp::create(dir.path()).unwrap();
        set_mode(&anon.file).unwrap();
        let perm = anon.file.metadata().unwrap().permissions().mode() & 0o777;
        assert_eq!(perm, FILE_MODE);
    }
}
