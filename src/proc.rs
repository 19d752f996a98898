//! Best-effort enrichment of the context from `/proc/<pid>/...`.
//!
//! Every accessor here is fallible and every failure is swallowed into `None`: a process that
//! has already exited by the time we get around to reading `/proc/<pid>/maps` is routine, not
//! exceptional, and the spec requires these fields to simply be omitted rather than abort
//! the pipeline.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// One `/proc/<pid>/...` read, tolerant of the process having already exited.
fn read_proc(pid: i32, leaf: &str) -> Option<String> {
    fs::read_to_string(format!("/proc/{pid}/{leaf}")).ok()
}

fn read_link(pid: i32, leaf: &str) -> Option<String> {
    fs::read_link(format!("/proc/{pid}/{leaf}"))
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// `environ` and `cmdline` are NUL-separated; join with spaces the way the kernel's own
/// `/proc/<pid>/cmdline` convention is usually rendered for humans.
fn read_nul_separated(pid: i32, leaf: &str) -> Option<String> {
    let raw = fs::read(format!("/proc/{pid}/{leaf}")).ok()?;
    let joined = raw
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    Some(joined)
}

/// The kernel's preferred `comm`, if the process is still alive to ask.
pub fn comm(pid: i32) -> Option<String> {
    read_proc(pid, "comm").map(|s| s.trim_end().to_string())
}

pub fn status(pid: i32) -> Option<String> {
    read_proc(pid, "status")
}

pub fn maps(pid: i32) -> Option<String> {
    read_proc(pid, "maps")
}

pub fn limits(pid: i32) -> Option<String> {
    read_proc(pid, "limits")
}

pub fn cgroup(pid: i32) -> Option<String> {
    read_proc(pid, "cgroup")
}

pub fn mountinfo(pid: i32) -> Option<String> {
    read_proc(pid, "mountinfo")
}

pub fn cwd(pid: i32) -> Option<String> {
    read_link(pid, "cwd")
}

pub fn root(pid: i32) -> Option<String> {
    read_link(pid, "root")
}

pub fn environ(pid: i32) -> Option<String> {
    read_nul_separated(pid, "environ")
}

pub fn cmdline(pid: i32) -> Option<String> {
    read_nul_separated(pid, "cmdline")
}

/// Path to the binary the process was executed from, resolved via `/proc/<pid>/exe`.
pub fn exe(pid: i32) -> Option<String> {
    read_link(pid, "exe")
}

/// `PPid:` line out of `/proc/<pid>/status`, used by the container-ancestor walk.
fn parent_pid(pid: i32) -> Option<i32> {
    let status = status(pid)?;
    status
        .lines()
        .find_map(|l| l.strip_prefix("PPid:"))
        .and_then(|v| v.trim().parse().ok())
}

fn ns_inode(pid: i32, ns: &str) -> Option<u64> {
    fs::metadata(format!("/proc/{pid}/ns/{ns}")).ok().map(|m| m.ino())
}

/// A single `user_unit`/`unit`/`session`/`owner_uid`/`slice`/`cgroup_path` bundle derived from
/// `/proc/<pid>/cgroup` and `status` without a D-Bus round-trip to a login/cgroup manager
/// (that manager is itself an external collaborator out of scope for this crate).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub unit: Option<String>,
    pub user_unit: Option<String>,
    pub session: Option<String>,
    pub owner_uid: Option<String>,
    pub slice: Option<String>,
    pub cgroup: Option<String>,
}

/// Parses the unified `0::/<path>` line from `/proc/<pid>/cgroup` into unit-manager terms.
/// systemd lays control groups out as `<slice>/<unit>.(service|scope)` for system units and
/// under `user.slice/user-<uid>.slice/user@<uid>.service/<session>.scope` for logind sessions.
pub fn unit_info(pid: i32) -> UnitInfo {
    let mut info = UnitInfo::default();
    let Some(raw) = cgroup(pid) else {
        return info;
    };
    let Some(path) = raw.lines().find_map(|l| l.strip_prefix("0::")) else {
        return info;
    };
    info.cgroup = Some(path.to_string());

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    info.slice = segments
        .iter()
        .rev()
        .find(|s| s.ends_with(".slice"))
        .map(|s| s.to_string());

    if let Some(last) = segments.last() {
        if last.ends_with(".service") || last.ends_with(".scope") {
            info.unit = Some(last.to_string());
        }
    }

    if let Some(uid_seg) = segments.iter().find(|s| s.starts_with("user-") && s.ends_with(".slice")) {
        info.owner_uid = uid_seg
            .trim_start_matches("user-")
            .trim_end_matches(".slice")
            .parse::<u32>()
            .ok()
            .map(|u| u.to_string());
    }
    if let Some(session_seg) = segments
        .iter()
        .find(|s| s.starts_with("session-") && s.ends_with(".scope"))
    {
        info.session = session_seg
            .trim_start_matches("session-")
            .trim_end_matches(".scope")
            .parse::<u32>()
            .ok()
            .map(|s| s.to_string());
        info.user_unit = Some((*session_seg).to_string());
    }
    info
}

/// Joins each open file descriptor's target and `fdinfo` body into the `<n>:<target>\n<body>\n`
/// blocks the spec's `OPEN_FDS` field is built from.
pub fn open_fds(pid: i32) -> Option<String> {
    let dir = fs::read_dir(format!("/proc/{pid}/fd")).ok()?;
    let mut blocks = Vec::new();
    let mut entries: Vec<_> = dir.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let n = entry.file_name().to_string_lossy().into_owned();
        let target = fs::read_link(entry.path())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "?".to_string());
        let fdinfo = fs::read_to_string(format!("/proc/{pid}/fdinfo/{n}")).unwrap_or_default();
        blocks.push(format!("{n}:{target}\n{fdinfo}\n"));
    }
    Some(blocks.concat())
}

/// Walks `PPid` ancestors starting from `pid` until the mount-namespace inode changes from
/// `child_mnt_ns`, returning the first ancestor pid found outside the namespace. Stops at pid 1
/// with `None` if the walk never leaves the namespace (not contained, or already pid 1).
/// Bounded by the process tree depth; cannot cycle because `PPid` strictly decreases toward 1
/// in a well-formed process tree.
pub fn first_ancestor_outside_mount_ns(pid: i32, child_mnt_ns: u64) -> Option<i32> {
    let mut current = pid;
    loop {
        if current <= 1 {
            return None;
        }
        let parent = parent_pid(current)?;
        if parent <= 0 {
            return None;
        }
        let parent_ns = ns_inode(parent, "mnt")?;
        if parent_ns != child_mnt_ns {
            return Some(parent);
        }
        if parent == current {
            return None;
        }
        current = parent;
    }
}

/// `COREDUMP_CONTAINER_CMDLINE`: only populated when the crashing process's `/proc/<pid>/root`
/// resolves to the same inode as the real `/` — i.e. it is *not* itself containerised — in
/// which case we look for the container boundary by walking ancestors.
pub fn container_cmdline(pid: i32) -> Option<String> {
    let root_ino = fs::metadata(format!("/proc/{pid}/root")).ok()?.ino();
    let real_root_ino = fs::metadata("/").ok()?.ino();
    if root_ino != real_root_ino {
        return None;
    }
    let child_ns = ns_inode(pid, "mnt")?;
    let ancestor = first_ancestor_outside_mount_ns(pid, child_ns)?;
    cmdline(ancestor)
}

/// True if `path`'s root inode matches pid 1's root (i.e. `path` points at the same `/`).
pub fn is_real_root(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|a| fs::metadata("/").map(|b| a.ino() == b.ino()))
        .unwrap_or(false)
}
