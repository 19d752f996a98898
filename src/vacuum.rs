//! Disk-vacuum collaborator: enforces `KeepFree`/`MaxUse` against the storage directory.
//!
//! Idempotent and safe to run concurrently with other Collector instances writing new files:
//! it only ever deletes existing directory entries ordered oldest-first, and accepts an
//! `exempt` descriptor so the just-created working file is never pruned even if it briefly
//! pushes the directory over quota.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct VacuumPolicy {
    pub keep_free: Option<u64>,
    pub max_use: Option<u64>,
}

/// Removes the oldest `core.*` files under `dir` until both `keep_free` (bytes of free space
/// on the containing filesystem) and `max_use` (total bytes occupied by `core.*` files) are
/// satisfied, or there is nothing left to remove. `exempt_ino` (the just-created working file's
/// inode, when known) is never deleted even if removing it would satisfy the policy.
pub fn vacuum(dir: &Path, policy: &VacuumPolicy, exempt_ino: Option<u64>) -> std::io::Result<()> {
    if policy.keep_free.is_none() && policy.max_use.is_none() {
        return Ok(());
    }

    let mut entries = list_core_files(dir)?;
    entries.sort_by_key(|(_, meta)| meta.mtime());

    let mut total: u64 = entries.iter().map(|(_, m)| m.size() as u64).sum();

    for (path, meta) in entries {
        if meta.ino() == exempt_ino.unwrap_or(u64::MAX) {
            continue;
        }
        if satisfies(dir, policy, total)? {
            break;
        }
        let size = meta.size() as u64;
        if fs::remove_file(&path).is_ok() {
            total = total.saturating_sub(size);
        }
    }
    Ok(())
}

fn satisfies(dir: &Path, policy: &VacuumPolicy, total_use: u64) -> std::io::Result<bool> {
    if let Some(max_use) = policy.max_use {
        if total_use > max_use {
            return Ok(false);
        }
    }
    if let Some(keep_free) = policy.keep_free {
        if free_space(dir)? < keep_free {
            return Ok(false);
        }
    }
    Ok(true)
}

fn free_space(dir: &Path) -> std::io::Result<u64> {
    // statvfs isn't in std; nix provides it.
    let stat = nix::sys::statvfs::statvfs(dir)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size())
}

fn list_core_files(dir: &Path) -> std::io::Result<Vec<(std::path::PathBuf, fs::Metadata)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("core.") {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            out.push((entry.path(), meta));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_core_file(dir: &Path, name: &str, size: usize) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(&vec![0u8; size]).unwrap();
    }

    #[test]
    fn no_policy_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        write_core_file(dir.path(), "core.a.1.b.1.1", 1024);
        vacuum(dir.path(), &VacuumPolicy::default(), None).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn prunes_oldest_first_to_satisfy_max_use() {
        let dir = tempfile::tempdir().unwrap();
        write_core_file(dir.path(), "core.old.1.b.1.1", 100);
        std::thread::sleep(std::time::Duration::from_millis(10));
        write_core_file(dir.path(), "core.new.1.b.1.2", 100);

        let policy = VacuumPolicy {
            keep_free: None,
            max_use: Some(150),
        };
        vacuum(dir.path(), &policy, None).unwrap();

        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining, vec!["core.new.1.b.1.2"]);
    }

    #[test]
    fn never_removes_the_exempt_inode() {
        let dir = tempfile::tempdir().unwrap();
        write_core_file(dir.path(), "core.only.1.b.1.1", 100);
        let ino = fs::metadata(dir.path().join("core.only.1.b.1.1")).unwrap().ino();

        let policy = VacuumPolicy {
            keep_free: None,
            max_use: Some(0),
        };
        vacuum(dir.path(), &policy, Some(ino)).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn ignores_non_core_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("not-a-core-file.txt"), b"hi").unwrap();
        let policy = VacuumPolicy {
            keep_free: None,
            max_use: Some(0),
        };
        vacuum(dir.path(), &policy, None).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
