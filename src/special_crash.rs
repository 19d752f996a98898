//! The Special-Crash Path (spec §4.3): taken in-process by the Frontend itself, without ever
//! opening the datagram socket, when the crashing process is the supervisor scope or the
//! journal service. Reentrancy hazard: the supervisor is what the Collector's socket activation
//! depends on, and the journal service is what journal submission depends on, so neither can be
//! trusted to still be reachable.
//!
//! Writes the core to disk only; no privilege drop, no stack trace, no journal record.

use crate::config::{Configuration, Storage};
use crate::context::Context;
use crate::pipeline::{save_external, should_evict};
use crate::storage;
use crate::vacuum::{self, VacuumPolicy};

use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::{info, warn};

/// The disposition written to the kernel's core-pattern sink so a subsequent supervisor crash
/// (while this one is still being handled) doesn't recurse back into the Frontend.
pub const CORE_PATTERN_OVERRIDE: &str = "|/bin/false";
const CORE_PATTERN_PATH: &str = "/proc/sys/kernel/core_pattern";

/// Best-effort: failing to rewrite `core_pattern` is logged, never fatal — by the time we get
/// here the crash is already being handled.
pub fn disarm_core_pattern() {
    if let Err(e) = std::fs::write(CORE_PATTERN_PATH, CORE_PATTERN_OVERRIDE) {
        warn!(error = %e, "failed to rewrite core_pattern to defensive override");
    }
}

/// Runs save-external and policy-evict only. `Storage::None` is respected (nothing is kept);
/// every other storage mode is forced to `external` so the crash is not silently lost to a
/// journal sink that may itself be unreachable.
pub fn run(ctx: &Context, core: &mut impl Read, config: &Configuration) -> anyhow::Result<()> {
    let mut config = config.clone();
    if config.storage != Storage::None {
        config.storage = Storage::External;
    }

    let storage_dir = Path::new(&config.storage_dir);
    std::fs::create_dir_all(storage_dir).ok();

    let policy = VacuumPolicy {
        keep_free: config.keep_free,
        max_use: config.max_use,
    };
    vacuum::vacuum(storage_dir, &policy, None)?;

    let Some((anon, size, truncated)) = save_external(core, storage_dir, &config, ctx.rlimit)? else {
        info!(pid = ctx.pid, comm = %ctx.comm, "special-crash path: rlimit below page size, skipping");
        return Ok(());
    };
    if truncated {
        warn!(pid = ctx.pid, "special-crash path: core truncated to configured maximum");
    }

    let evicted = should_evict(&config, size);
    let exempt_ino = anon.file.metadata().ok().map(|m| m.ino());
    vacuum::vacuum(storage_dir, &policy, exempt_ino)?;

    if evicted {
        return Ok(());
    }

    let filename_raw = crate::filename::core_filename(
        &ctx.comm,
        ctx.uid,
        &crate::filename::boot_id(),
        ctx.pid,
        &ctx.timestamp_us,
    );
    if let Err(e) = storage::set_mode(&anon.file) {
        warn!(error = %e, "chmod 0640 failed");
    }
    if let Err(e) = storage::set_read_acl(&anon.file, ctx.uid) {
        warn!(error = %e, "ACL assignment failed");
    }
    if let Err(e) = storage::set_xattrs(&anon.file, ctx) {
        warn!(error = %e, "xattr assignment failed");
    }
    if let Err(e) = anon.link_into(&filename_raw) {
        warn!(error = %e, "fsync/link of core file failed, core is lost");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::RecordingJournalSink;

    fn ctx() -> Context {
        Context {
            pid: 1,
            uid: 0,
            gid: 0,
            signal: 11,
            timestamp_us: "1700000000000000".into(),
            rlimit: 8 * 1024 * 1024,
            comm: "systemd".into(),
            exe: "/usr/lib/systemd/systemd".into(),
        }
    }

    #[test]
    fn writes_a_file_and_sends_no_journal_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration::default();
        config.storage_dir = dir.path().to_string_lossy().into_owned();
        let mut src: &[u8] = b"supervisor core bytes";

        run(&ctx(), &mut src, &config).unwrap();

        let stored = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(stored, 1);

        // The special-crash path never touches a journal sink at all; nothing to assert beyond
        // "it was never constructed" here, confirmed structurally by `run`'s signature.
        let sink = RecordingJournalSink::default();
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[test]
    fn storage_none_keeps_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration::default();
        config.storage_dir = dir.path().to_string_lossy().into_owned();
        config.storage = Storage::None;
        let mut src: &[u8] = b"core bytes";

        run(&ctx(), &mut src, &config).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
