//! The Collector's ten-step pipeline (spec §4.2): pre-vacuum, save, evict, post-vacuum, drop
//! privileges, trace, compose, compress, commit, emit.
//!
//! Ordering within one invocation is a hard guarantee (vacuum precedes save; save precedes
//! compress; compress precedes link; link precedes journal emit) but there is no ordering
//! across invocations, and no lock is held on the storage directory — see module docs on
//! [`crate::vacuum`] for how concurrent Collectors stay safe without one.

use crate::compress;
use crate::config::{Configuration, Storage};
use crate::context::Context;
use crate::filename;
use crate::journal::{JournalSink, Record};
use crate::privilege;
use crate::stacktrace::{self, StackTracer};
use crate::storage::{self, AnonTemp};
use crate::vacuum::{self, VacuumPolicy};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::{info, warn};

pub const PAGE_SIZE_FLOOR: u64 = 4096;

/// Reads from `src` into `dst` until either the source is exhausted or `max_bytes` have been
/// copied, in which case the remainder of `src` is drained (so a caller holding the same
/// descriptor later doesn't see stale unread bytes) and truncation is reported.
fn copy_bounded(src: &mut impl Read, dst: &mut File, max_bytes: u64) -> std::io::Result<(u64, bool)> {
    let mut buf = [0u8; 64 * 1024];
    let mut copied = 0u64;
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            return Ok((copied, false));
        }
        if copied + n as u64 <= max_bytes {
            dst.write_all(&buf[..n])?;
            copied += n as u64;
        } else {
            let take = (max_bytes - copied) as usize;
            dst.write_all(&buf[..take])?;
            copied += take as u64;
            let mut sink = [0u8; 64 * 1024];
            while src.read(&mut sink)? > 0 {}
            return Ok((copied, true));
        }
    }
}

/// Step 2: unconditionally stream the core into an anonymous working copy, even when the
/// intended storage is `journal`-only or `none` — every later step reads from this file.
/// Returns `None` if `rlimit` is below the page size (core dumping disabled by policy, per
/// S3): the entire pipeline is then skipped.
pub fn save_external(
    core: &mut impl Read,
    storage_dir: &Path,
    config: &Configuration,
    rlimit: u64,
) -> anyhow::Result<Option<(AnonTemp, u64, bool)>> {
    if rlimit < PAGE_SIZE_FLOOR {
        return Ok(None);
    }
    let max = config.ingest_max(rlimit);
    let anon = AnonTemp::create(storage_dir)?;
    let mut file = anon.file.try_clone()?;
    let (size, truncated) = copy_bounded(core, &mut file, max)?;
    file.sync_all()?;
    Ok(Some((anon, size, truncated)))
}

/// Step 3: whether the working copy should never be materialized on disk, because the final
/// storage mode won't retain it there.
pub fn should_evict(config: &Configuration, size: u64) -> bool {
    config.storage != Storage::External || size > config.external_size_max
}

/// Steps 6–9, run after privileges have already been dropped by the caller: optionally trace,
/// compose the message, optionally compress, then commit with mode/ACL/xattrs and link in.
/// Returns the filename it was stored under, if any, and the composed `MESSAGE` text.
pub fn finalize(
    anon: AnonTemp,
    evicted: bool,
    ctx: &Context,
    config: &Configuration,
    size: u64,
    tracer: Option<&dyn StackTracer>,
) -> (Option<String>, String) {
    let message = compose_message(ctx, anon_trace(&anon, ctx, config, size, tracer));

    if evicted {
        return (None, message);
    }

    let filename_raw = filename::core_filename(
        &ctx.comm,
        ctx.uid,
        &filename::boot_id(),
        ctx.pid,
        &ctx.timestamp_us,
    );

    let (final_anon, final_name) = if config.compress {
        match try_compress(&anon, config) {
            Some(compressed) => (compressed, format!("{filename_raw}{}", compress::SUFFIX)),
            None => (anon, filename_raw),
        }
    } else {
        (anon, filename_raw)
    };

    if let Err(e) = storage::set_mode(&final_anon.file) {
        warn!(error = %e, "chmod 0640 failed");
    }
    if let Err(e) = storage::set_read_acl(&final_anon.file, ctx.uid) {
        warn!(error = %e, "ACL assignment failed");
    }
    if let Err(e) = storage::set_xattrs(&final_anon.file, ctx) {
        warn!(error = %e, "xattr assignment failed");
    }

    match final_anon.link_into(&final_name) {
        Ok(_path) => (Some(final_name), message),
        Err(e) => {
            warn!(error = %e, "fsync/link of core file failed, core is lost");
            (None, message)
        }
    }
}

fn anon_trace(
    anon: &AnonTemp,
    ctx: &Context,
    config: &Configuration,
    size: u64,
    tracer: Option<&dyn StackTracer>,
) -> Option<String> {
    let tracer = tracer?;
    if stacktrace::check_size(size, config.process_size_max).is_err() {
        return None;
    }
    let mut f = anon.file.try_clone().ok()?;
    f.seek(SeekFrom::Start(0)).ok()?;
    match tracer.trace(&f, &ctx.exe) {
        Ok(trace) => Some(trace),
        Err(e) => {
            warn!(error = %e, "stack trace generation failed");
            None
        }
    }
}

fn compose_message(ctx: &Context, trace: Option<String>) -> String {
    let headline = format!(
        "Process {} ({}) of user {} dumped core.",
        ctx.pid, ctx.comm, ctx.uid
    );
    match trace {
        Some(trace) => format!("{headline}\n\n{trace}"),
        None => headline,
    }
}

/// Compresses `anon`'s contents into a fresh anonymous temporary. `None` on any failure,
/// leaving the caller to fall back to the uncompressed original per spec step 8.
fn try_compress(anon: &AnonTemp, config: &Configuration) -> Option<AnonTemp> {
    let dir = Path::new(&config.storage_dir);
    let compressed = AnonTemp::create(dir).ok()?;
    let mut src = anon.file.try_clone().ok()?;
    match compress::compress(&mut src, &compressed.file) {
        Ok(_) => Some(compressed),
        Err(e) => {
            warn!(error = %e, "compression failed, retaining uncompressed core");
            None
        }
    }
}

/// Step 10: build the journal record. Adds `COREDUMP_FILENAME` when stored on disk and inlines
/// `COREDUMP` (read back from `working`, the original pre-compression descriptor) when storage
/// is `journal` and the core fits `JournalSizeMax`.
pub fn emit_journal(
    sink: &dyn JournalSink,
    ctx: &Context,
    config: &Configuration,
    working: Option<&mut File>,
    size: u64,
    filename: Option<&str>,
    message: String,
    extra_fields: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let mut record = Record::default();
    for (k, v) in ctx.to_fields() {
        record.push_text(k, v);
    }
    for (k, v) in extra_fields {
        record.push_text(k, v);
    }
    if let Some(name) = filename {
        record.push_text("COREDUMP_FILENAME", name);
    }
    if config.storage == Storage::Journal && size <= config.journal_size_max {
        if let Some(file) = working {
            file.seek(SeekFrom::Start(0))?;
            let mut buf = Vec::with_capacity(size as usize);
            file.read_to_end(&mut buf)?;
            record.push_binary("COREDUMP", buf);
        }
    }
    record.push_text("MESSAGE", message);
    record.push_text("MESSAGE_ID", crate::journal::MESSAGE_ID);
    record.push_text("PRIORITY", "2");
    sink.submit(record)
}

/// Full Collector pipeline for a non-special crash. Privilege drop is performed here, between
/// steps 4 and 6, matching the spec's ordering.
pub fn run(
    ctx: Context,
    core: &mut impl Read,
    config: &Configuration,
    sink: &dyn JournalSink,
    tracer: Option<&dyn StackTracer>,
    extra_fields: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let storage_dir = Path::new(&config.storage_dir);
    std::fs::create_dir_all(storage_dir).ok();

    let policy = VacuumPolicy {
        keep_free: config.keep_free,
        max_use: config.max_use,
    };
    vacuum::vacuum(storage_dir, &policy, None)?;

    let Some((anon, size, truncated)) = save_external(core, storage_dir, config, ctx.rlimit)? else {
        info!(pid = ctx.pid, comm = %ctx.comm, rlimit = ctx.rlimit, "core dumping disabled by resource limit, skipping");
        return Ok(());
    };

    if truncated {
        warn!(pid = ctx.pid, limit = config.ingest_max(ctx.rlimit), "SIZE_LIMIT: core truncated to configured maximum");
    }

    // Kept independent of whatever `finalize` does to `anon` (naming, compression, linking) so
    // step 10 can always read the raw pre-compression bytes back, per the spec.
    let mut working_copy = anon.file.try_clone()?;

    let evicted = should_evict(config, size);
    let exempt_ino = anon.file.metadata().ok().map(|m| m.ino());
    vacuum::vacuum(storage_dir, &policy, exempt_ino)?;

    let identity = privilege::resolve_identity(ctx.uid, ctx.gid);
    if let Err(e) = privilege::drop_privileges(identity) {
        warn!(error = %e, "privilege drop failed");
    }

    let (filename, message) = finalize(anon, evicted, &ctx, config, size, tracer);

    let mut extra = extra_fields;
    if truncated {
        extra.push(("COREDUMP_TRUNCATED".to_string(), "true".to_string()));
    }

    emit_journal(
        sink,
        &ctx,
        config,
        Some(&mut working_copy),
        size,
        filename.as_deref(),
        message,
        extra,
    )?;
    Ok(())
}
