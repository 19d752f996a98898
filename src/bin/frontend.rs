//! The Kernel Frontend binary: invoked by the kernel's `core_pattern` as the core handler.
//!
//! `argv = [prog, pid, uid, gid, signal, timestamp, rlimit, comm-tokens…]`, core image on
//! stdin. Builds the full field set, hands it and the core descriptor to the Collector over the
//! datagram socket — unless the crashing process is the supervisor or the journal service
//! itself, in which case the Special-Crash Path runs in-process instead.

use coredumpd::context::Context;
use coredumpd::wire::SeqpacketSocket;
use coredumpd::{config, proc, special_crash};

use std::os::fd::AsRawFd;
use tracing::{error, info, warn};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = config::load(coredumpd::config_path()).unwrap_or_else(|e| {
        eprintln!("warning: failed to load configuration, using defaults: {e}");
        config::Configuration::default()
    });
    coredumpd::init_logging(&config.log_level);

    if let Err(e) = run(&args, &config) {
        error!(error = %e, "core handling failed");
        std::process::exit(1);
    }
}

fn run(args: &[String], config: &config::Configuration) -> anyhow::Result<()> {
    // Self-recursion guard: if the Frontend itself were to crash while handling a crash, the
    // kernel must not invoke it again for that crash.
    disable_own_core_dumping();

    let mut ctx = Context::parse(args)?;
    if let Some(comm) = proc::comm(ctx.pid) {
        ctx.comm = comm;
    }
    if let Some(exe) = proc::exe(ctx.pid) {
        ctx.exe = exe;
    }

    let unit = proc::unit_info(ctx.pid);
    let is_supervisor = ctx.pid == 1 || unit.unit.as_deref() == Some("init.scope");
    let is_journal_service = unit.unit.as_deref() == Some("systemd-journald.service")
        || ctx.comm == "systemd-journald";

    if is_supervisor || is_journal_service {
        info!(pid = ctx.pid, comm = %ctx.comm, "special-crash path engaged");
        if is_supervisor {
            special_crash::disarm_core_pattern();
        }
        let stdin = std::io::stdin();
        let mut lock = stdin.lock();
        return special_crash::run(&ctx, &mut lock, config);
    }

    let extra_fields = enrich(&ctx, &unit);

    let socket = SeqpacketSocket::connect(coredumpd::wire::SOCKET_PATH)?;
    for (k, v) in ctx.to_fields() {
        socket.send_field(&k, &v)?;
    }
    for (k, v) in extra_fields {
        socket.send_field(&k, &v)?;
    }

    let stdin = std::io::stdin();
    socket.send_core_fd(stdin.as_raw_fd())?;
    Ok(())
}

fn disable_own_core_dumping() {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: a well-formed rlimit struct, passed to setrlimit exactly as the libc API expects.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };
    if rc != 0 {
        warn!(
            errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            "failed to disable core dumping for our own process"
        );
    }
}

/// Builds every best-effort `COREDUMP_*` field the spec enumerates beyond the Context record's
/// own fixed fields: `/proc` reads, unit-manager derivation, open-fd listing, container
/// ancestry. Each is omitted, never fatal, when unavailable.
fn enrich(ctx: &Context, unit: &proc::UnitInfo) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut push = |key: &str, value: Option<String>| {
        if let Some(v) = value {
            fields.push((format!("COREDUMP_{key}"), v));
        }
    };

    push("CMDLINE", proc::cmdline(ctx.pid));
    push("UNIT", unit.unit.clone());
    push("USER_UNIT", unit.user_unit.clone());
    push("SESSION", unit.session.clone());
    push("OWNER_UID", unit.owner_uid.clone());
    push("SLICE", unit.slice.clone());
    push("CGROUP", unit.cgroup.clone());
    push("OPEN_FDS", proc::open_fds(ctx.pid));
    push("PROC_STATUS", proc::status(ctx.pid));
    push("PROC_MAPS", proc::maps(ctx.pid));
    push("PROC_LIMITS", proc::limits(ctx.pid));
    push("PROC_CGROUP", proc::cgroup(ctx.pid));
    push("PROC_MOUNTINFO", proc::mountinfo(ctx.pid));
    push("CWD", proc::cwd(ctx.pid));
    push("ROOT", proc::root(ctx.pid));
    push("ENVIRON", proc::environ(ctx.pid));
    push("CONTAINER_CMDLINE", proc::container_cmdline(ctx.pid));

    fields
}
