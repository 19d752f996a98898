//! The Collector binary: socket-activated, one inherited connection per invocation, at the
//! slot `LISTEN_FDS_START` (fd 3) a process supervisor conventionally hands off.

use coredumpd::context::{Context, CONTEXT_KEYS};
use coredumpd::error::Error;
use coredumpd::journal::SystemdJournalSink;
use coredumpd::stacktrace::GoblinStackTracer;
use coredumpd::wire::SeqpacketSocket;
use coredumpd::{config, pipeline};

use std::os::fd::OwnedFd;
use tracing::error;

/// The conventional first socket-activation slot (`sd_listen_fds`'s `SD_LISTEN_FDS_START`).
const LISTEN_FDS_START: i32 = 3;

fn main() {
    let config = config::load(coredumpd::config_path()).unwrap_or_else(|e| {
        eprintln!("warning: failed to load configuration, using defaults: {e}");
        config::Configuration::default()
    });
    coredumpd::init_logging(&config.log_level);

    if let Err(e) = run(&config) {
        error!(error = %e, "collector invocation failed");
        std::process::exit(1);
    }
}

fn run(config: &config::Configuration) -> anyhow::Result<()> {
    // SAFETY: the supervisor that activated us guarantees this fd is open and ours exclusively.
    let socket = unsafe { SeqpacketSocket::from_raw_fd(LISTEN_FDS_START) };

    let (fields, core_fd) = receive_all(&socket)?;
    let core_fd = core_fd.ok_or_else(|| anyhow::anyhow!("connection closed without a core descriptor"))?;

    let ctx = Context::from_fields(&fields)?;
    let extra: Vec<(String, String)> = fields
        .into_iter()
        .filter(|(k, _)| !is_context_field(k))
        .collect();

    let mut core_file = std::fs::File::from(core_fd);
    let sink = SystemdJournalSink::new();
    let tracer = GoblinStackTracer;

    pipeline::run(ctx, &mut core_file, config, &sink, Some(&tracer), extra)
}

fn is_context_field(key: &str) -> bool {
    key.strip_prefix("COREDUMP_")
        .map(|suffix| CONTEXT_KEYS.contains(&suffix))
        .unwrap_or(false)
}

/// Reads field datagrams until the terminal zero-length, fd-carrying datagram per the
/// Connection state machine (spec §4.5): `IDLE → RECEIVING → (RECEIVING | CLOSING)`. Every
/// legitimate field datagram carries a non-empty `NAME=VALUE` payload, so a zero-length read
/// with no descriptor attached is never a real field — it's the peer's connection closing
/// before it sent the terminal datagram, which is an error, not an end-of-stream to ride out.
fn receive_all(socket: &SeqpacketSocket) -> anyhow::Result<(Vec<(String, String)>, Option<OwnedFd>)> {
    let mut fields = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (bytes, fd) = socket.recv_datagram(&mut buf)?;
        if let Some(fd) = fd {
            return Ok((fields, Some(fd)));
        }
        if bytes.is_empty() {
            return Err(Error::BadMessage(
                "connection closed before the terminal fd-carrying datagram arrived".into(),
            )
            .into());
        }
        if let Some(field) = coredumpd::wire::parse_field(&bytes) {
            fields.push(field);
        }
    }
}
