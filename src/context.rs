//! The context record: a fixed-arity bag of metadata identifying one crash.
//!
//! Built once per invocation from the kernel's positional arguments (and, on the Frontend
//! side, enriched from `/proc`) and never mutated afterwards. Every other component reads it.

use crate::error::{Error, Result};
use std::fmt;

/// The six fields the kernel is required to supply. `comm` is the kernel's raw, possibly
/// truncated, possibly tokenised name and is refined later; `exe` is never supplied by the
/// kernel and stays empty until the Frontend resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub pid: libc::pid_t,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub signal: i32,
    /// The kernel's `%t` core-pattern timestamp, kept verbatim as a decimal string: seconds on
    /// some kernels, milliseconds on others depending on distro patching. Turning this into a
    /// microsecond value by appending `000000` happens only at filename-construction time (see
    /// [`crate::filename::core_filename`]), not here — the journal field carries the raw digits.
    pub timestamp_us: String,
    pub rlimit: u64,
    pub comm: String,
    pub exe: String,
}

/// The wire/xattr/journal key names, in the fixed order the spec enumerates them.
pub const CONTEXT_KEYS: [&str; 8] = [
    "PID", "UID", "GID", "SIGNAL", "TIMESTAMP", "RLIMIT", "COMM", "EXE",
];

impl Context {
    /// Parses the six required positional arguments the kernel passes to the core handler,
    /// plus the (possibly multi-token) `comm` tail. Returns [`Error::InvalidInvocation`] if
    /// any of the first six arguments is missing or fails to parse as the expected integer type.
    pub fn parse(args: &[String]) -> Result<Context> {
        if args.len() < 6 {
            return Err(Error::InvalidInvocation(format!(
                "expected at least 6 positional arguments (pid uid gid signal timestamp rlimit), got {}",
                args.len()
            )));
        }
        let pid = parse_field(&args[0], "pid")?;
        let uid = parse_field(&args[1], "uid")?;
        let gid = parse_field(&args[2], "gid")?;
        let signal = parse_field(&args[3], "signal")?;
        let timestamp_us = args[4].clone();
        let rlimit = parse_field(&args[5], "rlimit")?;
        let comm = args[6..].join(" ");

        Ok(Context {
            pid,
            uid,
            gid,
            signal,
            timestamp_us,
            rlimit,
            comm,
            exe: String::new(),
        })
    }

    /// `COREDUMP_*` journal fields derived directly from the context, in a stable order.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("COREDUMP_PID".into(), self.pid.to_string()),
            ("COREDUMP_UID".into(), self.uid.to_string()),
            ("COREDUMP_GID".into(), self.gid.to_string()),
            ("COREDUMP_SIGNAL".into(), self.signal.to_string()),
            ("COREDUMP_TIMESTAMP".into(), self.timestamp_us.clone()),
            ("COREDUMP_RLIMIT".into(), self.rlimit.to_string()),
            ("COREDUMP_COMM".into(), self.comm.clone()),
            ("COREDUMP_EXE".into(), self.exe.clone()),
        ]
    }

    /// Re-parses a [`Context`] back out of the `COREDUMP_*` fields the wire protocol carries,
    /// as the Collector does on the receiving end. Missing optional fields (`EXE`) default to
    /// empty; missing required fields are a [`Error::BadMessage`].
    pub fn from_fields(fields: &[(String, String)]) -> Result<Context> {
        let find = |key: &str| fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        let req = |key: &str| -> Result<String> {
            find(key).ok_or_else(|| Error::BadMessage(format!("missing required field {key}")))
        };

        Ok(Context {
            pid: req("COREDUMP_PID")?
                .parse()
                .map_err(|_| Error::BadMessage("COREDUMP_PID not an integer".into()))?,
            uid: req("COREDUMP_UID")?
                .parse()
                .map_err(|_| Error::BadMessage("COREDUMP_UID not an integer".into()))?,
            gid: req("COREDUMP_GID")?
                .parse()
                .map_err(|_| Error::BadMessage("COREDUMP_GID not an integer".into()))?,
            signal: req("COREDUMP_SIGNAL")?
                .parse()
                .map_err(|_| Error::BadMessage("COREDUMP_SIGNAL not an integer".into()))?,
            timestamp_us: req("COREDUMP_TIMESTAMP")?,
            rlimit: req("COREDUMP_RLIMIT")?
                .parse()
                .map_err(|_| Error::BadMessage("COREDUMP_RLIMIT not an integer".into()))?,
            comm: req("COREDUMP_COMM")?,
            exe: find("COREDUMP_EXE").unwrap_or_default(),
        })
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid={} uid={} comm={:?} signal={}",
            self.pid, self.uid, self.comm, self.signal
        )
    }
}

fn parse_field<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidInvocation(format!("{name} is not a valid integer: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_minimal_context() {
        let ctx = Context::parse(&args(&["4242", "1000", "1000", "11", "1700000000", "8388608", "hello"])).unwrap();
        assert_eq!(ctx.pid, 4242);
        assert_eq!(ctx.uid, 1000);
        assert_eq!(ctx.comm, "hello");
        assert_eq!(ctx.timestamp_us, "1700000000");
    }

    #[test]
    fn joins_multi_token_comm() {
        let ctx = Context::parse(&args(&[
            "1", "0", "0", "6", "1700000000000000", "0", "my", "process", "name",
        ]))
        .unwrap();
        assert_eq!(ctx.comm, "my process name");
    }

    #[test]
    fn rejects_short_argv() {
        let err = Context::parse(&args(&["1", "2", "3"])).unwrap_err();
        assert!(matches!(err, Error::InvalidInvocation(_)));
    }

    #[test]
    fn rejects_non_numeric_pid() {
        let err = Context::parse(&args(&["nope", "0", "0", "0", "0", "0", "c"])).unwrap_err();
        assert!(matches!(err, Error::InvalidInvocation(_)));
    }

    #[test]
    fn round_trips_through_fields() {
        let ctx = Context::parse(&args(&["4242", "1000", "1000", "11", "1700000000", "8388608", "hello"])).unwrap();
        let fields = ctx.to_fields();
        let back = Context::from_fields(&fields).unwrap();
        assert_eq!(ctx, back);
    }

    #[test]
    fn from_fields_requires_pid() {
        let err = Context::from_fields(&[("COREDUMP_UID".into(), "0".into())]).unwrap_err();
        assert!(matches!(err, Error::BadMessage(_)));
    }
}
