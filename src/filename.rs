//! Escaping and construction of the on-disk core filename, and boot-id retrieval.

use std::fs;

/// Escapes `.`, `/` and ASCII space into `\xHH` so the result is usable as a single path
/// segment; no other characters are touched.
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'.' | b'/' | b' ' => out.push_str(&format!("\\x{b:02x}")),
            _ => out.push(b as char),
        }
    }
    out
}

/// Inverse of [`escape_component`]; used by tests to check the filename round-trips.
pub fn unescape_component(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            if let Ok(v) = u8::from_str_radix(&escaped[i + 2..i + 4], 16) {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `core.<comm>.<uid>.<boot-id>.<pid>.<timestamp-us>`, each dynamic component escaped.
///
/// The context's timestamp is the kernel's raw `%t` string (seconds on some kernels,
/// milliseconds on others); turning it into microseconds is an unconditional `000000` suffix
/// appended here, not a function of how many digits the context already carries.
pub fn core_filename(comm: &str, uid: u32, boot_id: &str, pid: i32, timestamp_us: &str) -> String {
    format!(
        "core.{}.{}.{}.{}.{}",
        escape_component(comm),
        escape_component(&uid.to_string()),
        boot_id,
        escape_component(&pid.to_string()),
        escape_component(&format!("{timestamp_us}000000")),
    )
}

/// Reads the kernel's 32-hex-character boot identifier. Falls back to 32 zeroes (never fails
/// naming) if the kernel doesn't expose it, e.g. inside unusual containers or during tests.
pub fn boot_id() -> String {
    fs::read_to_string("/proc/sys/kernel/random/boot_id")
        .map(|s| s.trim().replace('-', ""))
        .filter(|s| s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or_else(|| "0".repeat(32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_dot_slash_space() {
        assert_eq!(escape_component("a.b/c d"), "a\\x2eb\\x2fc\\x20d");
    }

    #[test]
    fn leaves_plain_ascii_untouched() {
        assert_eq!(escape_component("hello123"), "hello123");
    }

    #[test]
    fn round_trips() {
        for s in ["hello", "a.out", "my/weird name.exe", ""] {
            assert_eq!(unescape_component(&escape_component(s)), s);
        }
    }

    #[test]
    fn filename_has_single_path_segment() {
        let name = core_filename("my proc", 1000, &"a".repeat(32), 4242, "1700000000000000");
        assert!(!name.contains('/'));
        assert!(name.starts_with("core."));
    }

    #[test]
    fn filename_round_trips_components() {
        let comm = "hello world";
        let uid = 1000u32;
        let pid = 4242i32;
        let ts = "1700000000000000";
        let boot = "a".repeat(32);
        let name = core_filename(comm, uid, &boot, pid, ts);
        let mut parts = name.splitn(6, '.');
        assert_eq!(parts.next().unwrap(), "core");
        assert_eq!(unescape_component(parts.next().unwrap()), comm);
        assert_eq!(unescape_component(parts.next().unwrap()), uid.to_string());
        assert_eq!(parts.next().unwrap(), boot);
        assert_eq!(unescape_component(parts.next().unwrap()), pid.to_string());
        assert_eq!(unescape_component(parts.next().unwrap()), format!("{ts}000000"));
    }

    #[test]
    fn filename_appends_literal_six_zeroes_to_timestamp() {
        let name = core_filename("hello", 1000, &"b".repeat(32), 4242, "1700000000000000");
        assert!(name.ends_with("1700000000000000000000"));
    }
}
