//! The `AF_UNIX` / `SOCK_SEQPACKET` handoff protocol between the Frontend and the Collector.
//!
//! One datagram per `NAME=VALUE` field, followed by exactly one terminal zero-length datagram
//! carrying the core file descriptor as `SCM_RIGHTS` ancillary data. Over-size fields are halved
//! and re-sent with a 3-byte `...` continuation marker until they fit, down to a 1-byte floor.

use nix::sys::socket::{
    self, sockopt, AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag,
    SockType, UnixAddr,
};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::{Error, Result};

pub const SOCKET_PATH: &str = "/run/systemd/coredump";

/// Smallest a continuation-bearing fragment is ever allowed to shrink to before we give up
/// halving and log instead of looping toward a zero-byte payload (open question in the spec,
/// resolved here: floor at 1 byte, per the suggested minimum).
const MIN_FRAGMENT: usize = 1;

/// A connected `SOCK_SEQPACKET` endpoint. Thin wrapper so callers never touch raw fds.
pub struct SeqpacketSocket(OwnedFd);

impl SeqpacketSocket {
    pub fn connect(path: &str) -> Result<Self> {
        let fd = socket::socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| Error::Other(anyhow::anyhow!("socket(2): {e}")))?;
        let addr = UnixAddr::new(path).map_err(|e| Error::Other(anyhow::anyhow!("{e}")))?;
        socket::connect(fd.as_raw_fd(), &addr)
            .map_err(|e| Error::Other(anyhow::anyhow!("connect({path}): {e}")))?;
        Ok(SeqpacketSocket(fd))
    }

    /// Wraps an already-connected descriptor handed to us by socket activation (the inherited
    /// fd at `LISTEN_FDS_START`, i.e. 3).
    ///
    /// # Safety
    /// `fd` must be a valid, open descriptor that this process owns exclusively from this
    /// point on.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        SeqpacketSocket(OwnedFd::from_raw_fd(fd))
    }

    pub fn max_msg_size(&self) -> usize {
        socket::getsockopt(self.0.as_raw_fd(), sockopt::SndBuf).unwrap_or(65536) as usize
    }

    /// Sends `NAME=VALUE`, halving and marking continuation with `...` if the kernel rejects it
    /// as too large (`EMSGSIZE`).
    pub fn send_field(&self, name: &str, value: &str) -> Result<()> {
        let mut payload = format!("{name}={value}").into_bytes();
        loop {
            match self.send_datagram(&payload, &[]) {
                Ok(()) => return Ok(()),
                Err(Error::Other(e)) if is_msg_size(&e) => {
                    let prefix_len = name.len() + 1;
                    let value_len = payload.len().saturating_sub(prefix_len);
                    let new_value_len = (value_len / 2).max(MIN_FRAGMENT.min(value_len.max(1)));
                    if new_value_len >= value_len {
                        tracing::warn!(field = name, "field did not shrink further, giving up");
                        return Err(Error::Other(anyhow::anyhow!(
                            "field {name} too large even at floor size"
                        )));
                    }
                    payload.truncate(prefix_len + new_value_len);
                    payload.extend_from_slice(b"...");
                    tracing::warn!(field = name, new_len = new_value_len, "halving oversize field");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The terminal zero-length datagram carrying the core file descriptor.
    pub fn send_core_fd(&self, fd: RawFd) -> Result<()> {
        self.send_datagram(&[], &[fd])
    }

    fn send_datagram(&self, bytes: &[u8], fds: &[RawFd]) -> Result<()> {
        let iov = [IoSlice::new(bytes)];
        let cmsgs = if fds.is_empty() {
            vec![]
        } else {
            vec![ControlMessage::ScmRights(fds)]
        };
        socket::sendmsg::<()>(self.0.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
            .map(|_| ())
            .map_err(|e| Error::Other(anyhow::anyhow!("sendmsg: {e}")))
    }

    /// Reads one datagram. Returns `(bytes, fd)` where `fd` is `Some` only for the terminal
    /// datagram (identified by the caller as the first zero-length read carrying exactly one
    /// `SCM_RIGHTS` descriptor).
    pub fn recv_datagram(&self, buf: &mut [u8]) -> Result<(Vec<u8>, Option<OwnedFd>)> {
        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);
        let msg = socket::recvmsg::<()>(
            self.0.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::empty(),
        )
        .map_err(|e| Error::Other(anyhow::anyhow!("recvmsg: {e}")))?;

        let mut fd = None;
        for cmsg in msg.cmsgs().map_err(|e| Error::Other(anyhow::anyhow!("{e}")))? {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                if fds.len() != 1 {
                    return Err(Error::BadMessage(format!(
                        "expected exactly one fd, got {}",
                        fds.len()
                    )));
                }
                fd = Some(unsafe { OwnedFd::from_raw_fd(fds[0]) });
            }
        }
        let n = msg.bytes;
        Ok((buf[..n].to_vec(), fd))
    }
}

fn is_msg_size(e: &anyhow::Error) -> bool {
    e.to_string().contains("EMSGSIZE") || e.to_string().contains("Message too long")
}

/// Parses one `NAME=VALUE` datagram payload, stripping a trailing `...` continuation marker
/// left over from the halving loop (the receiver doesn't need to reassemble fragments; the
/// truncated value with its marker is itself the value the spec says to store).
pub fn parse_field(payload: &[u8]) -> Option<(String, String)> {
    let s = String::from_utf8_lossy(payload);
    let (name, value) = s.split_once('=')?;
    Some((name.to_string(), value.to_string()))
}
