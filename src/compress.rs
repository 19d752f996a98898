//! Optional compression of the external core file.
//!
//! systemd-coredump picks among whichever of zstd/xz/lz4 was compiled in; this crate carries
//! only zstd (the teacher's standard choice for this exact kind of payload, see e.g.
//! `datadog-profiling`), which is what `Compressor::Zstd` names. Any failure during compression
//! falls back to the uncompressed file per the spec's step 8 downgrade.

pub const SUFFIX: &str = ".zst";

/// Streams `src` through zstd into `dst`, returning the compressed size in bytes. Leaves
/// `dst`'s contents unspecified on error; callers must discard it and fall back to the
/// uncompressed original.
pub fn compress(src: &mut std::fs::File, dst: &std::fs::File) -> std::io::Result<u64> {
    use std::io::{Read, Seek, SeekFrom, Write};
    src.seek(SeekFrom::Start(0))?;
    let mut encoder = zstd::stream::Encoder::new(dst, 0)?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n])?;
    }
    encoder.finish()?;
    dst.metadata().map(|m| m.len())
}
