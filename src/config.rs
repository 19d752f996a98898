//! The configuration record and its `[Coredump]`-section loader.
//!
//! The loader is a thin, best-effort TOML reader: a missing file is not an error (all defaults
//! apply), only a malformed one is. Mirrors the teacher's `CrashtrackerConfiguration`: an
//! explicit value type with named getters, built once and handed to every component by
//! reference, never touched again.

use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_STORAGE_DIR: &str = "/var/lib/systemd/coredump";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/systemd/coredump.conf";

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    None,
    External,
    Journal,
}

impl Default for Storage {
    fn default() -> Self {
        Storage::External
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawCoredumpSection {
    storage: Storage,
    compress: bool,
    process_size_max: Option<u64>,
    external_size_max: Option<u64>,
    journal_size_max: Option<u64>,
    keep_free: Option<u64>,
    max_use: Option<u64>,
    log_level: String,
    storage_dir: String,
}

impl Default for RawCoredumpSection {
    fn default() -> Self {
        let d = Configuration::default();
        RawCoredumpSection {
            storage: d.storage,
            compress: d.compress,
            process_size_max: Some(d.process_size_max),
            external_size_max: Some(d.external_size_max),
            journal_size_max: Some(d.journal_size_max),
            keep_free: d.keep_free,
            max_use: d.max_use,
            log_level: d.log_level,
            storage_dir: d.storage_dir,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(rename = "Coredump", default)]
    coredump: RawCoredumpSection,
}

/// The populated configuration record passed by reference to every pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub storage: Storage,
    pub compress: bool,
    pub process_size_max: u64,
    pub external_size_max: u64,
    pub journal_size_max: u64,
    pub keep_free: Option<u64>,
    pub max_use: Option<u64>,
    pub log_level: String,
    pub storage_dir: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            storage: Storage::External,
            compress: true,
            process_size_max: 2 * GIB,
            external_size_max: 2 * GIB,
            journal_size_max: 767 * MIB,
            keep_free: None,
            max_use: None,
            log_level: "info".to_string(),
            storage_dir: DEFAULT_STORAGE_DIR.to_string(),
        }
    }
}

impl Configuration {
    /// The ceiling applied while ingesting the core into the working copy: the resource limit
    /// the kernel reported, further capped by whichever storage maximum applies.
    pub fn ingest_max(&self, rlimit: u64) -> u64 {
        let storage_max = if self.storage == Storage::External {
            self.external_size_max
        } else {
            self.journal_size_max
        };
        rlimit.min(self.process_size_max.max(storage_max))
    }
}

/// Loads the `[Coredump]` section from `path`. A missing file yields [`Configuration::default`];
/// a present-but-malformed file is an error.
pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Configuration> {
    let path = path.as_ref();
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Configuration::default());
        }
        Err(e) => return Err(e).map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display())),
    };
    let parsed: RawFile =
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    let c = parsed.coredump;
    let d = Configuration::default();
    Ok(Configuration {
        storage: c.storage,
        compress: c.compress,
        process_size_max: c.process_size_max.unwrap_or(d.process_size_max),
        external_size_max: c.external_size_max.unwrap_or(d.external_size_max),
        journal_size_max: c.journal_size_max.unwrap_or(d.journal_size_max),
        keep_free: c.keep_free,
        max_use: c.max_use,
        log_level: c.log_level,
        storage_dir: c.storage_dir,
    })
}
