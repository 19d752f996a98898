use thiserror::Error;

/// Failure classes used throughout the ingestion pipeline.
///
/// Only [`Error::InvalidInvocation`], [`Error::LocalFatal`] and [`Error::BadMessage`] abort the
/// event they occur in; every other best-effort failure is logged and the pipeline continues
/// with a defined downgrade (see the module docs of the collaborator that produced it).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("local-fatal I/O error: {0}")]
    LocalFatal(#[from] std::io::Error),

    #[error("bad message on control socket: {0}")]
    BadMessage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
