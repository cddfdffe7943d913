use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("usage ledger at {path} is corrupt: {source}")]
    LedgerCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("usage ledger at {path} could not be accessed: {source}")]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("usage ledger could not be serialized: {0}")]
    LedgerEncode(#[source] serde_json::Error),

    #[error("usage report at {path} could not be read: {source}")]
    SourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("user directory unavailable: {0}")]
    Directory(#[source] anyhow::Error),
}

/// One rejected line of the external usage report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("usage report line {line}: {reason} ({content:?})")]
pub struct ParseError {
    pub line: usize,
    pub content: String,
    pub reason: String,
}
