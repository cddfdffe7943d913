//! Persisted usage ledger.
//!
//! The ledger is read, modified and written back as a whole. There is no
//! internal locking: at most one reconciliation may run against a store at
//! a time, and callers are responsible for serializing access.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::error::UsageError;
use crate::models::Ledger;

pub const DEFAULT_LEDGER_PATH: &str = "./warden_usages.json";

pub trait LedgerStore {
    fn load(&self) -> Result<Ledger, UsageError>;
    fn save(&self, ledger: &Ledger) -> Result<(), UsageError>;
}

/// JSON document on local disk: `{identity: {up, down, last_usage?}}`.
///
/// A missing file loads as an empty ledger. A file that exists but does not
/// parse is a hard error; it is never replaced with an empty ledger.
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> UsageError {
        UsageError::LedgerIo {
            path: self.path.clone(),
            source,
        }
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load(&self) -> Result<Ledger, UsageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No usage ledger at {}, starting empty", self.path.display());
                return Ok(Ledger::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        serde_json::from_str(&raw).map_err(|source| UsageError::LedgerCorrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, ledger: &Ledger) -> Result<(), UsageError> {
        let json = serde_json::to_vec(ledger).map_err(UsageError::LedgerEncode)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        // Write beside the target, then rename over it.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        debug!("💾 Usage ledger saved to {} ({} entries)", self.path.display(), ledger.len());
        Ok(())
    }
}

/// Ledger kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: Mutex<Ledger>,
}

impl InMemoryLedgerStore {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Mutex::new(ledger),
        }
    }

    pub fn snapshot(&self) -> Ledger {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn load(&self) -> Result<Ledger, UsageError> {
        Ok(self.snapshot())
    }

    fn save(&self, ledger: &Ledger) -> Result<(), UsageError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = ledger.clone();
        Ok(())
    }
}
