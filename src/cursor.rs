//! Durable sync cursor.
//!
//! The cursor is an opaque high-water mark handed out by the upstream. It is
//! persisted after every page that made it into the warehouse, so a restart
//! resumes from the last committed page.

use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Cursor used when nothing has been synced yet.
pub const BEGINNING: &str = "1900-01-01";

/// Opaque high-water mark.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncCursor(String);

impl SyncCursor {
    /// Wrap a cursor value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The sentinel that fetches everything.
    pub fn beginning() -> Self {
        Self(BEGINNING.to_string())
    }

    /// Cursor value as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self::beginning()
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for the sync cursor.
pub trait CursorStore: Send + Sync {
    /// Load the last persisted cursor, `None` if none was ever saved.
    fn load(&self) -> Result<Option<SyncCursor>>;

    /// Persist a cursor, replacing the previous one.
    fn save(&self, cursor: &SyncCursor) -> Result<()>;

    /// Load the cursor or fall back to the beginning.
    fn load_or_beginning(&self) -> Result<SyncCursor> {
        Ok(self.load()?.unwrap_or_else(SyncCursor::beginning))
    }
}

/// Cursor kept in a single text file.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    /// Store the cursor at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cursor file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<Option<SyncCursor>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let value = contents.trim();
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(SyncCursor::new(value)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn save(&self, cursor: &SyncCursor) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write then rename so a crash never leaves a torn cursor behind.
        let tmp = self.temp_path();
        fs::write(&tmp, cursor.as_str())?;
        fs::rename(&tmp, &self.path)?;

        debug!(cursor = %cursor, path = %self.path.display(), "Saved sync cursor");
        Ok(())
    }
}

/// Cursor kept in process memory; every restart begins from the sentinel.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: std::sync::Mutex<Option<SyncCursor>>,
}

impl MemoryCursorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `cursor`.
    pub fn with_cursor(cursor: SyncCursor) -> Self {
        Self {
            cursor: std::sync::Mutex::new(Some(cursor)),
        }
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<Option<SyncCursor>> {
        let guard = self
            .cursor
            .lock()
            .map_err(|_| Error::sync("Cursor lock poisoned", 0))?;
        Ok(guard.clone())
    }

    fn save(&self, cursor: &SyncCursor) -> Result<()> {
        let mut guard = self
            .cursor
            .lock()
            .map_err(|_| Error::sync("Cursor lock poisoned", 0))?;
        *guard = Some(cursor.clone());
        Ok(())
    }
}
