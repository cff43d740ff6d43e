//! Store backends for the placement document.
//!
//! The registry owns exactly one [`ConfigStore`] and rewrites the whole
//! document on every mutation. Backends:
//!
//! - [`JsonFileStore`]: a single JSON file, replaced atomically
//! - [`RedbStore`]: the same document inside a redb database
//! - [`MemoryStore`]: in-process bytes, with a failure switch for tests

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableDatabase, ReadableTable, TableError};
use tracing::{debug, info};

use crate::document::{DocumentShape, RawState};
use crate::error::{StateError, StateResult};
use crate::tables::{DOCUMENT_KEY, PLACEMENTS};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Durable home of the placement document.
pub trait ConfigStore: Send + Sync {
    /// Read the document along with the shape it was stored in. A store
    /// that was never written loads as empty.
    fn load_document(&self) -> StateResult<(RawState, DocumentShape)>;

    /// Read the document.
    fn load(&self) -> StateResult<RawState> {
        self.load_document().map(|(state, _)| state)
    }

    /// Replace the document. Must be durable when this returns `Ok`.
    fn save(&self, state: &RawState) -> StateResult<()>;
}

fn decode(bytes: &[u8], origin: &str) -> StateResult<(RawState, DocumentShape)> {
    let (state, shape) = RawState::from_json(bytes)?;
    if shape == DocumentShape::Legacy {
        info!(%origin, hosts = state.hosts.len(), "migrated legacy placement document");
    }
    Ok((state, shape))
}

// ── JSON file ──────────────────────────────────────────────────────

/// Placement document stored as a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for JsonFileStore {
    fn load_document(&self) -> StateResult<(RawState, DocumentShape)> {
        match std::fs::read(&self.path) {
            Ok(bytes) => decode(&bytes, &self.path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no placement document yet");
                Ok((RawState::new(), DocumentShape::Empty))
            }
            Err(e) => Err(StateError::Io(e.to_string())),
        }
    }

    fn save(&self, state: &RawState) -> StateResult<()> {
        let bytes = state.to_json()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(map_err!(Io))?;
        }
        // Write and sync beside the target, rename over it, then sync the
        // directory so the rename itself survives a crash.
        let tmp = self.temp_path();
        let mut file = File::create(&tmp).map_err(map_err!(Io))?;
        file.write_all(&bytes).map_err(map_err!(Io))?;
        file.sync_all().map_err(map_err!(Io))?;
        drop(file);
        std::fs::rename(&tmp, &self.path).map_err(map_err!(Io))?;
        sync_dir(&self.path)?;
        debug!(path = ?self.path, hosts = state.hosts.len(), "placement document saved");
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> StateResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(map_err!(Io))
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> StateResult<()> {
    Ok(())
}

// ── redb ───────────────────────────────────────────────────────────

/// Placement document stored in a redb database.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "redb placement store opened");
        Ok(store)
    }

    /// Open an existing database without creating or modifying it.
    pub fn open_existing(path: &Path) -> StateResult<Self> {
        let db = Database::open(path).map_err(map_err!(Open))?;
        debug!(?path, "redb placement store opened for reading");
        Ok(Self { db: Arc::new(db) })
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PLACEMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl ConfigStore for RedbStore {
    fn load_document(&self) -> StateResult<(RawState, DocumentShape)> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = match txn.open_table(PLACEMENTS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok((RawState::new(), DocumentShape::Empty)),
            Err(e) => return Err(StateError::Table(e.to_string())),
        };
        match table.get(DOCUMENT_KEY).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value(), "redb"),
            None => Ok((RawState::new(), DocumentShape::Empty)),
        }
    }

    fn save(&self, state: &RawState) -> StateResult<()> {
        let bytes = state.to_json()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PLACEMENTS).map_err(map_err!(Table))?;
            table
                .insert(DOCUMENT_KEY, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(hosts = state.hosts.len(), "placement document committed");
        Ok(())
    }
}

// ── In-memory ──────────────────────────────────────────────────────

/// In-process store holding the canonical document bytes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bytes: Mutex<Option<Vec<u8>>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing serialized document.
    pub fn with_document(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail with [`StateError::Write`].
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Current document bytes, if any were written.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ConfigStore for MemoryStore {
    fn load_document(&self) -> StateResult<(RawState, DocumentShape)> {
        match self.bytes() {
            Some(bytes) => decode(&bytes, "memory"),
            None => Ok((RawState::new(), DocumentShape::Empty)),
        }
    }

    fn save(&self, state: &RawState) -> StateResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StateError::Write("memory store is failing saves".to_string()));
        }
        let bytes = state.to_json()?;
        *self
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<S: ConfigStore + ?Sized> ConfigStore for Arc<S> {
    fn load_document(&self) -> StateResult<(RawState, DocumentShape)> {
        (**self).load_document()
    }

    fn load(&self) -> StateResult<RawState> {
        (**self).load()
    }

    fn save(&self, state: &RawState) -> StateResult<()> {
        (**self).save(state)
    }
}
