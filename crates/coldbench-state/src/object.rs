//! Object store backends.
//!
//! An object store maps slash-separated paths to byte blobs. Both backends
//! implement the same operations; `put_if_absent` is atomic in each, and
//! `put_if_present` never resurrects an object a concurrent `delete` removed.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::OBJECTS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Durable key → blob storage.
pub trait ObjectStore: Send + Sync {
    fn get(&self, path: &str) -> StateResult<Option<Vec<u8>>>;

    /// Insert or overwrite.
    fn put(&self, path: &str, value: &[u8]) -> StateResult<()>;

    /// Insert only if nothing exists at `path`. Returns whether it was written.
    fn put_if_absent(&self, path: &str, value: &[u8]) -> StateResult<bool>;

    /// Overwrite only if an object exists at `path`. Returns whether it was written.
    fn put_if_present(&self, path: &str, value: &[u8]) -> StateResult<bool>;

    /// Returns true if the object existed.
    fn delete(&self, path: &str) -> StateResult<bool>;

    /// All paths starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> StateResult<Vec<String>>;
}

/// Reject empty, relative-escape, and hidden path segments.
fn validate_path(path: &str) -> StateResult<()> {
    let ok = !path.is_empty()
        && path.split('/').all(|seg| {
            !seg.is_empty()
                && !seg.starts_with('.')
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
    if ok {
        Ok(())
    } else {
        Err(StateError::InvalidPath(path.to_string()))
    }
}

// ── redb ──────────────────────────────────────────────────────────

/// Object store in a single redb database.
#[derive(Clone)]
pub struct RedbObjectStore {
    db: Arc<Database>,
}

impl RedbObjectStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "redb object store opened");
        Ok(store)
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
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl ObjectStore for RedbObjectStore {
    fn get(&self, path: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let value = table
            .get(path)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn put(&self, path: &str, value: &[u8]) -> StateResult<()> {
        validate_path(path)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            table.insert(path, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, bytes = value.len(), "object stored");
        Ok(())
    }

    fn put_if_absent(&self, path: &str, value: &[u8]) -> StateResult<bool> {
        validate_path(path)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            if table.get(path).map_err(map_err!(Read))?.is_some() {
                inserted = false;
            } else {
                table.insert(path, value).map_err(map_err!(Write))?;
                inserted = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, inserted, "conditional object write");
        Ok(inserted)
    }

    fn put_if_present(&self, path: &str, value: &[u8]) -> StateResult<bool> {
        validate_path(path)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let replaced;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            replaced = table.get(path).map_err(map_err!(Read))?.is_some();
            if replaced {
                table.insert(path, value).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, replaced, "conditional object replace");
        Ok(replaced)
    }

    fn delete(&self, path: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            existed = table.remove(path).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, existed, "object deleted");
        Ok(existed)
    }

    fn list(&self, prefix: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(key.value().to_string());
            }
        }
        Ok(results)
    }
}

// ── Filesystem ────────────────────────────────────────────────────

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Serializes `put_if_present` against `delete` for every filesystem store
/// in this process. Other processes sharing the root are not covered.
static REPLACE_LOCK: Mutex<()> = Mutex::new(());

fn replace_lock() -> StateResult<MutexGuard<'static, ()>> {
    REPLACE_LOCK
        .lock()
        .map_err(|_| StateError::Write("object replace lock poisoned".into()))
}

/// Object store laid out as a directory tree. Object paths map directly to
/// files below `root`, so a shared volume lets several processes use it.
#[derive(Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn open(root: &Path) -> StateResult<Self> {
        fs::create_dir_all(root).map_err(map_err!(Open))?;
        debug!(?root, "filesystem object store opened");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn file_path(&self, path: &str) -> StateResult<PathBuf> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    /// Write `value` into a hidden temp file next to `dest`.
    fn write_temp(&self, dest: &Path, value: &[u8]) -> StateResult<PathBuf> {
        let parent = dest
            .parent()
            .ok_or_else(|| StateError::InvalidPath(dest.display().to_string()))?;
        fs::create_dir_all(parent).map_err(map_err!(Write))?;
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(
            ".{name}.tmp-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, value).map_err(map_err!(Write))?;
        Ok(tmp)
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, path: &str) -> StateResult<Option<Vec<u8>>> {
        let file = self.file_path(path)?;
        match fs::read(&file) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Read(e.to_string())),
        }
    }

    fn put(&self, path: &str, value: &[u8]) -> StateResult<()> {
        let dest = self.file_path(path)?;
        let tmp = self.write_temp(&dest, value)?;
        fs::rename(&tmp, &dest).map_err(map_err!(Write))?;
        debug!(%path, bytes = value.len(), "object stored");
        Ok(())
    }

    fn put_if_absent(&self, path: &str, value: &[u8]) -> StateResult<bool> {
        let dest = self.file_path(path)?;
        let tmp = self.write_temp(&dest, value)?;
        // hard_link refuses to replace an existing file, and readers never
        // observe a partially written object.
        let result = fs::hard_link(&tmp, &dest);
        let _ = fs::remove_file(&tmp);
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StateError::Write(e.to_string())),
        }
    }

    fn put_if_present(&self, path: &str, value: &[u8]) -> StateResult<bool> {
        let dest = self.file_path(path)?;
        let _guard = replace_lock()?;
        if !dest.is_file() {
            return Ok(false);
        }
        let tmp = self.write_temp(&dest, value)?;
        fs::rename(&tmp, &dest).map_err(map_err!(Write))?;
        debug!(%path, bytes = value.len(), "object replaced");
        Ok(true)
    }

    fn delete(&self, path: &str) -> StateResult<bool> {
        let file = self.file_path(path)?;
        let _guard = replace_lock()?;
        match fs::remove_file(&file) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::Write(e.to_string())),
        }
    }

    fn list(&self, prefix: &str) -> StateResult<Vec<String>> {
        // Only the directory holding the prefix's last segment can match.
        let start = match prefix.rfind('/') {
            Some(i) => self.file_path(&prefix[..i])?,
            None => self.root.clone(),
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in walkdir::WalkDir::new(&start).min_depth(1) {
            let entry = entry.map_err(map_err!(Read))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if key.iter().any(|seg| seg.starts_with('.')) {
                continue;
            }
            let key = key.join("/");
            if key.starts_with(prefix) {
                results.push(key);
            }
        }
        results.sort();
        Ok(results)
    }
}
