//! Durable key-value storage for the state document.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// String values stored under string keys.
pub trait Storage {
    /// The stored value, or `None` when nothing was ever written.
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, contents: &str) -> Result<()>;
}

/// One `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(anyhow!("invalid storage key '{key}'"));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => {
                debug!(path = %path.display(), bytes = contents.len(), "read stored state");
                Ok(Some(contents))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Atomic write (temp file + rename).
    fn write(&self, key: &str, contents: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, contents)
            .with_context(|| format!("write temp state {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace state {}", path.display()))?;
        debug!(path = %path.display(), bytes = contents.len(), "wrote stored state");
        Ok(())
    }
}

/// In-process storage. Clones share the same entries, so a test can keep a
/// handle after giving one to a store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
    fail_writes: Rc<Cell<bool>>,
    writes: Rc<Cell<usize>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, contents: &str) -> Self {
        let storage = Self::new();
        storage
            .entries
            .borrow_mut()
            .insert(key.to_string(), contents.to_string());
        storage
    }

    /// Make every later write fail, as a full or read-only disk would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    fn write(&self, key: &str, contents: &str) -> Result<()> {
        if self.fail_writes.get() {
            return Err(anyhow!("storage unavailable for '{key}'"));
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), contents.to_string());
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_reads_back_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(temp.path().join("state"));
        assert_eq!(storage.read("4.state").expect("read"), None);
        storage.write("4.state", "{\"$a\":1}").expect("write");
        assert_eq!(
            storage.read("4.state").expect("read").as_deref(),
            Some("{\"$a\":1}")
        );
        assert!(temp.path().join("state/4.state.json").exists());
        assert!(!temp.path().join("state/4.state.json.tmp").exists());
    }

    #[test]
    fn file_storage_rejects_path_keys() {
        let storage = FileStorage::new("unused");
        assert!(storage.path_for("../x").is_err());
        assert!(storage.path_for("").is_err());
        assert!(storage.write("a/b", "{}").is_err());
    }

    #[test]
    fn memory_storage_shares_entries_between_clones() {
        let storage = MemoryStorage::new();
        let handle = storage.clone();
        storage.write("k", "v").expect("write");
        assert_eq!(handle.get("k").as_deref(), Some("v"));
        assert_eq!(handle.writes(), 1);

        handle.fail_writes(true);
        assert!(storage.write("k", "w").is_err());
        assert_eq!(handle.get("k").as_deref(), Some("v"));
    }
}
