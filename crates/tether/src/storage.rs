// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable key-value storage backing the token store.
//!
//! The contract mirrors browser local storage: synchronous, string-valued,
//! `get`/`set`/`remove`. Two backends ship with the crate: [`MemoryStore`]
//! for tests and embedders that manage persistence themselves, and
//! [`FileStore`], which keeps a JSON object on disk and rewrites it
//! atomically (write tmp + rename) on every mutation. Batched writes land in
//! a single rewrite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Synchronous string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// Write several entries. Backends that can should land them together;
    /// the default writes one at a time and stops at the first error.
    fn set_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Remove several keys, with the same contract as [`set_many`](Self::set_many).
    fn remove_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Process-local storage. Contents are lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert((*key).to_owned(), (*value).to_owned());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        let mut map = self.entries.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// JSON-file storage. Reads are served from memory; every write rewrites the
/// whole file atomically.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and also starts empty; the next write replaces it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<BTreeMap<String, String>>(&data) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), "failed to parse session file: {e}");
                    BTreeMap::new()
                }
            },
            Err(e) => {
                debug!(path = %path.display(), "no session file: {e}");
                BTreeMap::new()
            }
        };
        Self { path, entries: Mutex::new(entries) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        f(&mut next);
        save(&self.path, &next)?;
        *entries = next;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.mutate(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.remove_many(&[key])
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        self.mutate(|map| {
            for (key, value) in entries {
                map.insert((*key).to_owned(), (*value).to_owned());
            }
        })
    }

    /// One rewrite for the whole batch; none when no key is present.
    fn remove_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        if !keys.iter().any(|key| self.entries.lock().contains_key(*key)) {
            return Ok(());
        }
        self.mutate(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
    }
}

/// Write `entries` to `path` atomically.
///
/// Uses a unique temp filename (PID + counter) so two writers never share a
/// `.tmp` file.
fn save(path: &Path, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(entries)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), keys = entries.len(), "persisted session file");
    Ok(())
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
