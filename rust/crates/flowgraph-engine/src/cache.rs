//! Pluggable content-addressed cache of prior successful step outcomes.

use crate::step::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Current on-disk/in-memory payload format. Bumped whenever
/// `CachedResult`'s shape changes in a way older readers can't parse.
const SCHEMA_VERSION: u32 = 1;

/// Whether a cached entry represents a successful execution or a skip
/// decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachedStatus {
    Success,
    Skipped,
}

/// A persisted step outcome. Only successful and skipped outcomes are
/// ever written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub schema_version: u32,
    pub output: Option<Value>,
    pub status: CachedStatus,
}

impl CachedResult {
    pub fn success(output: Value) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            output: Some(output),
            status: CachedStatus::Success,
        }
    }

    pub fn skipped() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            output: None,
            status: CachedStatus::Skipped,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == CachedStatus::Skipped
    }
}

/// Base contract every cache backend implements. Keys are opaque strings;
/// implementations may normalize them (e.g. by hashing) internally.
pub trait Cache: Send + Sync {
    fn exists(&self, key: &str) -> bool;
    fn read(&self, key: &str) -> Option<CachedResult>;
    fn write(&self, key: &str, value: CachedResult);
    fn delete(&self, key: &str);
    fn clear(&self);
}

/// In-process cache, lost on exit. Guards its map with a `Mutex` so
/// disjoint-key writes from concurrent workers within one run are safe.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CachedResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryStore {
    fn exists(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    fn read(&self, key: &str) -> Option<CachedResult> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn write(&self, key: &str, value: CachedResult) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Filesystem-backed cache. One file per key, named
/// `<sha256-hex(key)>.cache`, holding the JSON-serialized `CachedResult`.
/// Cross-process access is not locked; last-writer-wins is accepted
/// because cache contents are idempotent by construction.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if absent) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hex::encode(hasher.finalize());
        self.root.join(format!("{digest}.cache"))
    }

    fn read_file(&self, path: &Path) -> Option<CachedResult> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice::<CachedResult>(&bytes) {
            Ok(entry) if entry.schema_version == SCHEMA_VERSION => Some(entry),
            Ok(entry) => {
                warn!(
                    found = entry.schema_version,
                    expected = SCHEMA_VERSION,
                    "cache entry schema version skew, treating as miss"
                );
                None
            }
            Err(err) => {
                warn!(error = %err, "corrupted cache entry, treating as miss");
                None
            }
        }
    }
}

impl Cache for FileStore {
    fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    fn read(&self, key: &str) -> Option<CachedResult> {
        self.read_file(&self.path_for(key))
    }

    fn write(&self, key: &str, value: CachedResult) {
        let path = self.path_for(key);
        let Ok(bytes) = serde_json::to_vec(&value) else {
            warn!(key, "failed to serialize cache entry, skipping write");
            return;
        };
        // Write-then-rename so a reader never observes a partial file.
        let tmp_path = path.with_extension("cache.tmp");
        if fs::write(&tmp_path, &bytes).is_ok() {
            if let Err(err) = fs::rename(&tmp_path, &path) {
                warn!(error = %err, "failed to finalize cache entry");
                let _ = fs::remove_file(&tmp_path);
            } else {
                debug!(key, "wrote cache entry");
            }
        }
    }

    fn delete(&self, key: &str) {
        // No-op on a missing key.
        let _ = fs::remove_file(self.path_for(key));
    }

    fn clear(&self) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("cache") {
                let _ = fs::remove_file(path);
            }
        }
    }
}
