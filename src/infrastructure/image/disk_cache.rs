//! Disk-based image cache for persistence across sessions.

use std::fs::{self, FileTimes, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheError, CacheResult, DiskCachePort, ExpirationReport};

const DATA_EXTENSION: &str = "img";
const EXTENDED_EXTENSION: &str = "meta";

/// Which file timestamp ages a disk entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskExpireType {
    /// Last read; reads refresh it.
    AccessDate,
    /// Last write.
    #[default]
    ModificationDate,
}

/// Limits applied by [`DiskCache::remove_expired`]. Zero or `None` disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskLimits {
    /// Entries older than this are removed.
    pub max_age: Option<Duration>,
    /// Total byte budget.
    pub max_bytes: u64,
    /// Entry count budget.
    pub max_count: usize,
    /// Timestamp used for age and eviction order.
    pub expire_type: DiskExpireType,
}

struct DiskEntry {
    path: PathBuf,
    size: u64,
    stamp: SystemTime,
}

/// Disk-based image cache storing one file per key.
///
/// Files are named by the key's hash. The directory is created on demand, so
/// a deleted root is recreated by the next write.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    limits: DiskLimits,
}

impl DiskCache {
    /// Creates a cache rooted at `root`. Nothing touches the filesystem yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, limits: DiskLimits) -> Self {
        Self {
            root: root.into(),
            limits,
        }
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}.{DATA_EXTENSION}", key.hashed()))
    }

    fn extended_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENDED_EXTENSION}", key.hashed()))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> CacheResult<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {e}")))?;
        let mut file = NamedTempFile::new_in(&self.root)
            .map_err(|e| CacheError::Io(format!("Failed to create cache file: {e}")))?;
        file.write_all(data)
            .map_err(|e| CacheError::Io(format!("Failed to write cache file: {e}")))?;
        file.persist(path)
            .map_err(|e| CacheError::Io(format!("Failed to persist cache file: {e}")))?;
        Ok(())
    }

    fn touch(path: &Path) {
        let result = OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_times(FileTimes::new().set_accessed(SystemTime::now())));
        if let Err(e) = result {
            trace!(path = %path.display(), error = %e, "Failed to refresh access time");
        }
    }

    fn remove_file(path: &Path) -> CacheResult<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn scan(&self) -> CacheResult<Vec<DiskEntry>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Io(format!("Failed to read cache dir: {e}"))),
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != DATA_EXTENSION) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let stamp = match self.limits.expire_type {
                DiskExpireType::AccessDate => meta.accessed(),
                DiskExpireType::ModificationDate => meta.modified(),
            }
            .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(DiskEntry {
                path,
                size: meta.len(),
                stamp,
            });
        }
        Ok(files)
    }

    fn remove_entry(entry: &DiskEntry) -> bool {
        if let Err(e) = fs::remove_file(&entry.path) {
            warn!(path = %entry.path.display(), error = %e, "Failed to remove cache file");
            return false;
        }
        let _ = Self::remove_file(&entry.path.with_extension(EXTENDED_EXTENSION));
        true
    }
}

impl DiskCachePort for DiskCache {
    fn contains(&self, key: &CacheKey) -> bool {
        self.data_path(key).try_exists().unwrap_or(false)
    }

    fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let path = self.data_path(key);
        if let Ok(bytes) = fs::read(&path) {
            trace!(key = %key, path = %path.display(), "Disk cache hit");
            if self.limits.expire_type == DiskExpireType::AccessDate {
                Self::touch(&path);
            }
            Some(Bytes::from(bytes))
        } else {
            trace!(key = %key, "Disk cache miss");
            None
        }
    }

    fn put(&self, key: &CacheKey, data: &[u8]) -> CacheResult<()> {
        let path = self.data_path(key);
        self.write_atomic(&path, data)?;
        debug!(key = %key, path = %path.display(), size = data.len(), "Stored image in disk cache");
        Ok(())
    }

    fn get_extended(&self, key: &CacheKey) -> Option<Bytes> {
        fs::read(self.extended_path(key)).ok().map(Bytes::from)
    }

    fn put_extended(&self, key: &CacheKey, data: Option<&[u8]>) -> CacheResult<()> {
        let path = self.extended_path(key);
        match data {
            Some(data) => self.write_atomic(&path, data),
            None => Self::remove_file(&path),
        }
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        Self::remove_file(&self.data_path(key))?;
        Self::remove_file(&self.extended_path(key))?;
        debug!(key = %key, "Removed from disk cache");
        Ok(())
    }

    fn remove_all(&self) -> CacheResult<()> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                Err(CacheError::Io(format!("Failed to clear cache dir: {e}")))
            }
            _ => {
                debug!(root = %self.root.display(), "Cleared disk cache");
                Ok(())
            }
        }
    }

    fn remove_expired(&self) -> CacheResult<ExpirationReport> {
        let now = SystemTime::now();
        let mut report = ExpirationReport::default();
        let mut live = Vec::new();

        for entry in self.scan()? {
            let age = now.duration_since(entry.stamp).unwrap_or(Duration::ZERO);
            let expired = self.limits.max_age.is_some_and(|max_age| age > max_age);
            if expired && Self::remove_entry(&entry) {
                report.expired += 1;
                report.freed_bytes += entry.size;
            } else {
                live.push(entry);
            }
        }

        let mut total_size: u64 = live.iter().map(|e| e.size).sum();
        let mut total_count = live.len();
        let over = |size: u64, count: usize| {
            (self.limits.max_bytes > 0 && size > self.limits.max_bytes)
                || (self.limits.max_count > 0 && count > self.limits.max_count)
        };

        if over(total_size, total_count) {
            live.sort_by_key(|e| e.stamp);
            for entry in &live {
                if !over(total_size, total_count) {
                    break;
                }
                if Self::remove_entry(entry) {
                    total_size -= entry.size;
                    total_count -= 1;
                    report.evicted += 1;
                    report.freed_bytes += entry.size;
                }
            }
        }

        debug!(
            expired = report.expired,
            evicted = report.evicted,
            freed_bytes = report.freed_bytes,
            "Disk cache expiration complete"
        );
        Ok(report)
    }

    fn path_for_key(&self, key: &CacheKey) -> Option<PathBuf> {
        Some(self.data_path(key))
    }

    fn total_count(&self) -> usize {
        self.scan().map(|files| files.len()).unwrap_or(0)
    }

    fn total_size(&self) -> u64 {
        self.scan()
            .map(|files| files.iter().map(|e| e.size).sum())
            .unwrap_or(0)
    }
}

/// Returns the default cache directory for `namespace`.
#[must_use]
pub fn default_cache_root(namespace: &str) -> PathBuf {
    directories::ProjectDirs::from("io", "webimage", "webimage").map_or_else(
        || {
            std::env::temp_dir()
                .join("webimage")
                .join("cache")
                .join("images")
                .join(namespace)
        },
        |dirs| dirs.cache_dir().join("images").join(namespace),
    )
}
