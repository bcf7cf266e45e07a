use crate::fsutil::write_atomic;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCacheEntry {
    pub identity: u64,
    pub name: String,
    /// Unix seconds of the successful lookup that produced `name`.
    pub fetched_at: u64,
}

/// An identity the name service refused to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidEntry {
    pub identity: u64,
    /// Unix seconds of the rejection.
    pub marked_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<NameCacheEntry>,
    #[serde(default)]
    invalid: Vec<InvalidEntry>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<u64, NameCacheEntry>,
    invalid: HashMap<u64, u64>,
    dirty: bool,
}

type Loaded = (HashMap<u64, NameCacheEntry>, HashMap<u64, u64>);

/// Identity -> name store shared by every resolution. All reads and writes
/// go through one lock, so concurrent batch merges cannot lose updates.
#[derive(Debug, Default)]
pub struct NameCache {
    path: Option<PathBuf>,
    state: Mutex<CacheState>,
}

impl NameCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the cache at `path`. A missing file starts empty; an unreadable
    /// or corrupt one is discarded with a warning and also starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (entries, invalid) = match read_cache_file(&path) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                debug!(path = %path.display(), "no name cache yet");
                Loaded::default()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "discarding unreadable name cache");
                Loaded::default()
            }
        };

        Self {
            path: Some(path),
            state: Mutex::new(CacheState {
                entries,
                invalid,
                dirty: false,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, identity: u64) -> Option<NameCacheEntry> {
        self.state.lock().entries.get(&identity).cloned()
    }

    /// Cached name when it was fetched no longer than `ttl` before `now`.
    pub fn fresh_name(&self, identity: u64, now: u64, ttl: Duration) -> Option<String> {
        let state = self.state.lock();
        let entry = state.entries.get(&identity)?;
        if now.saturating_sub(entry.fetched_at) <= ttl.as_secs() {
            Some(entry.name.clone())
        } else {
            None
        }
    }

    /// Stores `entry` unless an equally new or newer one is already cached.
    pub fn record(&self, entry: NameCacheEntry) -> bool {
        self.record_all([entry]) == 1
    }

    pub fn record_all(&self, entries: impl IntoIterator<Item = NameCacheEntry>) -> usize {
        let mut state = self.state.lock();
        let mut stored = 0;
        for entry in entries {
            let newer = state
                .entries
                .get(&entry.identity)
                .map_or(true, |existing| entry.fetched_at > existing.fetched_at);
            if newer {
                state.invalid.remove(&entry.identity);
                state.entries.insert(entry.identity, entry);
                stored += 1;
            }
        }
        if stored > 0 {
            state.dirty = true;
        }
        stored
    }

    /// Remembers that the name service rejected `identity` at `now`.
    pub fn mark_invalid(&self, identity: u64, now: u64) {
        let mut state = self.state.lock();
        let previous = state.invalid.insert(identity, now);
        if previous != Some(now) {
            state.dirty = true;
        }
    }

    /// True while a rejection of `identity` is no older than `ttl`.
    pub fn is_invalid(&self, identity: u64, now: u64, ttl: Duration) -> bool {
        self.state
            .lock()
            .invalid
            .get(&identity)
            .is_some_and(|marked_at| now.saturating_sub(*marked_at) <= ttl.as_secs())
    }

    pub fn invalid_count(&self) -> usize {
        self.state.lock().invalid.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Writes the cache to disk when it changed since the last flush.
    /// In-memory caches have nowhere to write and always succeed.
    pub fn flush_if_dirty(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(false);
        }

        let mut entries: Vec<NameCacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by_key(|entry| entry.identity);
        let mut invalid: Vec<InvalidEntry> = state
            .invalid
            .iter()
            .map(|(&identity, &marked_at)| InvalidEntry {
                identity,
                marked_at,
            })
            .collect();
        invalid.sort_by_key(|entry| entry.identity);
        let file = CacheFile {
            version: CACHE_VERSION,
            entries,
            invalid,
        };
        let raw = serde_json::to_vec_pretty(&file).context("serialize name cache")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create name cache dir")?;
        }
        write_atomic(path, &raw).context("write name cache")?;
        state.dirty = false;
        Ok(true)
    }
}

fn read_cache_file(path: &Path) -> Result<Option<Loaded>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context("read name cache"),
    };
    let file: CacheFile = serde_json::from_str(&raw).context("parse name cache")?;
    if file.version != CACHE_VERSION {
        anyhow::bail!("unsupported name cache version {}", file.version);
    }
    let entries: HashMap<u64, NameCacheEntry> = file
        .entries
        .into_iter()
        .filter(|entry| !entry.name.is_empty())
        .map(|entry| (entry.identity, entry))
        .collect();
    let invalid = file
        .invalid
        .into_iter()
        .filter(|entry| !entries.contains_key(&entry.identity))
        .map(|entry| (entry.identity, entry.marked_at))
        .collect();
    Ok(Some((entries, invalid)))
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(identity: u64, name: &str, fetched_at: u64) -> NameCacheEntry {
        NameCacheEntry {
            identity,
            name: name.to_string(),
            fetched_at,
        }
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = NameCache::load(dir.path().join("name_cache.json"));
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("name_cache.json");
        fs::write(&path, "{ not json").expect("seed");
        let cache = NameCache::load(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn flush_then_load_keeps_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/name_cache.json");
        let cache = NameCache::load(&path);
        cache.record_all([entry(10, "Alice", 1_000), entry(20, "Bob", 1_000)]);
        assert!(cache.flush_if_dirty().expect("flush"));
        assert!(!cache.flush_if_dirty().expect("second flush is a no-op"));

        let reloaded = NameCache::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(10), Some(entry(10, "Alice", 1_000)));
    }

    #[test]
    fn only_strictly_newer_fetches_replace_entries() {
        let cache = NameCache::in_memory();
        assert!(cache.record(entry(10, "Alice", 500)));
        assert!(!cache.record(entry(10, "Mallory", 500)));
        assert!(!cache.record(entry(10, "Mallory", 400)));
        assert!(cache.record(entry(10, "Alice Two", 600)));
        assert_eq!(cache.get(10).map(|entry| entry.name), Some("Alice Two".to_string()));
    }

    #[test]
    fn freshness_respects_ttl() {
        let cache = NameCache::in_memory();
        cache.record(entry(10, "Alice", 1_000));
        let ttl = Duration::from_secs(100);
        assert_eq!(cache.fresh_name(10, 1_100, ttl), Some("Alice".to_string()));
        assert_eq!(cache.fresh_name(10, 1_101, ttl), None);
        assert_eq!(cache.fresh_name(11, 1_000, ttl), None);
    }

    #[test]
    fn rejected_ids_persist_until_a_name_arrives() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("name_cache.json");
        let cache = NameCache::load(&path);
        cache.mark_invalid(4, 1_000);
        cache.flush_if_dirty().expect("flush");

        let reloaded = NameCache::load(&path);
        let ttl = Duration::from_secs(100);
        assert!(reloaded.is_invalid(4, 1_050, ttl));
        assert!(!reloaded.is_invalid(4, 1_101, ttl));
        assert!(!reloaded.is_invalid(5, 1_050, ttl));

        reloaded.record(entry(4, "Late Bloomer", 2_000));
        assert!(!reloaded.is_invalid(4, 2_000, ttl));
        assert_eq!(reloaded.invalid_count(), 0);
    }

    #[test]
    fn cache_files_without_invalid_section_still_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("name_cache.json");
        fs::write(
            &path,
            r#"{ "version": 1, "entries": [ { "identity": 1, "name": "A", "fetched_at": 5 } ] }"#,
        )
        .expect("seed");

        let cache = NameCache::load(&path);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalid_count(), 0);
    }

    #[test]
    fn in_memory_flush_is_noop() {
        let cache = NameCache::in_memory();
        cache.record(entry(1, "A", 1));
        assert!(!cache.flush_if_dirty().expect("flush"));
    }
}
