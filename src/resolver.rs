use crate::{
    error::LookupError,
    name_cache::{unix_now, NameCache, NameCacheEntry},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};

/// The name service refuses batches larger than this.
pub const MAX_BATCH_SIZE: usize = 1000;

/// One `{id, name}` pair returned by the name service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedId {
    pub id: u64,
    pub name: String,
}

/// A single batched remote lookup. Ids missing from the returned list are
/// unresolved; they are not an error.
pub trait NameLookup: Send + Sync {
    fn lookup(&self, ids: &[u64]) -> Result<Vec<NamedId>, LookupError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "name", rename_all = "snake_case")]
pub enum CharacterName {
    Resolved(String),
    Unknown,
}

impl CharacterName {
    pub fn display(&self, identity: u64) -> String {
        match self {
            CharacterName::Resolved(name) => name.clone(),
            CharacterName::Unknown => format!("Unknown {identity}"),
        }
    }

    pub fn as_resolved(&self) -> Option<&str> {
        match self {
            CharacterName::Resolved(name) => Some(name),
            CharacterName::Unknown => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub parallel_batches: usize,
    pub cache_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            max_attempts: 3,
            parallel_batches: 4,
            cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub requested: usize,
    pub cache_hits: usize,
    /// Ids answered `Unknown` locally because the service rejected them recently.
    pub known_invalid: usize,
    pub fetched: usize,
    pub unresolved: usize,
    pub remote_calls: usize,
    pub failed_batches: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub names: BTreeMap<u64, CharacterName>,
    pub report: ResolutionReport,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    found: Vec<NamedId>,
    calls: usize,
    failed: usize,
}

impl BatchOutcome {
    fn absorb(&mut self, other: BatchOutcome) {
        self.found.extend(other.found);
        self.calls += other.calls;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct NameResolver {
    lookup: Arc<dyn NameLookup>,
    settings: ResolverSettings,
}

impl NameResolver {
    pub fn new(lookup: Arc<dyn NameLookup>, mut settings: ResolverSettings) -> Self {
        settings.batch_size = settings.batch_size.clamp(1, MAX_BATCH_SIZE);
        settings.max_attempts = settings.max_attempts.max(1);
        settings.parallel_batches = settings.parallel_batches.max(1);
        Self { lookup, settings }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Names already in the cache, fresh or not. Never calls the service.
    pub fn cached_names(
        &self,
        identities: &BTreeSet<u64>,
        cache: &NameCache,
    ) -> BTreeMap<u64, CharacterName> {
        identities
            .iter()
            .map(|&identity| {
                let name = cache
                    .get(identity)
                    .map(|entry| CharacterName::Resolved(entry.name))
                    .unwrap_or(CharacterName::Unknown);
                (identity, name)
            })
            .collect()
    }

    pub fn resolve(&self, identities: &BTreeSet<u64>, cache: &NameCache) -> Resolution {
        self.resolve_at(identities, cache, unix_now())
    }

    /// Answers fresh cache hits and recently rejected ids locally and looks
    /// up every other id in batches of at most `batch_size`. A failed batch
    /// leaves its ids `Unknown` and never touches the cache.
    pub fn resolve_at(&self, identities: &BTreeSet<u64>, cache: &NameCache, now: u64) -> Resolution {
        let mut resolution = Resolution::default();
        resolution.report.requested = identities.len();

        let mut misses = Vec::new();
        for &identity in identities {
            match cache.fresh_name(identity, now, self.settings.cache_ttl) {
                Some(name) => {
                    resolution
                        .names
                        .insert(identity, CharacterName::Resolved(name));
                    resolution.report.cache_hits += 1;
                }
                None if cache.is_invalid(identity, now, self.settings.cache_ttl) => {
                    resolution.names.insert(identity, CharacterName::Unknown);
                    resolution.report.known_invalid += 1;
                    resolution.report.unresolved += 1;
                }
                None => misses.push(identity),
            }
        }

        if misses.is_empty() {
            debug!(
                hits = resolution.report.cache_hits,
                known_invalid = resolution.report.known_invalid,
                "all names served from cache"
            );
            return resolution;
        }

        let batches: Vec<&[u64]> = misses.chunks(self.settings.batch_size).collect();
        info!(
            misses = misses.len(),
            batches = batches.len(),
            cached = resolution.report.cache_hits,
            "resolving character names"
        );

        let mut outcome = BatchOutcome::default();
        for wave in batches.chunks(self.settings.parallel_batches) {
            outcome.absorb(self.run_wave(wave, cache, now));
        }

        let found: HashMap<u64, String> = outcome
            .found
            .into_iter()
            .map(|named| (named.id, named.name))
            .collect();
        for identity in misses {
            match found.get(&identity) {
                Some(name) => {
                    resolution
                        .names
                        .insert(identity, CharacterName::Resolved(name.clone()));
                    resolution.report.fetched += 1;
                }
                None => {
                    resolution.names.insert(identity, CharacterName::Unknown);
                    resolution.report.unresolved += 1;
                }
            }
        }
        resolution.report.remote_calls = outcome.calls;
        resolution.report.failed_batches = outcome.failed;

        info!(
            fetched = resolution.report.fetched,
            unresolved = resolution.report.unresolved,
            calls = resolution.report.remote_calls,
            "character names resolved"
        );
        resolution
    }

    fn run_wave(&self, wave: &[&[u64]], cache: &NameCache, now: u64) -> BatchOutcome {
        if let [batch] = wave {
            return self.fetch_batch(batch, cache, now);
        }

        thread::scope(|scope| {
            let handles: Vec<_> = wave
                .iter()
                .map(|batch| scope.spawn(move || self.fetch_batch(batch, cache, now)))
                .collect();

            let mut outcome = BatchOutcome::default();
            for handle in handles {
                match handle.join() {
                    Ok(batch) => outcome.absorb(batch),
                    Err(_) => {
                        warn!("name lookup worker panicked; its batch stays unresolved");
                        outcome.failed += 1;
                    }
                }
            }
            outcome
        })
    }

    /// One batch, retried on transient errors. A batch the service rejects
    /// is split in half until the unresolvable ids are isolated.
    fn fetch_batch(&self, batch: &[u64], cache: &NameCache, now: u64) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        match self.call_with_retry(batch, &mut outcome.calls) {
            Ok(found) => {
                let requested: HashSet<u64> = batch.iter().copied().collect();
                let found: Vec<NamedId> = found
                    .into_iter()
                    .filter(|named| requested.contains(&named.id) && !named.name.is_empty())
                    .collect();
                cache.record_all(found.iter().map(|named| NameCacheEntry {
                    identity: named.id,
                    name: named.name.clone(),
                    fetched_at: now,
                }));
                outcome.found = found;
            }
            Err(LookupError::Rejected { status }) if batch.len() > 1 => {
                debug!(status, size = batch.len(), "batch rejected, splitting");
                let (left, right) = batch.split_at(batch.len() / 2);
                outcome.absorb(self.fetch_batch(left, cache, now));
                outcome.absorb(self.fetch_batch(right, cache, now));
            }
            Err(LookupError::Rejected { status }) => {
                for &identity in batch {
                    debug!(status, identity, "identity rejected by name service");
                    cache.mark_invalid(identity, now);
                }
            }
            Err(err) => {
                warn!(size = batch.len(), error = %err, "name lookup batch failed; names stay unresolved");
                outcome.failed += 1;
            }
        }
        outcome
    }

    fn call_with_retry(&self, batch: &[u64], calls: &mut usize) -> Result<Vec<NamedId>, LookupError> {
        let mut attempt = 1;
        loop {
            *calls += 1;
            match self.lookup.lookup(batch) {
                Ok(found) => return Ok(found),
                Err(err) if err.is_retryable() && attempt < self.settings.max_attempts => {
                    debug!(attempt, error = %err, "retrying name lookup");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
