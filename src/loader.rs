use crate::{
    aggregate::{aggregate, character_identities, ResolvedCharacter, RootCatalog},
    catalog::scan,
    error::LoadError,
    name_cache::NameCache,
    paths::{PathDetector, SettingsRoot},
    resolver::{NameResolver, ResolutionReport},
};
use parking_lot::{Mutex, RwLock};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
};
use tracing::{debug, info, warn};

/// Shared snapshot of the aggregated list.
pub type CharacterList = Arc<Vec<ResolvedCharacter>>;

#[derive(Debug, Clone)]
pub enum LoadProgress {
    RootsDiscovered { roots: usize },
    RootScanned { root: Arc<SettingsRoot>, files: usize },
    /// The list with cache-only names, before any remote call.
    Preliminary(CharacterList),
    NamesResolved(ResolutionReport),
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub roots: Vec<Arc<SettingsRoot>>,
    pub characters: CharacterList,
    pub report: ResolutionReport,
}

/// Everything one load needs. Cheap to clone; the cache and the latest list
/// are shared with the owner.
#[derive(Clone)]
pub struct LoadContext {
    pub detector: PathDetector,
    pub resolver: NameResolver,
    pub cache: Arc<NameCache>,
    pub latest: Arc<RwLock<CharacterList>>,
}

/// Detect, scan, resolve and aggregate, in that order, on the calling thread.
pub fn run_pipeline(
    ctx: &LoadContext,
    on_progress: &mut dyn FnMut(LoadProgress),
) -> Result<LoadOutcome, LoadError> {
    let roots: Vec<Arc<SettingsRoot>> = ctx.detector.detect().into_iter().map(Arc::new).collect();
    if roots.is_empty() {
        let probed = ctx.detector.candidate_bases().len();
        warn!(probed, "no EVE settings folders found");
        return Err(LoadError::NoSettingsRoots { probed });
    }
    on_progress(LoadProgress::RootsDiscovered { roots: roots.len() });

    let mut catalogs: Vec<RootCatalog> = Vec::with_capacity(roots.len());
    for root in &roots {
        let files = scan(root);
        debug!(root = %root.label(), files = files.len(), "root scanned");
        on_progress(LoadProgress::RootScanned {
            root: Arc::clone(root),
            files: files.len(),
        });
        catalogs.push((Arc::clone(root), files));
    }

    let identities = character_identities(&catalogs);
    let preliminary = ctx.resolver.cached_names(&identities, &ctx.cache);
    on_progress(LoadProgress::Preliminary(Arc::new(aggregate(
        &catalogs,
        &preliminary,
    ))));

    let resolution = ctx.resolver.resolve(&identities, &ctx.cache);
    if let Err(err) = ctx.cache.flush_if_dirty() {
        warn!(error = %format!("{err:#}"), "failed to save name cache");
    }
    on_progress(LoadProgress::NamesResolved(resolution.report.clone()));

    let characters: CharacterList = Arc::new(aggregate(&catalogs, &resolution.names));
    *ctx.latest.write() = Arc::clone(&characters);
    info!(
        roots = roots.len(),
        characters = characters.len(),
        unresolved = resolution.report.unresolved,
        "load finished"
    );

    Ok(LoadOutcome {
        roots,
        characters,
        report: resolution.report,
    })
}

/// Serializes callback delivery against cancellation.
#[derive(Default)]
struct Gate {
    cancelled: AtomicBool,
    delivery: Mutex<()>,
}

impl Gate {
    fn deliver(&self, callback: impl FnOnce()) -> bool {
        let _delivering = self.delivery.lock();
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        callback();
        true
    }
}

/// A running background load. Dropping the handle cancels delivery; the
/// worker itself is left to finish its in-flight lookups.
pub struct LoadHandle {
    gate: Arc<Gate>,
    worker_id: ThreadId,
    worker: Option<JoinHandle<()>>,
}

impl LoadHandle {
    /// After this returns no callback of this load will run. Called from
    /// inside a callback it only suppresses the ones that follow.
    ///
    /// Waits for a callback that is already running, so a callback must
    /// never block on the thread that cancels (a rendezvous channel send to
    /// that thread would deadlock both). Use an unbounded channel instead.
    pub fn cancel(&self) {
        if self.gate.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("load cancelled");
        if thread::current().id() != self.worker_id {
            drop(self.gate.delivery.lock());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the worker, including its completion callback.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for LoadHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs [`run_pipeline`] on a fresh worker thread. `on_complete` runs exactly
/// once unless the handle is cancelled first; a panic anywhere in the load
/// is reported as [`LoadError::WorkerLost`].
pub fn spawn<P, C>(ctx: LoadContext, on_progress: P, on_complete: C) -> LoadHandle
where
    P: FnMut(LoadProgress) + Send + 'static,
    C: FnOnce(Result<LoadOutcome, LoadError>) + Send + 'static,
{
    let gate = Arc::new(Gate::default());
    let worker_gate = Arc::clone(&gate);
    let worker = thread::spawn(move || {
        let mut on_progress = on_progress;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            run_pipeline(&ctx, &mut |progress| {
                worker_gate.deliver(|| on_progress(progress));
            })
        }))
        .unwrap_or_else(|_| {
            warn!("load worker panicked");
            Err(LoadError::WorkerLost)
        });

        if !worker_gate.deliver(|| on_complete(result)) {
            debug!("load result dropped after cancel");
        }
    });

    LoadHandle {
        gate,
        worker_id: worker.thread().id(),
        worker: Some(worker),
    }
}
