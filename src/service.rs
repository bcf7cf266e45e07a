use crate::{
    aggregate::ResolvedCharacter,
    catalog::SettingsKind,
    config::{name_cache_path, notes_path, AppConfig},
    copy::{CatalogIndex, CopyEngine, CopyOptions, CopyRequest, CopyResult},
    error::{CopyError, LoadError, NoteError},
    esi::EsiClient,
    loader::{self, CharacterList, LoadContext, LoadHandle, LoadOutcome, LoadProgress},
    name_cache::NameCache,
    notes::NoteStore,
    paths::{PathDetector, SettingsRoot},
    resolver::{NameLookup, NameResolver},
};
use std::{path::Path, sync::Arc};

/// Entry point for a collaborator surface: owns the config, the name cache,
/// the notes and the lookup client, and keeps the latest aggregated list.
pub struct Podsmith {
    config: AppConfig,
    ctx: LoadContext,
    notes: NoteStore,
}

impl Podsmith {
    pub fn new(
        config: AppConfig,
        detector: PathDetector,
        lookup: Arc<dyn NameLookup>,
        cache: NameCache,
    ) -> Self {
        let resolver = NameResolver::new(lookup, config.resolver.settings());
        Self {
            ctx: LoadContext {
                detector,
                resolver,
                cache: Arc::new(cache),
                latest: Arc::default(),
            },
            config,
            notes: NoteStore::in_memory(),
        }
    }

    pub fn with_notes(mut self, notes: NoteStore) -> Self {
        self.notes = notes;
        self
    }

    /// Production wiring: environment paths, the public name service and the
    /// on-disk cache under `data_dir`.
    pub fn open(config: AppConfig, data_dir: &Path) -> Self {
        let detector = PathDetector::from_env(&config.custom_paths);
        let lookup = Arc::new(EsiClient::new(
            config.resolver.endpoint.clone(),
            config.resolver.timeout(),
        ));
        let cache = NameCache::load(name_cache_path(data_dir));
        Self::new(config, detector, lookup, cache).with_notes(NoteStore::load(notes_path(data_dir)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &NameCache {
        &self.ctx.cache
    }

    pub fn notes(&self) -> &NoteStore {
        &self.notes
    }

    /// Note attached to a listed entry: its character note, or its account
    /// note for account-only entries.
    pub fn note_for(&self, character: &ResolvedCharacter) -> Option<String> {
        let kind = if character.character_files.is_empty() {
            SettingsKind::Account
        } else {
            SettingsKind::Character
        };
        self.notes.get(kind, character.identity)
    }

    pub fn set_note(&self, kind: SettingsKind, identity: u64, note: &str) -> Result<(), NoteError> {
        self.notes.set(kind, identity, note)
    }

    pub fn detect_roots(&self) -> Vec<SettingsRoot> {
        self.ctx.detector.detect()
    }

    /// Runs a load on a worker thread. Callbacks run on that thread and must
    /// not block on the thread that may cancel or drop the handle; see
    /// [`LoadHandle::cancel`].
    pub fn load_async<P, C>(&self, on_progress: P, on_complete: C) -> LoadHandle
    where
        P: FnMut(LoadProgress) + Send + 'static,
        C: FnOnce(Result<LoadOutcome, LoadError>) + Send + 'static,
    {
        loader::spawn(self.ctx.clone(), on_progress, on_complete)
    }

    pub fn load_blocking(&self) -> Result<LoadOutcome, LoadError> {
        loader::run_pipeline(&self.ctx, &mut |_| {})
    }

    /// Latest aggregated list; empty until a load has finished.
    pub fn characters(&self) -> CharacterList {
        self.ctx.latest.read().clone()
    }

    pub fn copy(&self, request: &CopyRequest) -> Result<CopyResult, CopyError> {
        self.copy_with(request, self.config.copy)
    }

    pub fn copy_with(
        &self,
        request: &CopyRequest,
        options: CopyOptions,
    ) -> Result<CopyResult, CopyError> {
        let index = CatalogIndex::from_characters(&self.characters());
        CopyEngine::new(options).copy(request, &index)
    }
}
