use crate::{
    aggregate::{FileInstance, ResolvedCharacter},
    catalog::SettingsKind,
    error::{CopyError, CopyFailure},
    fsutil::write_atomic_with_mtime,
    paths::SettingsRoot,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, sync::Arc, time::SystemTime};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Write the target file into roots where the target has none yet.
    #[serde(default)]
    pub create_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub source: u64,
    pub targets: Vec<u64>,
    pub kind: SettingsKind,
}

impl CopyRequest {
    /// Keeps the first occurrence of each target.
    pub fn new(source: u64, targets: impl IntoIterator<Item = u64>, kind: SettingsKind) -> Self {
        let mut unique = Vec::new();
        for target in targets {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }
        Self {
            source,
            targets: unique,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoTargetFile,
    NoSourceFile,
    SameAsSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub target: u64,
    pub succeeded: Vec<Arc<SettingsRoot>>,
    pub skipped: Vec<(Arc<SettingsRoot>, SkipReason)>,
    pub failed: Vec<(Arc<SettingsRoot>, CopyFailure)>,
}

impl TargetOutcome {
    fn new(target: u64) -> Self {
        Self {
            target,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn succeeded_profiles(&self) -> Vec<&str> {
        self.succeeded
            .iter()
            .map(|root| root.profile.as_str())
            .collect()
    }

    pub fn skipped_profiles(&self) -> Vec<&str> {
        self.skipped
            .iter()
            .map(|(root, _)| root.profile.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResult {
    pub source: u64,
    pub kind: SettingsKind,
    pub targets: Vec<TargetOutcome>,
}

impl CopyResult {
    pub fn outcome(&self, target: u64) -> Option<&TargetOutcome> {
        self.targets.iter().find(|outcome| outcome.target == target)
    }

    pub fn succeeded(&self) -> usize {
        self.targets.iter().map(|outcome| outcome.succeeded.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.targets.iter().map(|outcome| outcome.failed.len()).sum()
    }

    pub fn skipped(&self) -> usize {
        self.targets.iter().map(|outcome| outcome.skipped.len()).sum()
    }
}

/// (kind, identity) -> every file instance, built from an aggregated list.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    files: HashMap<(SettingsKind, u64), Vec<FileInstance>>,
}

impl CatalogIndex {
    pub fn from_characters(characters: &[ResolvedCharacter]) -> Self {
        let mut files = HashMap::new();
        for character in characters {
            for kind in SettingsKind::ALL {
                let instances = character.files(kind);
                if !instances.is_empty() {
                    files.insert((kind, character.identity), instances.to_vec());
                }
            }
        }
        Self { files }
    }

    pub fn files(&self, kind: SettingsKind, identity: u64) -> &[FileInstance] {
        self.files
            .get(&(kind, identity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

struct Payload {
    bytes: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyEngine {
    options: CopyOptions,
}

impl CopyEngine {
    pub fn new(options: CopyOptions) -> Self {
        Self { options }
    }

    /// Overwrites each target's file with the source's bytes, root by root,
    /// keeping the source file's mtime. Every (target, root) pair gets its
    /// own outcome; one failure never stops the remaining writes and nothing
    /// is rolled back. Without `create_missing`, a target file that vanished
    /// since the index was built is skipped, not recreated.
    pub fn copy(&self, request: &CopyRequest, index: &CatalogIndex) -> Result<CopyResult, CopyError> {
        if request.targets.is_empty() {
            return Err(CopyError::NoTargets);
        }
        let sources = index.files(request.kind, request.source);
        if sources.is_empty() {
            return Err(CopyError::UnknownSource {
                identity: request.source,
                kind: request.kind,
            });
        }

        let payloads: Vec<(&FileInstance, Result<Payload, CopyFailure>)> = sources
            .iter()
            .map(|source| {
                let path = &source.file.path;
                let payload = fs::read(path)
                    .map(|bytes| Payload {
                        bytes,
                        modified: fs::metadata(path)
                            .and_then(|meta| meta.modified())
                            .unwrap_or(source.file.modified),
                    })
                    .map_err(|err| CopyFailure::new("read", path.clone(), &err));
                (source, payload)
            })
            .collect();

        let mut result = CopyResult {
            source: request.source,
            kind: request.kind,
            targets: Vec::new(),
        };

        for &target in &request.targets {
            let mut outcome = TargetOutcome::new(target);
            if target == request.source {
                for source in sources {
                    outcome
                        .skipped
                        .push((Arc::clone(&source.root), SkipReason::SameAsSource));
                }
                result.targets.push(outcome);
                continue;
            }

            let existing = index.files(request.kind, target);
            for (source, payload) in &payloads {
                let root = Arc::clone(&source.root);
                let destination = match existing
                    .iter()
                    .find(|instance| instance.root.path == source.root.path)
                {
                    Some(instance)
                        if self.options.create_missing || instance.file.path.exists() =>
                    {
                        instance.file.path.clone()
                    }
                    Some(instance) => {
                        debug!(target_id = target, path = %instance.file.path.display(), "target file gone since load, skipping");
                        outcome.skipped.push((root, SkipReason::NoTargetFile));
                        continue;
                    }
                    None if self.options.create_missing && source.root.path.is_dir() => {
                        source.root.path.join(request.kind.file_name(target))
                    }
                    None => {
                        debug!(target_id = target, root = %root.label(), "target has no file in root, skipping");
                        outcome.skipped.push((root, SkipReason::NoTargetFile));
                        continue;
                    }
                };

                let payload = match payload {
                    Ok(payload) => payload,
                    Err(failure) => {
                        warn!(target_id = target, root = %root.label(), error = %failure, "source unreadable");
                        outcome.failed.push((root, failure.clone()));
                        continue;
                    }
                };

                match write_atomic_with_mtime(&destination, &payload.bytes, payload.modified) {
                    Ok(()) => {
                        debug!(target_id = target, path = %destination.display(), "settings copied");
                        outcome.succeeded.push(root);
                    }
                    Err(err) => {
                        let failure = CopyFailure::new("write", destination, &err);
                        warn!(target_id = target, root = %root.label(), error = %failure, "settings copy failed");
                        outcome.failed.push((root, failure));
                    }
                }
            }

            for instance in existing {
                let covered = sources
                    .iter()
                    .any(|source| source.root.path == instance.root.path);
                if !covered {
                    outcome
                        .skipped
                        .push((Arc::clone(&instance.root), SkipReason::NoSourceFile));
                }
            }

            result.targets.push(outcome);
        }

        info!(
            source = request.source,
            kind = %request.kind,
            succeeded = result.succeeded(),
            skipped = result.skipped(),
            failed = result.failed(),
            "copy finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::{aggregate, RootCatalog},
        catalog::scan,
        paths::Platform,
    };
    use std::{collections::BTreeMap, path::Path};

    struct Fixture {
        _dir: tempfile::TempDir,
        default: Arc<SettingsRoot>,
        mining: Arc<SettingsRoot>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let make = |profile: &str| {
                let path = dir.path().join(format!("settings_{profile}"));
                fs::create_dir_all(&path).expect("root");
                Arc::new(SettingsRoot {
                    platform: Platform::Custom,
                    server: "tranquility".to_string(),
                    profile: profile.to_string(),
                    path,
                    exists: true,
                })
            };
            let default = make("Default");
            let mining = make("Mining");
            Self {
                _dir: dir,
                default,
                mining,
            }
        }

        fn write(&self, root: &SettingsRoot, kind: SettingsKind, identity: u64, bytes: &[u8]) {
            fs::write(root.path.join(kind.file_name(identity)), bytes).expect("write fixture");
        }

        fn read(&self, root: &SettingsRoot, kind: SettingsKind, identity: u64) -> Option<Vec<u8>> {
            fs::read(root.path.join(kind.file_name(identity))).ok()
        }

        fn index(&self) -> CatalogIndex {
            let catalogs: Vec<RootCatalog> = [&self.default, &self.mining]
                .into_iter()
                .map(|root| (Arc::clone(root), scan(root)))
                .collect();
            CatalogIndex::from_characters(&aggregate(&catalogs, &BTreeMap::new()))
        }
    }

    const CHAR: SettingsKind = SettingsKind::Character;

    #[test]
    fn copies_where_target_exists_and_skips_elsewhere() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 100, b"source-default");
        fx.write(&fx.mining, CHAR, 100, b"source-mining");
        fx.write(&fx.default, CHAR, 200, b"target-default");

        let result = CopyEngine::default()
            .copy(&CopyRequest::new(100, [200], CHAR), &fx.index())
            .expect("copy");

        let outcome = result.outcome(200).expect("target outcome");
        assert_eq!(outcome.succeeded_profiles(), vec!["Default"]);
        assert_eq!(outcome.skipped_profiles(), vec!["Mining"]);
        assert_eq!(outcome.skipped[0].1, SkipReason::NoTargetFile);
        assert!(outcome.failed.is_empty());
        assert_eq!(fx.read(&fx.default, CHAR, 200), Some(b"source-default".to_vec()));
        assert_eq!(fx.read(&fx.mining, CHAR, 200), None);
    }

    #[test]
    fn create_missing_writes_new_target_files() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 100, b"src");
        fx.write(&fx.mining, CHAR, 100, b"src-mining");
        fx.write(&fx.default, CHAR, 200, b"old");

        let engine = CopyEngine::new(CopyOptions {
            create_missing: true,
        });
        let result = engine
            .copy(&CopyRequest::new(100, [200], CHAR), &fx.index())
            .expect("copy");

        assert_eq!(result.succeeded(), 2);
        assert_eq!(fx.read(&fx.mining, CHAR, 200), Some(b"src-mining".to_vec()));
    }

    #[test]
    fn repeated_copy_is_byte_identical() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 100, b"\x00\x01binary\xff");
        fx.write(&fx.default, CHAR, 200, b"something else entirely");
        let request = CopyRequest::new(100, [200], CHAR);

        CopyEngine::default().copy(&request, &fx.index()).expect("first");
        let first = fx.read(&fx.default, CHAR, 200);
        CopyEngine::default().copy(&request, &fx.index()).expect("second");

        assert_eq!(first, fx.read(&fx.default, CHAR, 200));
        assert_eq!(first, Some(b"\x00\x01binary\xff".to_vec()));
    }

    #[test]
    fn one_target_per_outcome_in_request_order() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 100, b"src");
        fx.write(&fx.default, CHAR, 300, b"t3");
        fx.write(&fx.default, CHAR, 200, b"t2");

        let result = CopyEngine::default()
            .copy(&CopyRequest::new(100, [300, 200, 300, 100], CHAR), &fx.index())
            .expect("copy");

        let order: Vec<u64> = result.targets.iter().map(|outcome| outcome.target).collect();
        assert_eq!(order, vec![300, 200, 100]);
        assert_eq!(
            result.outcome(100).expect("self").skipped[0].1,
            SkipReason::SameAsSource
        );
        assert_eq!(fx.read(&fx.default, CHAR, 300), Some(b"src".to_vec()));
        assert_eq!(fx.read(&fx.default, CHAR, 200), Some(b"src".to_vec()));
    }

    #[test]
    fn target_only_roots_are_reported_as_no_source() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 100, b"src");
        fx.write(&fx.default, CHAR, 200, b"t-default");
        fx.write(&fx.mining, CHAR, 200, b"t-mining");

        let result = CopyEngine::default()
            .copy(&CopyRequest::new(100, [200], CHAR), &fx.index())
            .expect("copy");

        let outcome = result.outcome(200).expect("outcome");
        assert_eq!(outcome.skipped, vec![(Arc::clone(&fx.mining), SkipReason::NoSourceFile)]);
        assert_eq!(fx.read(&fx.mining, CHAR, 200), Some(b"t-mining".to_vec()));
    }

    #[test]
    fn account_kind_only_touches_account_files() {
        let fx = Fixture::new();
        fx.write(&fx.default, SettingsKind::Account, 1, b"acct-1");
        fx.write(&fx.default, SettingsKind::Account, 2, b"acct-2");
        fx.write(&fx.default, CHAR, 2, b"char-2");

        CopyEngine::default()
            .copy(&CopyRequest::new(1, [2], SettingsKind::Account), &fx.index())
            .expect("copy");

        assert_eq!(fx.read(&fx.default, SettingsKind::Account, 2), Some(b"acct-1".to_vec()));
        assert_eq!(fx.read(&fx.default, CHAR, 2), Some(b"char-2".to_vec()));
    }

    #[test]
    fn unknown_source_is_rejected_before_writing() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 200, b"t");

        let err = CopyEngine::default()
            .copy(&CopyRequest::new(100, [200], CHAR), &fx.index())
            .expect_err("no source");
        assert!(matches!(err, CopyError::UnknownSource { identity: 100, .. }));

        let err = CopyEngine::default()
            .copy(&CopyRequest::new(200, [], CHAR), &fx.index())
            .expect_err("no targets");
        assert!(matches!(err, CopyError::NoTargets));
    }

    #[test]
    fn target_deleted_after_indexing_is_not_recreated() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 100, b"src");
        fx.write(&fx.default, CHAR, 200, b"t-default");
        let index = fx.index();
        fs::remove_file(fx.default.path.join(CHAR.file_name(200))).expect("remove");

        let result = CopyEngine::default()
            .copy(&CopyRequest::new(100, [200], CHAR), &index)
            .expect("copy");

        let outcome = result.outcome(200).expect("outcome");
        assert_eq!(result.succeeded(), 0);
        assert_eq!(outcome.skipped, vec![(Arc::clone(&fx.default), SkipReason::NoTargetFile)]);
        assert_eq!(fx.read(&fx.default, CHAR, 200), None);
    }

    #[test]
    fn copied_file_keeps_source_mtime() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 100, b"src");
        fx.write(&fx.default, CHAR, 200, b"t-default");
        let source = fx.default.path.join(CHAR.file_name(100));
        let stamp = filetime::FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&source, stamp).expect("stamp source");

        CopyEngine::default()
            .copy(&CopyRequest::new(100, [200], CHAR), &fx.index())
            .expect("copy");

        let target = fs::metadata(fx.default.path.join(CHAR.file_name(200))).expect("target");
        assert_eq!(filetime::FileTime::from_last_modification_time(&target), stamp);
    }

    #[test]
    fn write_failure_is_recorded_per_root() {
        let fx = Fixture::new();
        fx.write(&fx.default, CHAR, 100, b"src");
        fx.write(&fx.mining, CHAR, 100, b"src-mining");
        fx.write(&fx.default, CHAR, 200, b"t-default");
        fx.write(&fx.mining, CHAR, 200, b"t-mining");
        let index = fx.index();

        // Replace the Default target with a directory so the rename fails.
        let blocked = fx.default.path.join(CHAR.file_name(200));
        fs::remove_file(&blocked).expect("remove");
        fs::create_dir_all(blocked.join("locked")).expect("block");

        let result = CopyEngine::default()
            .copy(&CopyRequest::new(100, [200], CHAR), &index)
            .expect("copy");

        let outcome = result.outcome(200).expect("outcome");
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0.profile, "Default");
        assert_eq!(outcome.succeeded_profiles(), vec!["Mining"]);
        assert_eq!(fx.read(&fx.mining, CHAR, 200), Some(b"src-mining".to_vec()));
        assert!(Path::new(&blocked).is_dir());
    }
}
