use crate::{
    catalog::{SettingsFile, SettingsKind},
    paths::SettingsRoot,
    resolver::CharacterName,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// The files found in one root, in the order the root was detected.
pub type RootCatalog = (Arc<SettingsRoot>, Vec<SettingsFile>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInstance {
    pub root: Arc<SettingsRoot>,
    pub file: SettingsFile,
}

/// Everything known about one identity across all roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCharacter {
    pub identity: u64,
    pub name: CharacterName,
    /// Newest character-file mtime; stands in for "last connection".
    pub last_modified: SystemTime,
    pub character_files: Vec<FileInstance>,
    pub account_files: Vec<FileInstance>,
}

impl ResolvedCharacter {
    pub fn display_name(&self) -> String {
        self.name.display(self.identity)
    }

    pub fn files(&self, kind: SettingsKind) -> &[FileInstance] {
        match kind {
            SettingsKind::Character => &self.character_files,
            SettingsKind::Account => &self.account_files,
        }
    }

    pub fn file_in(&self, kind: SettingsKind, root_dir: &Path) -> Option<&FileInstance> {
        self.files(kind)
            .iter()
            .find(|instance| instance.root.path == root_dir)
    }

    pub fn profiles(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for instance in self.character_files.iter().chain(&self.account_files) {
            let label = instance.root.label();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }
}

fn newest(files: &[FileInstance]) -> Option<SystemTime> {
    files.iter().map(|instance| instance.file.modified).max()
}

#[derive(Default)]
struct Group {
    character_files: Vec<FileInstance>,
    account_files: Vec<FileInstance>,
}

impl Group {
    fn push(&mut self, root: &Arc<SettingsRoot>, file: &SettingsFile) {
        let files = match file.kind {
            SettingsKind::Character => &mut self.character_files,
            SettingsKind::Account => &mut self.account_files,
        };
        if files.iter().any(|instance| instance.root.path == root.path) {
            return;
        }
        files.push(FileInstance {
            root: Arc::clone(root),
            file: file.clone(),
        });
    }
}

/// Identities that need a name lookup: everything with a character file.
pub fn character_identities(catalogs: &[RootCatalog]) -> BTreeSet<u64> {
    catalogs
        .iter()
        .flat_map(|(_, files)| files)
        .filter(|file| file.kind == SettingsKind::Character)
        .map(|file| file.identity)
        .collect()
}

/// Merges per-root catalogs into one entry per identity, newest first, ties
/// broken by ascending identity.
pub fn aggregate(
    catalogs: &[RootCatalog],
    names: &BTreeMap<u64, CharacterName>,
) -> Vec<ResolvedCharacter> {
    let mut groups: BTreeMap<u64, Group> = BTreeMap::new();
    for (root, files) in catalogs {
        for file in files {
            groups.entry(file.identity).or_default().push(root, file);
        }
    }

    let mut characters: Vec<ResolvedCharacter> = groups
        .into_iter()
        .map(|(identity, group)| {
            let last_modified = newest(&group.character_files)
                .or_else(|| newest(&group.account_files))
                .unwrap_or(UNIX_EPOCH);
            ResolvedCharacter {
                identity,
                name: names
                    .get(&identity)
                    .cloned()
                    .unwrap_or(CharacterName::Unknown),
                last_modified,
                character_files: group.character_files,
                account_files: group.account_files,
            }
        })
        .collect();

    characters.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    characters
}
