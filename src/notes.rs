use crate::{catalog::SettingsKind, error::NoteError, fsutil::write_atomic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

pub const MAX_NOTE_CHARS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct NotesFile {
    #[serde(default)]
    characters: BTreeMap<u64, String>,
    #[serde(default)]
    accounts: BTreeMap<u64, String>,
}

impl NotesFile {
    fn for_kind(&self, kind: SettingsKind) -> &BTreeMap<u64, String> {
        match kind {
            SettingsKind::Character => &self.characters,
            SettingsKind::Account => &self.accounts,
        }
    }

    fn for_kind_mut(&mut self, kind: SettingsKind) -> &mut BTreeMap<u64, String> {
        match kind {
            SettingsKind::Character => &mut self.characters,
            SettingsKind::Account => &mut self.accounts,
        }
    }
}

/// Free-text notes keyed by character or account id. Every change is
/// written through to disk.
#[derive(Debug, Default)]
pub struct NoteStore {
    path: Option<PathBuf>,
    notes: Mutex<NotesFile>,
}

impl NoteStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A missing file starts empty; a corrupt one is discarded with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let notes = match read_notes(&path) {
            Ok(notes) => notes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding unreadable notes file");
                NotesFile::default()
            }
        };
        Self {
            path: Some(path),
            notes: Mutex::new(notes),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, kind: SettingsKind, identity: u64) -> Option<String> {
        self.notes.lock().for_kind(kind).get(&identity).cloned()
    }

    pub fn all(&self, kind: SettingsKind) -> BTreeMap<u64, String> {
        self.notes.lock().for_kind(kind).clone()
    }

    /// Sets the note for `identity`. A blank note removes it.
    pub fn set(&self, kind: SettingsKind, identity: u64, note: &str) -> Result<(), NoteError> {
        let note = note.trim();
        let chars = note.chars().count();
        if chars > MAX_NOTE_CHARS {
            return Err(NoteError::TooLong {
                chars,
                max: MAX_NOTE_CHARS,
            });
        }

        let mut notes = self.notes.lock();
        let mut updated = notes.clone();
        if note.is_empty() {
            updated.for_kind_mut(kind).remove(&identity);
        } else {
            updated.for_kind_mut(kind).insert(identity, note.to_string());
        }
        if updated == *notes {
            return Ok(());
        }
        if let Some(path) = &self.path {
            save_notes(path, &updated)?;
        }
        *notes = updated;
        info!(kind = %kind, identity, cleared = note.is_empty(), "note updated");
        Ok(())
    }
}

fn read_notes(path: &Path) -> Result<NotesFile, NoteError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no notes yet");
            return Ok(NotesFile::default());
        }
        Err(err) => return Err(NoteError::io("read notes", err)),
    };
    Ok(serde_json::from_str(&raw)?)
}

fn save_notes(path: &Path, notes: &NotesFile) -> Result<(), NoteError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| NoteError::io("create notes dir", err))?;
    }
    let raw = serde_json::to_vec_pretty(notes)?;
    write_atomic(path, &raw).map_err(|err| NoteError::io("write notes", err))
}
