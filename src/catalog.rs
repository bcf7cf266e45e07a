use crate::paths::SettingsRoot;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::PathBuf,
    time::SystemTime,
};
use tracing::{debug, warn};

const FILE_SUFFIX: &str = ".dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsKind {
    Character,
    Account,
}

impl SettingsKind {
    pub const ALL: [SettingsKind; 2] = [SettingsKind::Character, SettingsKind::Account];

    pub fn prefix(self) -> &'static str {
        match self {
            SettingsKind::Character => "core_char_",
            SettingsKind::Account => "core_user_",
        }
    }

    pub fn file_name(self, identity: u64) -> String {
        format!("{}{identity}{FILE_SUFFIX}", self.prefix())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SettingsKind::Character => "character",
            SettingsKind::Account => "account",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "char" | "character" | "characters" => Some(SettingsKind::Character),
            "user" | "account" | "accounts" => Some(SettingsKind::Account),
            _ => None,
        }
    }
}

impl fmt::Display for SettingsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `core_char_<id>.dat` or `core_user_<id>.dat` file inside a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFile {
    pub identity: u64,
    pub kind: SettingsKind,
    pub path: PathBuf,
    pub modified: SystemTime,
    /// Directory of the owning root; used for lookups only.
    pub root_dir: PathBuf,
}

/// Splits a file name into kind and identity. Templates such as
/// `core_char__.dat` and anything without a pure digit run are rejected.
pub fn classify(file_name: &str) -> Option<(SettingsKind, u64)> {
    let stem = file_name.strip_suffix(FILE_SUFFIX)?;
    for kind in SettingsKind::ALL {
        let Some(digits) = stem.strip_prefix(kind.prefix()) else {
            continue;
        };
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        return digits.parse().ok().map(|identity| (kind, identity));
    }
    None
}

/// Lists the settings files directly inside `root`. Unreadable entries are
/// skipped with a warning so one bad file never hides the rest of the root.
pub fn scan(root: &SettingsRoot) -> Vec<SettingsFile> {
    if !root.path.is_dir() {
        debug!(root = %root.label(), "root missing, nothing to scan");
        return Vec::new();
    }

    let entries = match fs::read_dir(&root.path) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %root.path.display(), error = %err, "cannot list settings root");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %root.path.display(), error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        let file_name = entry.file_name();
        let Some((kind, identity)) = file_name.to_str().and_then(classify) else {
            continue;
        };

        let path = entry.path();
        let modified = match fs::metadata(&path) {
            Ok(metadata) if !metadata.is_file() => continue,
            Ok(metadata) => metadata.modified(),
            Err(err) => Err(err),
        };
        let modified = match modified {
            Ok(modified) => modified,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping settings file with unreadable metadata");
                continue;
            }
        };

        files.push(SettingsFile {
            identity,
            kind,
            path,
            modified,
            root_dir: root.path.clone(),
        });
    }

    files.sort_by(|a, b| (a.kind, a.identity).cmp(&(b.kind, b.identity)));
    debug!(root = %root.label(), files = files.len(), "scanned settings root");
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Platform;
    use std::path::Path;

    fn root_at(path: &Path) -> SettingsRoot {
        SettingsRoot {
            platform: Platform::Custom,
            server: "tranquility".to_string(),
            profile: "Default".to_string(),
            path: path.to_path_buf(),
            exists: path.is_dir(),
        }
    }

    #[test]
    fn classifies_character_and_account_files() {
        assert_eq!(
            classify("core_char_2114794365.dat"),
            Some((SettingsKind::Character, 2114794365))
        );
        assert_eq!(
            classify("core_user_81234.dat"),
            Some((SettingsKind::Account, 81234))
        );
    }

    #[test]
    fn rejects_templates_and_noise() {
        for name in [
            "core_char__.dat",
            "core_user__.dat",
            "core_char_.dat",
            "core_char_12a.dat",
            "core_char_123.dat.bak",
            "core_char_123.yaml",
            "core_public__.yaml",
            "prefs.ini",
            "core_char_99999999999999999999999.dat",
        ] {
            assert_eq!(classify(name), None, "{name}");
        }
    }

    #[test]
    fn scan_reads_only_matching_top_level_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("core_char_100.dat"), b"c100").expect("char");
        fs::write(dir.path().join("core_user_7.dat"), b"u7").expect("user");
        fs::write(dir.path().join("core_char__.dat"), b"template").expect("template");
        fs::write(dir.path().join("notes.txt"), b"x").expect("noise");
        fs::create_dir_all(dir.path().join("nested")).expect("nested");
        fs::write(dir.path().join("nested/core_char_200.dat"), b"deep").expect("deep");
        fs::create_dir_all(dir.path().join("core_char_300.dat")).expect("dir named like a file");

        let files = scan(&root_at(dir.path()));
        let found: Vec<(SettingsKind, u64)> =
            files.iter().map(|file| (file.kind, file.identity)).collect();
        assert_eq!(
            found,
            vec![(SettingsKind::Character, 100), (SettingsKind::Account, 7)]
        );
        assert!(files.iter().all(|file| file.root_dir == dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn scan_skips_files_with_unreadable_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("core_char_2.dat"), b"good").expect("good");
        std::os::unix::fs::symlink(
            dir.path().join("nowhere.dat"),
            dir.path().join("core_char_1.dat"),
        )
        .expect("dangling link");

        let files = scan(&root_at(dir.path()));

        let found: Vec<u64> = files.iter().map(|file| file.identity).collect();
        assert_eq!(found, vec![2]);
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = root_at(&dir.path().join("settings_Default"));
        assert!(scan(&root).is_empty());
    }

    #[test]
    fn kind_parses_cli_spellings() {
        assert_eq!(SettingsKind::parse("char"), Some(SettingsKind::Character));
        assert_eq!(SettingsKind::parse("USER"), Some(SettingsKind::Account));
        assert_eq!(SettingsKind::parse("both"), None);
        assert_eq!(SettingsKind::Account.file_name(42), "core_user_42.dat");
    }
}
