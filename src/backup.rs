use crate::error::BackupError;
use filetime::{set_file_mtime, FileTime};
use serde::Serialize;
use std::{
    fs,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time as TimeOfDay};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

const RESTORED_PREFIX: &str = "settings_restored_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    pub archive: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub file_name: String,
    /// Unix seconds of the archive's mtime.
    pub created: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    pub count: usize,
    pub total_bytes: u64,
    pub oldest: Option<u64>,
    pub newest: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub destination: PathBuf,
    pub files: usize,
    /// Entries skipped because their path would leave the destination.
    pub refused: usize,
}

/// Zips every file under `profile_dir` into `backup_dir`, each entry prefixed
/// with the profile folder's name.
pub fn create_backup(profile_dir: &Path, backup_dir: &Path) -> Result<BackupSummary, BackupError> {
    if !profile_dir.is_dir() {
        return Err(BackupError::MissingProfile(profile_dir.to_path_buf()));
    }
    let profile_name = profile_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| BackupError::MissingProfile(profile_dir.to_path_buf()))?;

    let files: Vec<(PathBuf, String)> = WalkDir::new(profile_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry during backup");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(profile_dir).ok()?;
            let mut name = profile_name.clone();
            for part in relative.components() {
                name.push('/');
                name.push_str(&part.as_os_str().to_string_lossy());
            }
            Some((entry.path().to_path_buf(), name))
        })
        .collect();
    if files.is_empty() {
        return Err(BackupError::Empty(profile_dir.to_path_buf()));
    }

    fs::create_dir_all(backup_dir).map_err(|err| BackupError::io("create backups dir", err))?;
    let archive = unique_archive_path(backup_dir, &profile_name, &timestamp(OffsetDateTime::now_utc()));

    if let Err(err) = write_archive(&archive, &files) {
        let _ = fs::remove_file(&archive);
        return Err(err);
    }

    let bytes = fs::metadata(&archive)
        .map_err(|err| BackupError::io("stat backup archive", err))?
        .len();
    info!(archive = %archive.display(), files = files.len(), bytes, "backup created");
    Ok(BackupSummary {
        archive,
        files: files.len(),
        bytes,
    })
}

fn write_archive(archive: &Path, files: &[(PathBuf, String)]) -> Result<(), BackupError> {
    let out = fs::File::create(archive).map_err(|err| BackupError::io("create backup archive", err))?;
    let mut writer = ZipWriter::new(out);
    for (path, name) in files {
        let mut options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        if let Some(stamp) = fs::metadata(path).ok().and_then(|meta| zip_time(meta.modified().ok()?)) {
            options = options.last_modified_time(stamp);
        }
        let bytes = fs::read(path)
            .map_err(|err| BackupError::io(format!("read {}", path.display()), err))?;
        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(&bytes)
            .map_err(|err| BackupError::io("write backup entry", err))?;
    }
    writer.finish()?;
    Ok(())
}

/// Archives in `backup_dir`, newest first. A missing directory has none.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<BackupInfo>, BackupError> {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(BackupError::io("list backups", err)),
    };

    let mut backups: Vec<BackupInfo> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
        })
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let created = meta
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|age| age.as_secs())
                .unwrap_or(0);
            Some(BackupInfo {
                path: entry.path(),
                file_name: entry.file_name().to_string_lossy().to_string(),
                created,
                size: meta.len(),
            })
        })
        .collect();

    backups.sort_by(|a, b| {
        b.created
            .cmp(&a.created)
            .then_with(|| b.file_name.cmp(&a.file_name))
    });
    Ok(backups)
}

pub fn backup_stats(backups: &[BackupInfo]) -> BackupStats {
    BackupStats {
        count: backups.len(),
        total_bytes: backups.iter().map(|backup| backup.size).sum(),
        oldest: backups.iter().map(|backup| backup.created).min(),
        newest: backups.iter().map(|backup| backup.created).max(),
    }
}

/// Extracts `archive` into `into`, or into a new `settings_restored_<stamp>`
/// folder under `dest_base`. The leading profile folder of each entry is
/// dropped so the files land directly in the destination.
pub fn restore_backup(
    archive: &Path,
    dest_base: &Path,
    into: Option<&Path>,
) -> Result<RestoreSummary, BackupError> {
    if !archive.is_file() {
        return Err(BackupError::MissingArchive(archive.to_path_buf()));
    }
    let file = fs::File::open(archive).map_err(|err| BackupError::io("open backup archive", err))?;
    let mut zip = ZipArchive::new(file)?;

    let destination = match into {
        Some(dir) => dir.to_path_buf(),
        None => dest_base.join(format!(
            "{RESTORED_PREFIX}{}",
            timestamp(OffsetDateTime::now_utc())
        )),
    };
    fs::create_dir_all(&destination).map_err(|err| BackupError::io("create restore dir", err))?;

    let mut summary = RestoreSummary {
        destination: destination.clone(),
        files: 0,
        refused: 0,
    };
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(enclosed) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "refusing backup entry outside the destination");
            summary.refused += 1;
            continue;
        };
        let relative = match strip_profile_folder(&enclosed) {
            Some(rest) => rest,
            None if entry.is_dir() => continue,
            None => enclosed.to_path_buf(),
        };

        let out_path = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|err| BackupError::io("create restore dir", err))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|err| BackupError::io("create restore dir", err))?;
        }

        let mut out_file = fs::File::create(&out_path)
            .map_err(|err| BackupError::io(format!("create {}", out_path.display()), err))?;
        io::copy(&mut entry, &mut out_file)
            .map_err(|err| BackupError::io(format!("extract {}", entry.name()), err))?;
        drop(out_file);
        if let Some(mtime) = entry.last_modified().and_then(zip_time_to_unix) {
            let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
        }
        summary.files += 1;
    }

    info!(
        archive = %archive.display(),
        destination = %destination.display(),
        files = summary.files,
        "backup restored"
    );
    Ok(summary)
}

pub fn delete_backup(archive: &Path) -> Result<(), BackupError> {
    if !archive.is_file() {
        return Err(BackupError::MissingArchive(archive.to_path_buf()));
    }
    fs::remove_file(archive).map_err(|err| BackupError::io("delete backup archive", err))?;
    debug!(archive = %archive.display(), "backup deleted");
    Ok(())
}

fn strip_profile_folder(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    match components.next()? {
        Component::Normal(_) => {}
        _ => return None,
    }
    let rest = components.as_path();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest.to_path_buf())
    }
}

fn unique_archive_path(backup_dir: &Path, profile: &str, stamp: &str) -> PathBuf {
    let mut candidate = backup_dir.join(format!("{profile}_{stamp}.zip"));
    let mut counter = 2;
    while candidate.exists() {
        candidate = backup_dir.join(format!("{profile}_{stamp}_{counter}.zip"));
        counter += 1;
    }
    candidate
}

fn timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

fn zip_time(modified: SystemTime) -> Option<zip::DateTime> {
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    let date = OffsetDateTime::from_unix_timestamp(i64::try_from(secs).ok()?).ok()?;
    zip::DateTime::from_date_and_time(
        u16::try_from(date.year()).ok()?,
        date.month() as u8,
        date.day(),
        date.hour(),
        date.minute(),
        date.second(),
    )
    .ok()
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}
