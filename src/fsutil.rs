use filetime::{set_file_mtime, FileTime};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Writes `bytes` to a sibling temp file and renames it over `path`, so a
/// reader never sees a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic_inner(path, bytes, None)
}

/// Like [`write_atomic`], but the replaced file carries `modified` as its
/// mtime instead of the time of the write.
pub(crate) fn write_atomic_with_mtime(
    path: &Path,
    bytes: &[u8],
    modified: SystemTime,
) -> io::Result<()> {
    write_atomic_inner(path, bytes, Some(FileTime::from_system_time(modified)))
}

fn write_atomic_inner(path: &Path, bytes: &[u8], mtime: Option<FileTime>) -> io::Result<()> {
    let temp = temp_sibling(path)?;
    let written = fs::write(&temp, bytes).and_then(|()| match mtime {
        Some(mtime) => set_file_mtime(&temp, mtime),
        None => Ok(()),
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }
    if let Err(err) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        )
    })?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(name);
    temp_name.push(".podsmith-tmp");
    Ok(path.with_file_name(temp_name))
}
