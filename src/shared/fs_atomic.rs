use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Replaces `path` with `content` through a synced temp file and a rename, so
/// readers observe either the previous file or the new one, never a prefix.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    fs::create_dir_all(parent)?;
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("record"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    sync_parent_dir(parent)?;
    Ok(())
}

/// Writes a file that must never change once it exists. Rewriting the same
/// bytes is accepted; different bytes fail with `AlreadyExists`.
pub fn write_once(path: &Path, content: &[u8]) -> std::io::Result<()> {
    match fs::read(path) {
        Ok(existing) if existing == content => Ok(()),
        Ok(_) => Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} exists with different content", path.display()),
        )),
        Err(err) if err.kind() == ErrorKind::NotFound => atomic_write_file(path, content),
        Err(err) => Err(err),
    }
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    atomic_write_file(path, &body)
}

/// Reads a JSON file, returning `Ok(None)` when it does not exist.
pub fn read_json_if_exists<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, ReadJsonError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ReadJsonError::Io(err)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(ReadJsonError::Json)
}

#[derive(Debug)]
pub enum ReadJsonError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> std::io::Result<()> {
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> std::io::Result<()> {
    Ok(())
}
