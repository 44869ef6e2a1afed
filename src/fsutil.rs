use crate::error::{OpmError, OpmResult};
use fs2::FileExt;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Replaces `path` atomically. A symlinked `path` is written through to its
/// target, and an existing file keeps its permissions; new files get 0600.
pub(crate) fn write_file_atomic(path: &Path, data: &[u8]) -> OpmResult<()> {
    let target = resolve_symlink(path);
    let path = target.as_path();
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| OpmError::io("create dir", parent, err))?;

    let mut temp_file =
        NamedTempFile::new_in(parent).map_err(|err| OpmError::io("create temp file in", parent, err))?;
    temp_file
        .write_all(data)
        .map_err(|err| OpmError::io("write temp file for", path, err))?;
    match fs::metadata(path) {
        Ok(existing) => {
            let _ = temp_file.as_file().set_permissions(existing.permissions());
        }
        Err(_) => restrict_permissions(temp_file.as_file()),
    }

    temp_file
        .persist(path)
        .map_err(|err| OpmError::io("persist", path, err.error))?;
    Ok(())
}

/// Final target of `path` when it is a symlink, else `path` itself. A
/// dangling link resolves to its (possibly relative) target.
fn resolve_symlink(path: &Path) -> PathBuf {
    let is_link = fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    if !is_link {
        return path.to_path_buf();
    }
    fs::canonicalize(path)
        .or_else(|_| {
            fs::read_link(path).map(|target| match path.parent() {
                Some(parent) => parent.join(target),
                None => target,
            })
        })
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) {
    use std::os::unix::fs::PermissionsExt;
    let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) {}

/// Runs `operation` while holding an exclusive advisory lock on `lock_path`.
pub(crate) fn with_file_lock<T, F>(lock_path: &Path, operation: F) -> OpmResult<T>
where
    F: FnOnce() -> OpmResult<T>,
{
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(|err| OpmError::io("create dir", parent, err))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|err| OpmError::io("open lock file", lock_path, err))?;
    restrict_permissions(&file);
    file.lock_exclusive().map_err(|source| OpmError::Lock {
        path: lock_path.to_path_buf(),
        source,
    })?;
    tracing::trace!(lock = %lock_path.display(), "lock acquired");

    let result = operation();
    let _ = file.unlock();
    result
}

/// Reads a file that must hold a JSON object, returning its raw bytes too.
pub(crate) fn read_json_object(path: &Path) -> OpmResult<(Vec<u8>, Map<String, Value>)> {
    let data = fs::read(path).map_err(|err| OpmError::io("read", path, err))?;
    let root: Value = serde_json::from_slice(&data).map_err(|source| OpmError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    match root {
        Value::Object(map) => Ok((data, map)),
        _ => Err(OpmError::NotAnObject(path.to_path_buf())),
    }
}

pub(crate) fn short_hash_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)[..16].to_string()
}

/// Log-safe stand-in for a bearer or refresh token.
pub(crate) fn token_fingerprint(token: Option<&str>) -> String {
    match token.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => short_hash_hex(raw.as_bytes()),
        None => "-".to_string(),
    }
}

pub(crate) fn truncate_chars(raw: &str, max_chars: usize) -> String {
    raw.chars().take(max_chars).collect::<String>()
}
