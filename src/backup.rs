use crate::error::{OpmError, OpmResult};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Only `backup_*.json` archives count toward this limit. Pre-switch
/// `before_*` snapshots are never pruned.
pub const MAX_ROTATED_BACKUPS: usize = 10;

const ROTATED_PREFIX: &str = "backup_";

pub fn backup_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn pre_switch_backup_name(preset: &str) -> String {
    format!("before_{}_{}.json", preset, backup_timestamp())
}

/// Copies the live auth file into `backups_dir` and prunes old rotated archives.
/// Returns `None` without touching anything when the live file does not exist.
pub fn create_backup(
    auth_path: &Path,
    backups_dir: &Path,
    explicit_name: Option<&str>,
) -> OpmResult<Option<PathBuf>> {
    if !auth_path.exists() {
        return Ok(None);
    }

    fs::create_dir_all(backups_dir).map_err(|err| OpmError::io("create dir", backups_dir, err))?;
    let name = explicit_name
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}{}.json", ROTATED_PREFIX, backup_timestamp()));
    let (backup_path, mut backup) = reserve_backup_file(backups_dir, &name)?;
    let mut source = File::open(auth_path).map_err(|err| OpmError::io("open", auth_path, err))?;
    io::copy(&mut source, &mut backup)
        .map_err(|err| OpmError::io("copy backup to", &backup_path, err))?;
    if let Ok(metadata) = source.metadata() {
        let _ = backup.set_permissions(metadata.permissions());
    }
    tracing::debug!(backup = %backup_path.display(), "auth file backed up");

    let pruned = prune_rotated_backups(backups_dir)?;
    if !pruned.is_empty() {
        tracing::debug!(count = pruned.len(), "pruned rotated backups");
    }
    Ok(Some(backup_path))
}

/// Creates `name` in `backups_dir`, or `<stem>_<n>.json` when that file
/// already exists. An existing backup is never overwritten.
fn reserve_backup_file(backups_dir: &Path, name: &str) -> OpmResult<(PathBuf, File)> {
    let stem = name.strip_suffix(".json").unwrap_or(name);
    let mut attempt = 0_usize;
    loop {
        let candidate = if attempt == 0 {
            backups_dir.join(name)
        } else {
            backups_dir.join(format!("{}_{}.json", stem, attempt))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(OpmError::io("create backup", &candidate, err)),
        }
    }
}

fn is_rotated_backup(file_name: &str) -> bool {
    file_name.starts_with(ROTATED_PREFIX) && file_name.ends_with(".json")
}

/// Deletes all but the newest `MAX_ROTATED_BACKUPS` rotated archives (by name).
pub fn prune_rotated_backups(backups_dir: &Path) -> OpmResult<Vec<PathBuf>> {
    let entries =
        fs::read_dir(backups_dir).map_err(|err| OpmError::io("list", backups_dir, err))?;
    let mut rotated: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(is_rotated_backup)
                .unwrap_or(false)
        })
        .collect();
    rotated.sort();

    if rotated.len() <= MAX_ROTATED_BACKUPS {
        return Ok(Vec::new());
    }
    let excess = rotated.len() - MAX_ROTATED_BACKUPS;
    let stale: Vec<PathBuf> = rotated.into_iter().take(excess).collect();
    for path in &stale {
        fs::remove_file(path).map_err(|err| OpmError::io("remove", path, err))?;
    }
    Ok(stale)
}
