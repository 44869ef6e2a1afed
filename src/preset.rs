//! Named credential snapshots, their metadata, and switching between them.

use crate::backup::{create_backup, pre_switch_backup_name};
use crate::config::{default_watched_services, Config, OpmPaths, PresetMetadata};
use crate::diff::{diff, merge, AuthDiff, AuthMap};
use crate::error::{OpmError, OpmResult};
use crate::fsutil::{read_json_object, with_file_lock, write_file_atomic};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const UNKNOWN_CREATED_AT: &str = "Unknown";
pub const NEVER_USED: &str = "Never";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetSummary {
    pub name: String,
    pub created_at: String,
    pub last_used: String,
    pub description: String,
    pub services: Vec<String>,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetInfo {
    pub name: String,
    /// Always re-read from the preset file, never taken from metadata.
    pub services: Vec<String>,
    pub metadata: Option<PresetMetadata>,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchOutcome {
    pub preset_name: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub diff: AuthDiff,
    pub selected_services: Option<Vec<String>>,
}

pub struct PresetStore {
    paths: OpmPaths,
    config: Config,
}

impl PresetStore {
    pub fn open(paths: OpmPaths) -> OpmResult<Self> {
        paths.ensure_dirs()?;
        let config = Config::load(&paths)?;
        Ok(Self { paths, config })
    }

    pub fn paths(&self) -> &OpmPaths {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn auth_path(&self) -> &Path {
        &self.config.auth_path
    }

    pub fn set_auth_path(&mut self, auth_path: PathBuf) -> OpmResult<()> {
        self.mutate(|_, config| {
            config.auth_path = auth_path;
            Ok(())
        })
    }

    /// Re-reads `config.json` under the lock, applies `operation`, and persists
    /// the result. Nothing is saved when `operation` fails.
    fn mutate<T, F>(&mut self, operation: F) -> OpmResult<T>
    where
        F: FnOnce(&OpmPaths, &mut Config) -> OpmResult<T>,
    {
        let paths = &self.paths;
        let (config, value) = with_file_lock(&paths.lock_file, || {
            let mut config = Config::load(paths)?;
            let value = operation(paths, &mut config)?;
            config.save(paths)?;
            Ok((config, value))
        })?;
        self.config = config;
        Ok(value)
    }

    pub fn save(
        &mut self,
        name: &str,
        description: &str,
        watched_services: Option<Vec<String>>,
    ) -> OpmResult<()> {
        validate_preset_name(name)?;
        let watched_services = watched_services.unwrap_or_else(default_watched_services);

        self.mutate(|paths, config| {
            let auth_path = config.auth_path.clone();
            if !auth_path.exists() {
                return Err(OpmError::AuthFileNotFound(auth_path));
            }
            let (raw, auth) = read_json_object(&auth_path)?;
            write_file_atomic(&paths.preset_path(name), &raw)?;

            let now = utc_now_iso();
            config.presets.insert(
                name.to_string(),
                PresetMetadata {
                    created_at: Some(now.clone()),
                    last_used: Some(now),
                    description: description.to_string(),
                    services: auth.keys().cloned().collect(),
                    watched_services,
                },
            );
            config.current_preset = Some(name.to_string());
            Ok(())
        })?;
        tracing::info!(preset = %name, "saved preset");
        Ok(())
    }

    /// Lexicographic by file name.
    pub fn list(&self) -> OpmResult<Vec<PresetSummary>> {
        let mut presets = Vec::new();
        for (name, path) in self.preset_files()? {
            let services = read_json_object(&path)
                .map(|(_, auth)| auth.keys().cloned().collect())
                .unwrap_or_default();
            let metadata = self.config.presets.get(&name);
            presets.push(PresetSummary {
                created_at: metadata
                    .and_then(|meta| meta.created_at.clone())
                    .unwrap_or_else(|| UNKNOWN_CREATED_AT.to_string()),
                last_used: metadata
                    .and_then(|meta| meta.last_used.clone())
                    .unwrap_or_else(|| NEVER_USED.to_string()),
                description: metadata
                    .map(|meta| meta.description.clone())
                    .unwrap_or_default(),
                services,
                is_current: self.config.is_current(&name),
                name,
            });
        }
        Ok(presets)
    }

    /// `Ok(None)` when no preset file exists under `name`, including names
    /// that could never have been saved.
    pub fn get(&self, name: &str) -> OpmResult<Option<PresetInfo>> {
        if validate_preset_name(name).is_err() {
            return Ok(None);
        }
        let path = self.paths.preset_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let (_, auth) = read_json_object(&path)?;
        Ok(Some(PresetInfo {
            name: name.to_string(),
            services: auth.keys().cloned().collect(),
            metadata: self.config.presets.get(name).cloned(),
            is_current: self.config.is_current(name),
        }))
    }

    pub fn delete(&mut self, name: &str) -> OpmResult<()> {
        validate_preset_name(name)?;
        self.mutate(|paths, config| {
            let path = paths.preset_path(name);
            if !path.exists() {
                return Err(OpmError::PresetNotFound(name.to_string()));
            }
            fs::remove_file(&path).map_err(|err| OpmError::io("remove", &path, err))?;
            config.presets.remove(name);
            if config.is_current(name) {
                config.current_preset = None;
            }
            Ok(())
        })?;
        tracing::info!(preset = %name, "deleted preset");
        Ok(())
    }

    /// First preset, in lexicographic order, whose parsed content equals the
    /// live auth file. Unreadable files on either side never match.
    pub fn detect_current(&self) -> Option<String> {
        let auth_path = self.auth_path();
        let live: Value = fs::read(auth_path)
            .ok()
            .and_then(|data| serde_json::from_slice(&data).ok())?;

        let files = self.preset_files().ok()?;
        files.into_iter().find_map(|(name, path)| {
            let preset: Value = fs::read(&path)
                .ok()
                .and_then(|data| serde_json::from_slice(&data).ok())?;
            (preset == live).then_some(name)
        })
    }

    /// Parsed mappings of every preset, skipping unreadable or non-object files.
    pub fn list_auth_data(&self) -> OpmResult<Vec<(String, AuthMap)>> {
        let mut results = Vec::new();
        for (name, path) in self.preset_files()? {
            match read_json_object(&path) {
                Ok((_, auth)) => results.push((name, auth)),
                Err(err) => tracing::debug!(preset = %name, error = %err, "skipping unreadable preset"),
            }
        }
        Ok(results)
    }

    /// Reads the live auth file, or `None` when it does not exist.
    pub fn read_live_auth(&self) -> OpmResult<Option<AuthMap>> {
        let auth_path = self.auth_path();
        if !auth_path.exists() {
            return Ok(None);
        }
        read_json_object(auth_path).map(|(_, auth)| Some(auth))
    }

    /// Replaces the live auth file with preset `name`, or only the
    /// `selected_services` of it. Every input is read and validated before
    /// the backup, the live-file write, and the config update.
    pub fn switch(
        &mut self,
        name: &str,
        selected_services: Option<Vec<String>>,
        auto_backup: bool,
    ) -> OpmResult<SwitchOutcome> {
        validate_preset_name(name)?;

        let outcome = self.mutate(|paths, config| {
            let preset_path = paths.preset_path(name);
            if !preset_path.exists() {
                return Err(OpmError::PresetNotFound(name.to_string()));
            }
            let auth_path = config.auth_path.clone();
            let auth_exists = auth_path.exists();

            let old = if auth_exists {
                read_json_object(&auth_path)?.1
            } else {
                AuthMap::new()
            };
            let (preset_raw, new) = read_json_object(&preset_path)?;
            let changes = diff(&old, &new);

            let backup_path = if auto_backup && auth_exists {
                create_backup(
                    &auth_path,
                    &paths.backups_dir,
                    Some(&pre_switch_backup_name(name)),
                )?
            } else {
                None
            };

            match selected_services.as_deref() {
                None => write_file_atomic(&auth_path, &preset_raw)?,
                Some(selected) => {
                    let merged = merge(&old, &new, Some(selected));
                    let data = serde_json::to_vec_pretty(&Value::Object(merged))?;
                    write_file_atomic(&auth_path, &data)?;
                }
            }

            if let Some(metadata) = config.presets.get_mut(name) {
                metadata.last_used = Some(utc_now_iso());
            }
            config.current_preset = Some(name.to_string());

            Ok(SwitchOutcome {
                preset_name: name.to_string(),
                source_path: preset_path,
                destination_path: auth_path,
                backup_path,
                diff: changes,
                selected_services,
            })
        })?;

        tracing::info!(
            preset = %name,
            added = ?outcome.diff.added,
            removed = ?outcome.diff.removed,
            modified = ?outcome.diff.modified,
            selective = outcome.selected_services.is_some(),
            "switched preset"
        );
        Ok(outcome)
    }

    fn preset_files(&self) -> OpmResult<Vec<(String, PathBuf)>> {
        let dir = &self.paths.presets_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir).map_err(|err| OpmError::io("list", dir, err))?;
        let mut files: Vec<(String, PathBuf)> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("json"))
            .filter_map(|path| {
                let name = path.file_stem()?.to_str()?.to_string();
                Some((name, path))
            })
            .collect();
        files.sort_by(|left, right| left.1.cmp(&right.1));
        Ok(files)
    }
}

/// Rejects names that could not round-trip as `presets/<name>.json`.
pub fn validate_preset_name(name: &str) -> OpmResult<()> {
    let invalid = name.trim().is_empty()
        || name != name.trim()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(OpmError::InvalidPresetName(name.to_string()));
    }
    Ok(())
}

fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
