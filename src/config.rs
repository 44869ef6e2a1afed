//! Persisted process-wide state and the on-disk layout it lives in.

use crate::error::{OpmError, OpmResult};
use crate::fsutil::write_file_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_WATCHED_SERVICE: &str = "openai";

/// Directory layout under the per-user config root.
#[derive(Debug, Clone)]
pub struct OpmPaths {
    pub home_dir: PathBuf,
    pub root: PathBuf,
    pub presets_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub config_file: PathBuf,
    pub lock_file: PathBuf,
}

impl OpmPaths {
    /// Layout rooted at `$OPM_CONFIG_DIR`, else `<home>/.config/oauth-preset-manager`.
    pub fn from_env(home_dir: PathBuf) -> Self {
        let root = std::env::var("OPM_CONFIG_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join(".config/oauth-preset-manager"));
        Self::with_root(home_dir, root)
    }

    pub fn with_root(home_dir: PathBuf, root: PathBuf) -> Self {
        Self {
            presets_dir: root.join("presets"),
            backups_dir: root.join("backups"),
            config_file: root.join("config.json"),
            lock_file: root.join("config.lock"),
            home_dir,
            root,
        }
    }

    pub fn default_auth_path(&self) -> PathBuf {
        self.home_dir.join(".local/share/opencode/auth.json")
    }

    /// First existing Antigravity account file, else the preferred location.
    pub fn antigravity_accounts_path(&self) -> PathBuf {
        let candidates = [
            self.home_dir.join(".config/opencode/antigravity-accounts.json"),
            self.home_dir
                .join(".local/share/opencode/antigravity-accounts.json"),
        ];
        candidates
            .iter()
            .find(|path| path.exists())
            .unwrap_or(&candidates[0])
            .clone()
    }

    pub fn preset_path(&self, name: &str) -> PathBuf {
        self.presets_dir.join(format!("{}.json", name))
    }

    pub(crate) fn ensure_dirs(&self) -> OpmResult<()> {
        for dir in [&self.presets_dir, &self.backups_dir] {
            fs::create_dir_all(dir).map_err(|err| OpmError::io("create dir", dir, err))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default = "default_watched_services")]
    pub watched_services: Vec<String>,
}

impl Default for PresetMetadata {
    fn default() -> Self {
        Self {
            created_at: None,
            last_used: None,
            description: String::new(),
            services: Vec::new(),
            watched_services: default_watched_services(),
        }
    }
}

pub fn default_watched_services() -> Vec<String> {
    vec![DEFAULT_WATCHED_SERVICE.to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub auth_path: PathBuf,
    #[serde(default)]
    pub current_preset: Option<String>,
    #[serde(default)]
    pub presets: BTreeMap<String, PresetMetadata>,
}

impl Config {
    pub fn new(auth_path: PathBuf) -> Self {
        Self {
            auth_path,
            current_preset: None,
            presets: BTreeMap::new(),
        }
    }

    /// Loads `config.json`, falling back to defaults when it does not exist yet.
    pub fn load(paths: &OpmPaths) -> OpmResult<Self> {
        let path = &paths.config_file;
        if !path.exists() {
            return Ok(Self::new(paths.default_auth_path()));
        }
        let data = fs::read(path).map_err(|err| OpmError::io("read", path, err))?;
        serde_json::from_slice::<Config>(&data).map_err(|source| OpmError::Decode {
            path: path.clone(),
            source,
        })
    }

    pub fn save(&self, paths: &OpmPaths) -> OpmResult<()> {
        let data = serde_json::to_vec_pretty(self)?;
        write_file_atomic(&paths.config_file, &data)
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.current_preset.as_deref() == Some(name)
    }
}

pub fn default_home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
