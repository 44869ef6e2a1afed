//! The operations a front end drives: preset management plus quota reporting.

use crate::config::{default_home_dir, OpmPaths};
use crate::diff::AuthMap;
use crate::error::OpmResult;
use crate::preset::{PresetInfo, PresetStore, PresetSummary, SwitchOutcome};
use crate::quota::{QuotaCollector, QuotaEndpoints, QuotaResult};
use crate::tokens::{load_antigravity_accounts, AntigravityAccount};
use std::path::{Path, PathBuf};

pub struct PresetManager {
    store: PresetStore,
    collector: QuotaCollector,
}

impl PresetManager {
    /// Layout and endpoints from the environment, rooted at `$HOME`.
    pub fn from_env() -> OpmResult<Self> {
        let paths = OpmPaths::from_env(default_home_dir());
        Self::open(paths, QuotaEndpoints::from_env())
    }

    pub fn open(paths: OpmPaths, endpoints: QuotaEndpoints) -> OpmResult<Self> {
        Self::with_collector(paths, QuotaCollector::new(endpoints))
    }

    pub fn with_collector(paths: OpmPaths, collector: QuotaCollector) -> OpmResult<Self> {
        Ok(Self {
            store: PresetStore::open(paths)?,
            collector,
        })
    }

    pub fn list_presets(&self) -> OpmResult<Vec<PresetSummary>> {
        self.store.list()
    }

    pub fn save_preset(
        &mut self,
        name: &str,
        description: &str,
        watched_services: Option<Vec<String>>,
    ) -> OpmResult<()> {
        self.store.save(name, description, watched_services)
    }

    /// Full replace of the live file, backing it up first.
    pub fn switch_preset(&mut self, name: &str) -> OpmResult<SwitchOutcome> {
        self.store.switch(name, None, true)
    }

    pub fn switch_preset_selective(
        &mut self,
        name: &str,
        services: Vec<String>,
    ) -> OpmResult<SwitchOutcome> {
        self.store.switch(name, Some(services), true)
    }

    pub fn switch_preset_with(
        &mut self,
        name: &str,
        services: Option<Vec<String>>,
        auto_backup: bool,
    ) -> OpmResult<SwitchOutcome> {
        self.store.switch(name, services, auto_backup)
    }

    pub fn delete_preset(&mut self, name: &str) -> OpmResult<()> {
        self.store.delete(name)
    }

    pub fn get_preset_info(&self, name: &str) -> OpmResult<Option<PresetInfo>> {
        self.store.get(name)
    }

    pub fn detect_current_preset(&self) -> Option<String> {
        self.store.detect_current()
    }

    pub fn list_preset_auth_data(&self) -> OpmResult<Vec<(String, AuthMap)>> {
        self.store.list_auth_data()
    }

    pub fn auth_path(&self) -> &Path {
        self.store.auth_path()
    }

    pub fn set_auth_path(&mut self, auth_path: PathBuf) -> OpmResult<()> {
        self.store.set_auth_path(auth_path)
    }

    /// Live credentials and Antigravity accounts first, then every preset's
    /// OpenAI grant. Unreadable inputs are logged and skipped, so this
    /// always returns a list.
    pub fn collect_all_quota(&self) -> Vec<QuotaResult> {
        let live = self.live_auth();
        let accounts = self.antigravity_accounts();
        let presets = self.preset_auth_data();
        self.collector.collect_all(live.as_ref(), &accounts, &presets)
    }

    pub fn collect_active_quota(&self) -> Vec<QuotaResult> {
        let live = self.live_auth();
        let accounts = self.antigravity_accounts();
        self.collector.collect_active(live.as_ref(), &accounts)
    }

    pub fn collect_openai_quota(&self) -> Vec<QuotaResult> {
        self.collector.collect_openai(&self.preset_auth_data())
    }

    pub fn collect_google_quota(&self) -> Vec<QuotaResult> {
        self.collector.collect_google(&self.preset_auth_data())
    }

    fn live_auth(&self) -> Option<AuthMap> {
        match self.store.read_live_auth() {
            Ok(live) => live,
            Err(err) => {
                tracing::warn!(error = %err, "live auth file unreadable, skipping active quota");
                None
            }
        }
    }

    fn antigravity_accounts(&self) -> Vec<AntigravityAccount> {
        let path = self.store.paths().antigravity_accounts_path();
        load_antigravity_accounts(&path).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "antigravity accounts unreadable");
            Vec::new()
        })
    }

    fn preset_auth_data(&self) -> Vec<(String, AuthMap)> {
        self.store.list_auth_data().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "preset directory unreadable");
            Vec::new()
        })
    }
}
