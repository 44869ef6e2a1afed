//! Set differences and selective merges over credential mappings.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Service name -> provider-defined credential entry.
pub type AuthMap = Map<String, Value>;

/// Four disjoint, sorted partitions of the union of both key sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
}

impl AuthDiff {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty())
    }
}

pub fn diff(old: &AuthMap, new: &AuthMap) -> AuthDiff {
    let old_keys: BTreeSet<&String> = old.keys().collect();
    let new_keys: BTreeSet<&String> = new.keys().collect();

    let mut result = AuthDiff {
        added: new_keys.difference(&old_keys).map(|key| key.to_string()).collect(),
        removed: old_keys.difference(&new_keys).map(|key| key.to_string()).collect(),
        ..AuthDiff::default()
    };
    for key in old_keys.intersection(&new_keys) {
        if old.get(*key) == new.get(*key) {
            result.unchanged.push(key.to_string());
        } else {
            result.modified.push(key.to_string());
        }
    }
    result
}

/// `None` replaces everything with `new`. Otherwise starts from `old` and, for
/// each selected service, copies it from `new` or drops it when `new` lacks it.
pub fn merge(old: &AuthMap, new: &AuthMap, selected_services: Option<&[String]>) -> AuthMap {
    let Some(selected) = selected_services else {
        return new.clone();
    };

    let mut merged = old.clone();
    for service in selected {
        match new.get(service) {
            Some(entry) => {
                merged.insert(service.clone(), entry.clone());
            }
            None => {
                merged.remove(service);
            }
        }
    }
    merged
}
