//! Pulls normalized OAuth token shapes out of raw credential mappings.

use crate::diff::AuthMap;
use crate::error::{OpmError, OpmResult};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;
use std::fs;
use std::path::Path;

const OPENAI_AUTH_CLAIM: &str = "https://api.openai.com/auth";

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiToken {
    pub access: String,
    /// Epoch milliseconds; only numeric values are kept.
    pub expires: Option<f64>,
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoogleToken {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub expires: Option<f64>,
    pub project_id: Option<String>,
}

impl GoogleToken {
    /// Refresh token when present, else access token.
    pub fn dedup_key(&self) -> Option<&str> {
        self.refresh.as_deref().or(self.access.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AntigravityAccount {
    pub refresh: String,
    pub project_id: Option<String>,
    pub email: Option<String>,
}

/// `codex` entry, falling back to `openai`, when it is an OAuth grant with an access token.
pub fn extract_openai(auth: &AuthMap) -> Option<OpenAiToken> {
    let entry = auth
        .get("codex")
        .filter(|value| is_truthy(value))
        .or_else(|| auth.get("openai"))?
        .as_object()?;
    if entry.get("type").and_then(Value::as_str) != Some("oauth") {
        return None;
    }
    let access = non_empty_string(entry.get("access"))?;
    Some(OpenAiToken {
        access,
        expires: entry.get("expires").and_then(Value::as_f64),
        account_id: non_empty_string(entry.get("accountId")),
    })
}

pub fn extract_google(auth: &AuthMap) -> Option<GoogleToken> {
    let entry = auth.get("google")?.as_object()?;
    if entry.get("type").and_then(Value::as_str) != Some("oauth") {
        return None;
    }
    let project_id = ["project_id", "project", "projectId"]
        .iter()
        .find_map(|key| non_empty_string(entry.get(*key)));
    Some(GoogleToken {
        access: non_empty_string(entry.get("access")),
        refresh: non_empty_string(entry.get("refresh")),
        expires: entry.get("expires").and_then(Value::as_f64),
        project_id,
    })
}

/// Accounts with a refresh token from an Antigravity account file. A missing
/// file yields no accounts; an unreadable one is an error for the caller to isolate.
pub fn load_antigravity_accounts(path: &Path) -> OpmResult<Vec<AntigravityAccount>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read(path).map_err(|err| OpmError::io("read", path, err))?;
    let root: Value = serde_json::from_slice(&data).map_err(|source| OpmError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(extract_antigravity_accounts(&root))
}

pub fn extract_antigravity_accounts(root: &Value) -> Vec<AntigravityAccount> {
    let Some(accounts) = root.get("accounts").and_then(Value::as_array) else {
        return Vec::new();
    };
    accounts
        .iter()
        .filter_map(|account| {
            let refresh = non_empty_string(account.get("refreshToken"))?;
            Some(AntigravityAccount {
                refresh,
                project_id: non_empty_string(account.get("projectId"))
                    .or_else(|| non_empty_string(account.get("managedProjectId"))),
                email: non_empty_string(account.get("email")),
            })
        })
        .collect()
}

/// Decodes the payload segment of a three-part JWT.
pub fn decode_jwt_payload(token: &str) -> Option<Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload = parts[1];
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    let value: Value = serde_json::from_slice(&decoded).ok()?;
    value.is_object().then_some(value)
}

pub fn openai_account_id_from_jwt(token: &str) -> Option<String> {
    let payload = decode_jwt_payload(token)?;
    non_empty_string(
        payload
            .get(OPENAI_AUTH_CLAIM)
            .and_then(|claim| claim.get("chatgpt_account_id")),
    )
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(raw)) if !raw.is_empty() => Some(raw.clone()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(raw) => !raw.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
pub(crate) fn test_jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap_or_default());
    format!("{}.{}.sig", header, body)
}
