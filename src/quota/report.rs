use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Preset-list tag for the live auth file's own quota.
pub const ACTIVE_PRESET_TAG: &str = "(Current Active)";
pub const RESETTING: &str = "Resetting...";
const MILLISECONDS_THRESHOLD: f64 = 100_000_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Google,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaWindow {
    pub percent_remaining: u8,
    pub reset_time_iso: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaResult {
    pub provider: Provider,
    pub account_id: Option<String>,
    pub daily: Option<QuotaWindow>,
    pub weekly: Option<QuotaWindow>,
    pub error: Option<String>,
    pub presets: Vec<String>,
}

impl QuotaResult {
    pub fn failure(provider: Provider, account_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            provider,
            account_id,
            daily: None,
            weekly: None,
            error: Some(error.into()),
            presets: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.presets.iter().any(|preset| preset == ACTIVE_PRESET_TAG)
    }
}

pub fn antigravity_tag(email: Option<&str>) -> String {
    format!("(Antigravity: {})", email.unwrap_or("User"))
}

pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// `clamp(100 - used_percent, 0, 100)`, rounded; a missing `used_percent` counts as 0.
pub fn remaining_percent(window: &Value) -> u8 {
    let used = window
        .get("used_percent")
        .and_then(value_as_f64)
        .unwrap_or(0.0);
    clamp_percent(100.0 - used)
}

pub(crate) fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}

fn iso_z(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Absolute reset epoch; values above 1e11 are taken as milliseconds.
pub fn reset_time_iso_from_epoch(reset_at: f64) -> Option<String> {
    if !reset_at.is_finite() || reset_at == 0.0 {
        return None;
    }
    let seconds = if reset_at > MILLISECONDS_THRESHOLD {
        reset_at / 1000.0
    } else {
        reset_at
    };
    DateTime::<Utc>::from_timestamp_millis((seconds * 1000.0).round() as i64).map(iso_z)
}

pub fn reset_time_iso_from_now(reset_after_seconds: f64, now: DateTime<Utc>) -> Option<String> {
    if !reset_after_seconds.is_finite() || reset_after_seconds <= 0.0 {
        return None;
    }
    let offset = chrono::Duration::milliseconds((reset_after_seconds * 1000.0).round() as i64);
    now.checked_add_signed(offset).map(iso_z)
}

/// Window from a usage-API object carrying `used_percent` and either
/// `reset_at` or `reset_after_seconds`.
pub fn usage_window(window: &Value, now: DateTime<Utc>) -> Option<QuotaWindow> {
    if !window.is_object() {
        return None;
    }
    let reset_time_iso = window
        .get("reset_at")
        .and_then(value_as_f64)
        .and_then(reset_time_iso_from_epoch)
        .or_else(|| {
            window
                .get("reset_after_seconds")
                .and_then(value_as_f64)
                .and_then(|seconds| reset_time_iso_from_now(seconds, now))
        });
    Some(QuotaWindow {
        percent_remaining: remaining_percent(window),
        reset_time_iso,
        label: None,
    })
}

fn parse_reset_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Human countdown to `reset_time_iso`: `"-"` when absent or unparseable,
/// `"Resetting..."` once past, otherwise `"<h>h <m>m"` or `"<m>m"`.
pub fn time_until_reset(reset_time_iso: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(raw) = reset_time_iso.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return "-".to_string();
    };
    let Some(reset_at) = parse_reset_time(raw) else {
        return "-".to_string();
    };

    let total_seconds = (reset_at - now).num_seconds();
    if reset_at < now {
        return RESETTING.to_string();
    }
    let hours = total_seconds / 3_600;
    let mut minutes = (total_seconds % 3_600) / 60;
    if total_seconds > 0 && hours == 0 && minutes == 0 {
        minutes = 1;
    }
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
