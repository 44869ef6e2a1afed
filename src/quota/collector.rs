use super::client::{
    default_google_models_client, default_google_refresh_client, default_openai_usage_client,
    FetchError, GoogleModelsClient, GoogleRefreshClient, OpenAiUsageClient, QuotaEndpoints,
};
use super::report::{
    antigravity_tag, clamp_percent, usage_window, value_as_f64, Provider, QuotaResult,
    QuotaWindow, ACTIVE_PRESET_TAG,
};
use crate::diff::AuthMap;
use crate::fsutil::{token_fingerprint, truncate_chars};
use crate::tokens::{
    extract_google, extract_openai, openai_account_id_from_jwt, AntigravityAccount, GoogleToken,
    OpenAiToken,
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const MAX_QUOTA_CONCURRENCY: usize = 4;
const UNKNOWN_PROJECT: &str = "unknown-project";
const OPENAI_ERROR_BODY_CHARS: usize = 120;
const GOOGLE_ERROR_BODY_CHARS: usize = 100;

/// One unique token and every source that referenced it.
#[derive(Debug, Clone)]
enum QuotaJob {
    OpenAi {
        token: OpenAiToken,
        presets: Vec<String>,
    },
    Google {
        token: GoogleToken,
        presets: Vec<String>,
        /// Replaces an absent or placeholder account id in the results.
        account_fallback: Option<String>,
    },
}

pub struct QuotaCollector {
    openai_usage_client: OpenAiUsageClient,
    google_models_client: GoogleModelsClient,
    google_refresh_client: GoogleRefreshClient,
}

impl QuotaCollector {
    pub fn new(endpoints: QuotaEndpoints) -> Self {
        let usage_endpoints = endpoints.clone();
        let openai_usage_client: OpenAiUsageClient = Arc::new(move |access_token, account_id| {
            default_openai_usage_client(
                &usage_endpoints.openai_usage_url,
                usage_endpoints.timeout,
                access_token,
                account_id,
            )
        });

        let models_endpoints = endpoints.clone();
        let google_models_client: GoogleModelsClient = Arc::new(move |access_token, project_id| {
            default_google_models_client(
                &models_endpoints.google_models_url,
                models_endpoints.timeout,
                access_token,
                project_id,
            )
        });

        let google_refresh_client: GoogleRefreshClient =
            Arc::new(move |refresh_token| default_google_refresh_client(&endpoints, refresh_token));

        Self::with_clients(openai_usage_client, google_models_client, google_refresh_client)
    }

    pub fn with_clients(
        openai_usage_client: OpenAiUsageClient,
        google_models_client: GoogleModelsClient,
        google_refresh_client: GoogleRefreshClient,
    ) -> Self {
        Self {
            openai_usage_client,
            google_models_client,
            google_refresh_client,
        }
    }

    /// One result per unique OpenAI access token across `presets`.
    pub fn collect_openai(&self, presets: &[(String, AuthMap)]) -> Vec<QuotaResult> {
        self.run_jobs(&openai_jobs(presets), Utc::now())
    }

    /// Google quota per unique refresh (else access) token. Not part of
    /// [`collect_all`](Self::collect_all): stale preset tokens mostly produce noise.
    pub fn collect_google(&self, presets: &[(String, AuthMap)]) -> Vec<QuotaResult> {
        self.run_jobs(&google_jobs(presets), Utc::now())
    }

    /// Quota for the live auth file's OpenAI grant plus every Antigravity account.
    pub fn collect_active(
        &self,
        live_auth: Option<&AuthMap>,
        accounts: &[AntigravityAccount],
    ) -> Vec<QuotaResult> {
        self.run_jobs(&active_jobs(live_auth, accounts), Utc::now())
    }

    pub fn collect_all(
        &self,
        live_auth: Option<&AuthMap>,
        accounts: &[AntigravityAccount],
        presets: &[(String, AuthMap)],
    ) -> Vec<QuotaResult> {
        let mut jobs = active_jobs(live_auth, accounts);
        jobs.extend(openai_jobs(presets));
        self.run_jobs(&jobs, Utc::now())
    }

    /// Fans jobs out at most `MAX_QUOTA_CONCURRENCY` at a time. Output order
    /// follows job order, not completion order.
    fn run_jobs(&self, jobs: &[QuotaJob], now: DateTime<Utc>) -> Vec<QuotaResult> {
        let mut results = Vec::new();
        for chunk in jobs.chunks(MAX_QUOTA_CONCURRENCY) {
            let batches: Vec<Vec<QuotaResult>> =
                chunk.par_iter().map(|job| self.run_job(job, now)).collect();
            results.extend(batches.into_iter().flatten());
        }
        results
    }

    fn run_job(&self, job: &QuotaJob, now: DateTime<Utc>) -> Vec<QuotaResult> {
        match job {
            QuotaJob::OpenAi { token, presets } => {
                let mut result = self.fetch_openai(token, now);
                result.presets = presets.clone();
                vec![result]
            }
            QuotaJob::Google {
                token,
                presets,
                account_fallback,
            } => {
                let mut results = self.fetch_google(
                    token.access.as_deref(),
                    token.refresh.as_deref(),
                    token.project_id.as_deref(),
                );
                for result in &mut results {
                    result.presets = presets.clone();
                    let placeholder = matches!(
                        result.account_id.as_deref(),
                        None | Some(UNKNOWN_PROJECT)
                    );
                    if placeholder && account_fallback.is_some() {
                        result.account_id = account_fallback.clone();
                    }
                }
                results
            }
        }
    }

    pub fn fetch_openai(&self, token: &OpenAiToken, now: DateTime<Utc>) -> QuotaResult {
        if let Some(expires) = token.expires {
            if expires < now.timestamp_millis() as f64 {
                return QuotaResult::failure(
                    Provider::OpenAi,
                    token.account_id.clone(),
                    "Token expired",
                );
            }
        }

        let account_id = token
            .account_id
            .clone()
            .or_else(|| openai_account_id_from_jwt(&token.access));
        let data = match (self.openai_usage_client)(&token.access, account_id.as_deref()) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(
                    provider = "openai",
                    token = %token_fingerprint(Some(&token.access)),
                    error = %err,
                    "usage fetch failed"
                );
                let message = match err {
                    FetchError::Http { status, body } => format!(
                        "OpenAI API error {}: {}",
                        status,
                        truncate_chars(&body, OPENAI_ERROR_BODY_CHARS)
                    ),
                    other => other.to_string(),
                };
                return QuotaResult::failure(Provider::OpenAi, account_id, message);
            }
        };

        let rate_limit = data.get("rate_limit");
        let window = |key: &str| {
            rate_limit
                .and_then(|limits| limits.get(key))
                .and_then(|value| usage_window(value, now))
        };
        QuotaResult {
            provider: Provider::OpenAi,
            account_id,
            daily: window("primary_window"),
            weekly: window("secondary_window"),
            error: None,
            presets: Vec::new(),
        }
    }

    /// Model quotas for one Google grant. A missing access token is obtained
    /// from `refresh` first; a 401 on a pre-existing access token triggers
    /// exactly one refresh-and-retry.
    pub fn fetch_google(
        &self,
        access: Option<&str>,
        refresh: Option<&str>,
        project_id: Option<&str>,
    ) -> Vec<QuotaResult> {
        let account_id = project_id.map(str::to_string);
        let failure = |message: String| {
            vec![QuotaResult::failure(
                Provider::Google,
                account_id.clone(),
                message,
            )]
        };

        let (token, refreshed) = match (access, refresh) {
            (Some(access), _) => (Some(access.to_string()), false),
            (None, Some(refresh)) => ((self.google_refresh_client)(refresh), true),
            (None, None) => (None, false),
        };
        let Some(token) = token else {
            return vec![QuotaResult::failure(
                Provider::Google,
                Some(project_id.unwrap_or("unknown").to_string()),
                "No access token (Refresh failed)",
            )];
        };

        let request_project = project_id.unwrap_or(UNKNOWN_PROJECT);
        let data = match (self.google_models_client)(&token, request_project) {
            Ok(data) => data,
            Err(err) if err.is_unauthorized() && !refreshed && refresh.is_some() => {
                tracing::info!(
                    provider = "google",
                    token = %token_fingerprint(refresh),
                    "access token rejected, refreshing once"
                );
                let Some(fresh) = refresh.and_then(|refresh| (self.google_refresh_client)(refresh))
                else {
                    return failure("Token expired (Refresh failed)".to_string());
                };
                match (self.google_models_client)(&fresh, request_project) {
                    Ok(data) => data,
                    Err(err) => return failure(format!("Retry failed: {}", err)),
                }
            }
            Err(err) => {
                tracing::warn!(
                    provider = "google",
                    token = %token_fingerprint(refresh.or(access)),
                    error = %err,
                    "model quota fetch failed"
                );
                let message = match err {
                    FetchError::Http { status, body } => format!(
                        "HTTP {}: {}",
                        status,
                        truncate_chars(&body, GOOGLE_ERROR_BODY_CHARS)
                    ),
                    other => other.to_string(),
                };
                return failure(message);
            }
        };

        let no_data = match &data {
            Value::Object(map) => map.is_empty(),
            _ => true,
        };
        if no_data {
            return failure("No data received".to_string());
        }

        let mut results: Vec<QuotaResult> = data
            .get("models")
            .and_then(Value::as_object)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|(key, model)| google_model_window(key, model))
                    .map(|window| QuotaResult {
                        provider: Provider::Google,
                        account_id: account_id.clone(),
                        daily: Some(window),
                        weekly: None,
                        error: None,
                        presets: Vec::new(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if results.is_empty() {
            return failure("No quota info found".to_string());
        }
        results.sort_by(|left, right| {
            let label = |result: &QuotaResult| {
                result
                    .daily
                    .as_ref()
                    .and_then(|window| window.label.clone())
                    .unwrap_or_default()
            };
            label(left).cmp(&label(right))
        });
        results
    }
}

fn openai_jobs(presets: &[(String, AuthMap)]) -> Vec<QuotaJob> {
    let mut jobs: Vec<QuotaJob> = Vec::new();
    let mut index_by_access: HashMap<String, usize> = HashMap::new();
    for (name, auth) in presets {
        let Some(token) = extract_openai(auth) else {
            continue;
        };
        match index_by_access.get(&token.access) {
            Some(&index) => {
                if let QuotaJob::OpenAi { presets, .. } = &mut jobs[index] {
                    presets.push(name.clone());
                }
            }
            None => {
                index_by_access.insert(token.access.clone(), jobs.len());
                jobs.push(QuotaJob::OpenAi {
                    token,
                    presets: vec![name.clone()],
                });
            }
        }
    }
    sort_job_presets(jobs)
}

fn google_jobs(presets: &[(String, AuthMap)]) -> Vec<QuotaJob> {
    let mut jobs: Vec<QuotaJob> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();
    for (name, auth) in presets {
        let Some(token) = extract_google(auth) else {
            continue;
        };
        let Some(key) = token.dedup_key().map(str::to_string) else {
            continue;
        };
        match index_by_key.get(&key) {
            Some(&index) => {
                if let QuotaJob::Google { presets, .. } = &mut jobs[index] {
                    presets.push(name.clone());
                }
            }
            None => {
                index_by_key.insert(key, jobs.len());
                jobs.push(QuotaJob::Google {
                    token,
                    presets: vec![name.clone()],
                    account_fallback: None,
                });
            }
        }
    }
    sort_job_presets(jobs)
}

fn active_jobs(live_auth: Option<&AuthMap>, accounts: &[AntigravityAccount]) -> Vec<QuotaJob> {
    let mut jobs = Vec::new();
    if let Some(token) = live_auth.and_then(extract_openai) {
        jobs.push(QuotaJob::OpenAi {
            token,
            presets: vec![ACTIVE_PRESET_TAG.to_string()],
        });
    }
    for account in accounts {
        jobs.push(QuotaJob::Google {
            token: GoogleToken {
                access: None,
                refresh: Some(account.refresh.clone()),
                expires: None,
                project_id: account.project_id.clone(),
            },
            presets: vec![antigravity_tag(account.email.as_deref())],
            account_fallback: account.project_id.clone(),
        });
    }
    jobs
}

fn sort_job_presets(mut jobs: Vec<QuotaJob>) -> Vec<QuotaJob> {
    for job in &mut jobs {
        match job {
            QuotaJob::OpenAi { presets, .. } | QuotaJob::Google { presets, .. } => presets.sort(),
        }
    }
    jobs
}

/// Display label by substring match on the model key, else the API's display name.
pub fn google_model_label(key: &str, model: &Value) -> String {
    let lower = key.to_lowercase();
    if lower.contains("flash") {
        "G3Flash".to_string()
    } else if lower.contains("pro") {
        "G3Pro".to_string()
    } else if lower.contains("claude") {
        "Claude".to_string()
    } else if lower.contains("gpt") || lower.contains("o1") {
        "GPT/O1".to_string()
    } else {
        model
            .get("displayName")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(key)
            .to_string()
    }
}

fn google_model_window(key: &str, model: &Value) -> Option<QuotaWindow> {
    let quota_info = model.get("quotaInfo").filter(|info| match info {
        Value::Object(map) => !map.is_empty(),
        _ => false,
    })?;
    let remaining = quota_info
        .get("remainingFraction")
        .and_then(value_as_f64)
        .unwrap_or(0.0);
    Some(QuotaWindow {
        percent_remaining: clamp_percent(remaining * 100.0),
        reset_time_iso: quota_info
            .get("resetTime")
            .and_then(Value::as_str)
            .map(str::to_string),
        label: Some(google_model_label(key, model)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::test_jwt;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().expect("valid date")
    }

    fn auth(value: Value) -> AuthMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("test mapping must be an object"),
        }
    }

    fn openai_preset(name: &str, access: &str) -> (String, AuthMap) {
        (
            name.to_string(),
            auth(json!({"openai": {"type": "oauth", "access": access, "accountId": "acct"}})),
        )
    }

    fn usage_body() -> Value {
        json!({"rate_limit": {
            "primary_window": {"used_percent": 25, "reset_after_seconds": 3600},
            "secondary_window": {"used_percent": 90, "reset_at": 1_767_600_000}
        }})
    }

    fn models_body() -> Value {
        json!({"models": {
            "gemini-3-pro-high": {"quotaInfo": {"remainingFraction": 0.5, "resetTime": "2026-01-02T00:00:00Z"}},
            "gemini-3-flash": {"quotaInfo": {"remainingFraction": 1.0}},
            "claude-opus-4-5": {"quotaInfo": {"remainingFraction": 0.254}},
            "chat-model": {"displayName": "Chat", "quotaInfo": {"remainingFraction": 0.1}},
            "no-quota": {"displayName": "Nothing"}
        }})
    }

    #[derive(Default)]
    struct Calls {
        usage: AtomicUsize,
        models_tokens: Mutex<Vec<String>>,
        refreshes: AtomicUsize,
    }

    fn collector_with(
        calls: Arc<Calls>,
        usage: impl Fn(&str) -> Result<Value, FetchError> + Send + Sync + 'static,
        models: impl Fn(&str) -> Result<Value, FetchError> + Send + Sync + 'static,
        refresh: Option<&'static str>,
    ) -> QuotaCollector {
        let usage_calls = calls.clone();
        let models_calls = calls.clone();
        let refresh_calls = calls;
        QuotaCollector::with_clients(
            Arc::new(move |access, _account| {
                usage_calls.usage.fetch_add(1, Ordering::SeqCst);
                usage(access)
            }),
            Arc::new(move |token, _project| {
                if let Ok(mut tokens) = models_calls.models_tokens.lock() {
                    tokens.push(token.to_string());
                }
                models(token)
            }),
            Arc::new(move |_refresh| {
                refresh_calls.refreshes.fetch_add(1, Ordering::SeqCst);
                refresh.map(str::to_string)
            }),
        )
    }

    #[test]
    fn expired_openai_token_skips_network() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(calls.clone(), |_| Ok(usage_body()), |_| Ok(json!({})), None);
        let token = OpenAiToken {
            access: "at".to_string(),
            expires: Some(1_000.0),
            account_id: Some("acct".to_string()),
        };
        let result = collector.fetch_openai(&token, fixed_now());
        assert_eq!(result.error.as_deref(), Some("Token expired"));
        assert_eq!(result.account_id.as_deref(), Some("acct"));
        assert!(result.daily.is_none() && result.weekly.is_none());
        assert_eq!(calls.usage.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn openai_windows_are_normalized() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(calls, |_| Ok(usage_body()), |_| Ok(json!({})), None);
        let token = OpenAiToken {
            access: test_jwt(&json!({"https://api.openai.com/auth": {"chatgpt_account_id": "jwt-acct"}})),
            expires: Some(4_000_000_000_000.0),
            account_id: None,
        };
        let result = collector.fetch_openai(&token, fixed_now());
        assert_eq!(result.account_id.as_deref(), Some("jwt-acct"));
        assert!(result.error.is_none());
        let daily = result.daily.expect("daily");
        assert_eq!(daily.percent_remaining, 75);
        assert_eq!(daily.reset_time_iso.as_deref(), Some("2026-01-01T13:00:00Z"));
        let weekly = result.weekly.expect("weekly");
        assert_eq!(weekly.percent_remaining, 10);
        assert_eq!(weekly.reset_time_iso.as_deref(), Some("2026-01-05T08:00:00Z"));
    }

    #[test]
    fn openai_http_error_truncates_body() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls,
            |_| {
                Err(FetchError::Http {
                    status: 403,
                    body: "x".repeat(300),
                })
            },
            |_| Ok(json!({})),
            None,
        );
        let token = OpenAiToken {
            access: "at".to_string(),
            expires: None,
            account_id: None,
        };
        let result = collector.fetch_openai(&token, fixed_now());
        let message = result.error.expect("error");
        assert_eq!(message, format!("OpenAI API error 403: {}", "x".repeat(120)));
        assert!(result.account_id.is_none());
    }

    #[test]
    fn shared_access_tokens_are_fetched_once() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(calls.clone(), |_| Ok(usage_body()), |_| Ok(json!({})), None);
        let presets = vec![
            openai_preset("work", "shared"),
            openai_preset("alt", "other"),
            openai_preset("home", "shared"),
            ("google-only".to_string(), auth(json!({"google": {"type": "oauth"}}))),
        ];

        let results = collector.collect_openai(&presets);
        assert_eq!(calls.usage.load(Ordering::SeqCst), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].presets, vec!["home".to_string(), "work".to_string()]);
        assert_eq!(results[1].presets, vec!["alt".to_string()]);
    }

    #[test]
    fn one_failing_token_does_not_affect_others() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls,
            |access| {
                if access == "bad" {
                    Err(FetchError::Transport("connection reset".to_string()))
                } else {
                    Ok(usage_body())
                }
            },
            |_| Ok(json!({})),
            None,
        );
        let presets: Vec<(String, AuthMap)> = (0..9)
            .map(|index| {
                let access = if index == 4 { "bad".to_string() } else { format!("tok-{index}") };
                openai_preset(&format!("p{index}"), &access)
            })
            .collect();

        let results = collector.collect_openai(&presets);
        assert_eq!(results.len(), 9);
        for (index, result) in results.iter().enumerate() {
            assert_eq!(result.presets, vec![format!("p{index}")]);
            if index == 4 {
                assert_eq!(result.error.as_deref(), Some("connection reset"));
            } else {
                assert!(result.error.is_none());
            }
        }
    }

    #[test]
    fn malformed_usage_response_is_isolated_to_its_token() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls,
            |access| {
                if access == "garbled" {
                    Err(FetchError::Decode("expected value at line 1 column 1".to_string()))
                } else {
                    Ok(usage_body())
                }
            },
            |_| Ok(json!({})),
            None,
        );
        let presets = vec![
            openai_preset("a", "fine-1"),
            openai_preset("b", "garbled"),
            openai_preset("c", "fine-2"),
        ];

        let results = collector.collect_openai(&presets);
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[1].error.as_deref(),
            Some("invalid JSON response: expected value at line 1 column 1")
        );
        assert!(results[1].daily.is_none() && results[1].weekly.is_none());
        for index in [0, 2] {
            assert!(results[index].error.is_none());
            assert_eq!(results[index].daily.as_ref().map(|w| w.percent_remaining), Some(75));
        }
    }

    #[test]
    fn malformed_models_response_is_reported_not_raised() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls,
            |_| Ok(json!({})),
            |_| Err(FetchError::Decode("trailing characters".to_string())),
            None,
        );
        let results = collector.fetch_google(Some("at"), None, Some("proj"));
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].error.as_deref(),
            Some("invalid JSON response: trailing characters")
        );
        assert_eq!(results[0].account_id.as_deref(), Some("proj"));
    }

    #[test]
    fn google_models_become_sorted_labelled_results() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(calls, |_| Ok(json!({})), |_| Ok(models_body()), None);
        let results = collector.fetch_google(Some("at"), None, Some("proj"));
        let labels: Vec<String> = results
            .iter()
            .filter_map(|result| result.daily.as_ref().and_then(|window| window.label.clone()))
            .collect();
        assert_eq!(labels, vec!["Chat", "Claude", "G3Flash", "G3Pro"]);
        assert_eq!(results[1].daily.as_ref().map(|w| w.percent_remaining), Some(25));
        assert_eq!(
            results[3].daily.as_ref().and_then(|w| w.reset_time_iso.as_deref()),
            Some("2026-01-02T00:00:00Z")
        );
        assert!(results.iter().all(|result| result.account_id.as_deref() == Some("proj")));
    }

    #[test]
    fn google_without_quota_info_reports_single_error() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls,
            |_| Ok(json!({})),
            |_| Ok(json!({"models": {"x": {"displayName": "X"}}})),
            None,
        );
        let results = collector.fetch_google(Some("at"), None, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error.as_deref(), Some("No quota info found"));
    }

    #[test]
    fn google_refresh_first_when_no_access_token() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls.clone(),
            |_| Ok(json!({})),
            |_| Err(FetchError::Http { status: 401, body: String::new() }),
            Some("fresh"),
        );
        let results = collector.fetch_google(None, Some("rt"), Some("proj"));
        assert_eq!(calls.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(results[0].error.as_deref(), Some("HTTP 401: "));
        assert_eq!(
            *calls.models_tokens.lock().expect("tokens"),
            vec!["fresh".to_string()]
        );
    }

    #[test]
    fn google_failed_refresh_without_access_token() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(calls.clone(), |_| Ok(json!({})), |_| Ok(models_body()), None);
        let results = collector.fetch_google(None, Some("rt"), None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error.as_deref(), Some("No access token (Refresh failed)"));
        assert_eq!(results[0].account_id.as_deref(), Some("unknown"));
        assert!(calls.models_tokens.lock().expect("tokens").is_empty());
    }

    #[test]
    fn google_401_refreshes_and_retries_once() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls.clone(),
            |_| Ok(json!({})),
            |token| {
                if token == "stale" {
                    Err(FetchError::Http { status: 401, body: "expired".to_string() })
                } else {
                    Ok(models_body())
                }
            },
            Some("fresh"),
        );
        let results = collector.fetch_google(Some("stale"), Some("rt"), Some("proj"));
        assert!(results.iter().all(|result| result.error.is_none()));
        assert_eq!(calls.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(
            *calls.models_tokens.lock().expect("tokens"),
            vec!["stale".to_string(), "fresh".to_string()]
        );
    }

    #[test]
    fn google_retry_failure_is_terminal() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls.clone(),
            |_| Ok(json!({})),
            |_| Err(FetchError::Http { status: 401, body: "nope".to_string() }),
            Some("fresh"),
        );
        let results = collector.fetch_google(Some("stale"), Some("rt"), Some("proj"));
        assert_eq!(results[0].error.as_deref(), Some("Retry failed: HTTP 401: nope"));
        assert_eq!(calls.models_tokens.lock().expect("tokens").len(), 2);

        let no_refresh = collector_with(
            Arc::new(Calls::default()),
            |_| Ok(json!({})),
            |_| Err(FetchError::Http { status: 401, body: "nope".to_string() }),
            None,
        );
        let results = no_refresh.fetch_google(Some("stale"), Some("rt"), Some("proj"));
        assert_eq!(results[0].error.as_deref(), Some("Token expired (Refresh failed)"));
    }

    #[test]
    fn google_401_without_refresh_token_is_plain_error() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls.clone(),
            |_| Ok(json!({})),
            |_| Err(FetchError::Http { status: 401, body: "b".repeat(150) }),
            Some("fresh"),
        );
        let results = collector.fetch_google(Some("stale"), None, Some("proj"));
        assert_eq!(results[0].error, Some(format!("HTTP 401: {}", "b".repeat(100))));
        assert_eq!(calls.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_google_response_is_no_data() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(calls, |_| Ok(json!({})), |_| Ok(json!({})), None);
        let results = collector.fetch_google(Some("at"), None, Some("proj"));
        assert_eq!(results[0].error.as_deref(), Some("No data received"));
    }

    #[test]
    fn google_presets_dedup_by_refresh_token() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(calls.clone(), |_| Ok(json!({})), |_| Ok(models_body()), None);
        let google = |access: &str| {
            auth(json!({"google": {"type": "oauth", "access": access, "refresh": "shared-rt"}}))
        };
        let presets = vec![
            ("b".to_string(), google("at-1")),
            ("a".to_string(), google("at-2")),
        ];
        let results = collector.collect_google(&presets);
        assert_eq!(results.len(), 4);
        assert!(results
            .iter()
            .all(|result| result.presets == vec!["a".to_string(), "b".to_string()]));
        assert_eq!(
            *calls.models_tokens.lock().expect("tokens"),
            vec!["at-1".to_string()]
        );
    }

    #[test]
    fn active_collection_tags_live_and_antigravity_sources() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(
            calls,
            |_| Ok(usage_body()),
            |_| Ok(json!({"models": {"gemini-3-flash": {"quotaInfo": {"remainingFraction": 0.8}}}})),
            Some("fresh"),
        );
        let live = auth(json!({"openai": {"type": "oauth", "access": "live", "accountId": "acct"}}));
        let accounts = vec![
            AntigravityAccount {
                refresh: "rt-1".to_string(),
                project_id: Some("proj-1".to_string()),
                email: Some("a@example.com".to_string()),
            },
            AntigravityAccount {
                refresh: "rt-2".to_string(),
                project_id: None,
                email: None,
            },
        ];

        let results = collector.collect_active(Some(&live), &accounts);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].presets, vec![ACTIVE_PRESET_TAG.to_string()]);
        assert_eq!(results[1].presets, vec!["(Antigravity: a@example.com)".to_string()]);
        assert_eq!(results[1].account_id.as_deref(), Some("proj-1"));
        assert_eq!(results[2].presets, vec!["(Antigravity: User)".to_string()]);
        assert!(results[2].account_id.is_none());
    }

    #[test]
    fn collect_all_excludes_google_presets() {
        let calls = Arc::new(Calls::default());
        let collector = collector_with(calls.clone(), |_| Ok(usage_body()), |_| Ok(models_body()), None);
        let presets = vec![
            openai_preset("work", "shared"),
            (
                "gcp".to_string(),
                auth(json!({"google": {"type": "oauth", "access": "g", "refresh": "r"}})),
            ),
        ];
        let results = collector.collect_all(None, &[], &presets);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider, Provider::OpenAi);
        assert!(calls.models_tokens.lock().expect("tokens").is_empty());
    }

    #[test]
    fn model_labels() {
        let empty = json!({});
        assert_eq!(google_model_label("gemini-2.5-flash-lite", &empty), "G3Flash");
        assert_eq!(google_model_label("Gemini-3-PRO-low", &empty), "G3Pro");
        assert_eq!(google_model_label("claude-sonnet-4-5", &empty), "Claude");
        assert_eq!(google_model_label("gpt-oss-120b", &empty), "GPT/O1");
        assert_eq!(google_model_label("o1-mini", &empty), "GPT/O1");
        assert_eq!(google_model_label("imagen", &json!({"displayName": "Imagen 4"})), "Imagen 4");
        assert_eq!(google_model_label("imagen", &empty), "imagen");
    }
}
