use crate::fsutil::truncate_chars;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const OPENAI_USAGE_URL: &str = "https://chatgpt.com/backend-api/wham/usage";
pub const GOOGLE_MODELS_URL: &str =
    "https://cloudcode-pa.googleapis.com/v1internal:fetchAvailableModels";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const OPENAI_USER_AGENT: &str = "OpenCode-Quota-Toast/1.0";
const GOOGLE_USER_AGENT: &str = "antigravity/1.11.9";
const ERROR_BODY_LIMIT: usize = 500;

/// `(access_token, account_id)` -> usage JSON.
pub type OpenAiUsageClient =
    Arc<dyn Fn(&str, Option<&str>) -> Result<Value, FetchError> + Send + Sync>;
/// `(access_token, project_id)` -> model listing JSON.
pub type GoogleModelsClient = Arc<dyn Fn(&str, &str) -> Result<Value, FetchError> + Send + Sync>;
/// `refresh_token` -> fresh access token.
pub type GoogleRefreshClient = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("{0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid JSON response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }
}

/// Endpoints and OAuth client credentials, overridable from the environment.
#[derive(Debug, Clone)]
pub struct QuotaEndpoints {
    pub openai_usage_url: String,
    pub google_models_url: String,
    pub google_token_url: String,
    pub google_client_id: String,
    pub google_client_secret: Option<String>,
    pub timeout: Duration,
}

impl Default for QuotaEndpoints {
    fn default() -> Self {
        Self {
            openai_usage_url: OPENAI_USAGE_URL.to_string(),
            google_models_url: GOOGLE_MODELS_URL.to_string(),
            google_token_url: GOOGLE_TOKEN_URL.to_string(),
            google_client_id: GOOGLE_CLIENT_ID.to_string(),
            google_client_secret: None,
            timeout: REQUEST_TIMEOUT,
        }
    }
}

impl QuotaEndpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_usage_url: env_or("OPM_OPENAI_USAGE_URL", defaults.openai_usage_url),
            google_models_url: env_or("OPM_GOOGLE_MODELS_URL", defaults.google_models_url),
            google_token_url: env_or("OPM_GOOGLE_TOKEN_URL", defaults.google_token_url),
            google_client_id: env_or("OPM_GOOGLE_CLIENT_ID", defaults.google_client_id),
            google_client_secret: env_value("OPM_GOOGLE_CLIENT_SECRET"),
            timeout: defaults.timeout,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_or(key: &str, fallback: String) -> String {
    env_value(key).unwrap_or(fallback)
}

fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client, FetchError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| FetchError::Transport(format!("failed to build HTTP client: {}", err)))
}

fn read_json_response(response: reqwest::blocking::Response) -> Result<Value, FetchError> {
    let status = response.status();
    let text = response
        .text()
        .map_err(|err| FetchError::Transport(format!("failed to read response: {}", err)))?;
    parse_json_body(status, &text)
}

/// Non-2xx becomes `Http` with a truncated body; a 2xx that is not JSON is `Decode`.
pub(crate) fn parse_json_body(status: StatusCode, text: &str) -> Result<Value, FetchError> {
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
            body: truncate_chars(text, ERROR_BODY_LIMIT),
        });
    }
    serde_json::from_str(text).map_err(|err| FetchError::Decode(err.to_string()))
}

pub fn default_openai_usage_client(
    endpoint: &str,
    timeout: Duration,
    access_token: &str,
    account_id: Option<&str>,
) -> Result<Value, FetchError> {
    let client = build_client(timeout)?;
    let mut request = client
        .get(endpoint)
        .header("Accept", "application/json")
        .header("User-Agent", OPENAI_USER_AGENT)
        .bearer_auth(access_token);
    if let Some(account_id) = account_id {
        request = request.header("ChatGPT-Account-Id", account_id);
    }
    let response = request
        .send()
        .map_err(|err| FetchError::Transport(err.to_string()))?;
    read_json_response(response)
}

pub fn default_google_models_client(
    endpoint: &str,
    timeout: Duration,
    access_token: &str,
    project_id: &str,
) -> Result<Value, FetchError> {
    let client = build_client(timeout)?;
    let response = client
        .post(endpoint)
        .header("Accept", "application/json")
        .header("User-Agent", GOOGLE_USER_AGENT)
        .bearer_auth(access_token)
        .json(&serde_json::json!({ "project": project_id }))
        .send()
        .map_err(|err| FetchError::Transport(err.to_string()))?;
    read_json_response(response)
}

/// Exchanges a refresh token for an access token; any failure yields `None`.
pub fn default_google_refresh_client(
    endpoints: &QuotaEndpoints,
    refresh_token: &str,
) -> Option<String> {
    let Some(client_secret) = endpoints.google_client_secret.as_deref() else {
        tracing::debug!("google refresh skipped: OPM_GOOGLE_CLIENT_SECRET not set");
        return None;
    };
    let client = build_client(endpoints.timeout).ok()?;
    let root = client
        .post(&endpoints.google_token_url)
        .form(&[
            ("client_id", endpoints.google_client_id.as_str()),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .map_err(|err| FetchError::Transport(err.to_string()))
        .and_then(read_json_response);
    match root {
        Ok(root) => root
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string),
        Err(err) => {
            tracing::debug!(error = %err, "google token refresh failed");
            None
        }
    }
}
