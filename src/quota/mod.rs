//! Provider quota collection over every credential the tool knows about.

pub mod client;
pub mod collector;
pub mod report;

pub use client::{
    FetchError, GoogleModelsClient, GoogleRefreshClient, OpenAiUsageClient, QuotaEndpoints,
};
pub use collector::{google_model_label, QuotaCollector, MAX_QUOTA_CONCURRENCY};
pub use report::{
    remaining_percent, time_until_reset, Provider, QuotaResult, QuotaWindow, ACTIVE_PRESET_TAG,
    RESETTING,
};
