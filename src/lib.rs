pub mod backup;
pub mod config;
pub mod diff;
pub mod error;
pub mod fsutil;
pub mod manager;
pub mod preset;
pub mod quota;
pub mod tokens;

pub use config::{Config, OpmPaths, PresetMetadata};
pub use diff::{AuthDiff, AuthMap};
pub use error::{OpmError, OpmResult};
pub use manager::PresetManager;
pub use preset::{PresetInfo, PresetSummary, SwitchOutcome};
pub use quota::{Provider, QuotaCollector, QuotaEndpoints, QuotaResult, QuotaWindow};
