use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpmError {
    #[error("preset not found: {0}")]
    PresetNotFound(String),

    #[error("auth file not found: {}", .0.display())]
    AuthFileNotFound(PathBuf),

    #[error("failed to parse {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} does not contain a JSON object", .0.display())]
    NotAnObject(PathBuf),

    #[error("invalid preset name: {0:?}")]
    InvalidPresetName(String),

    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode JSON: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to acquire lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OpmError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// True for the recoverable "preset or auth file is missing" family.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PresetNotFound(_) | Self::AuthFileNotFound(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PresetNotFound(_) | Self::AuthFileNotFound(_) | Self::InvalidPresetName(_) => 2,
            _ => 1,
        }
    }
}

pub type OpmResult<T> = Result<T, OpmError>;
