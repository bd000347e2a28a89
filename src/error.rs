use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Every fault the ingest, read and draft paths can report.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String, issues: Vec<String> },

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("No rows found for release {release_id}")]
    EmptyInput { release_id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rate limit exceeded. Please wait {retry_after_secs} seconds.")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Unparseable generation output: {0}")]
    UpstreamParse(String),

    #[error("Failed to generate valid draft after {attempts} attempts: {cause}")]
    DraftGenerationFailed { attempts: u32, cause: String },

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl ReadinessError {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
            issues: Vec::new(),
        }
    }

    /// Stable code for callers that map faults onto their own transport.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::InvalidRow(_) => "invalid_row",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::EmptyInput { .. } => "empty_input",
            Self::Configuration(_) => "configuration_error",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::UpstreamParse(_) => "upstream_parse_error",
            Self::DraftGenerationFailed { .. } => "draft_generation_failed",
            Self::Upstream(_) => "upstream_error",
        }
    }

    /// True when the caller's input caused the fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload { .. } | Self::InvalidRow(_) | Self::EmptyInput { .. }
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for ReadinessError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for ReadinessError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl Serialize for ReadinessError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let issues = match self {
            Self::InvalidPayload { issues, .. } if !issues.is_empty() => Some(issues),
            _ => None,
        };
        let retry_after = self.retry_after_secs();

        let len = 2 + usize::from(issues.is_some()) + usize::from(retry_after.is_some());
        let mut state = serializer.serialize_struct("ReadinessError", len)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        if let Some(issues) = issues {
            state.serialize_field("issues", issues)?;
        }
        if let Some(secs) = retry_after {
            state.serialize_field("retryAfterSecs", &secs)?;
        }
        state.end()
    }
}
