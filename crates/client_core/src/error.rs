use shared::domain::{ConversationId, EventId};
use thiserror::Error;

/// Why an attachment did not reach the `Sent` state.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("attachment canceled")]
    Canceled,
    #[error("failed to derive media metadata: {0}")]
    Metadata(String),
    #[error("failed to encrypt attachment: {0}")]
    Encryption(String),
    #[error("upload transport failure: {0}")]
    Transport(String),
    #[error("invalid upload transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::upload::UploadState,
        to: crate::upload::UploadState,
    },
}

impl UploadError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineError {
    #[error("event '{0}' is already present in the timeline")]
    DuplicateEvent(EventId),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("conversation {0} has not been opened")]
    UnknownConversation(ConversationId),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
