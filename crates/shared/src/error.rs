use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Canceled,
}

/// Failure reported by the protocol client. Carried inside `anyhow::Error`
/// and recovered with `downcast_ref` where the code matters.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Canceled, message)
    }

    pub fn is_canceled(&self) -> bool {
        self.code == ErrorCode::Canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_canceled_code_reports_cancellation() {
        assert!(ApiException::canceled("aborted").is_canceled());
        let missing = ApiException::new(ErrorCode::NotFound, "no such conversation");
        assert!(!missing.is_canceled());
        assert_eq!(missing.to_string(), "NotFound: no such conversation");
    }
}
