use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Coarse failure classes reported on jobs and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    UnsupportedConversion,
    ToolUnavailable,
    ConversionFailed,
    PackagingFailed,
    StorageError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnsupportedConversion => "unsupported conversion",
            ErrorKind::ToolUnavailable => "tool unavailable",
            ErrorKind::ConversionFailed => "conversion failed",
            ErrorKind::PackagingFailed => "packaging failed",
            ErrorKind::StorageError => "storage error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("input file not found: {}", .0.display())]
    InputMissing(PathBuf),
    #[error("cannot convert .{from} to {to}")]
    Unsupported { from: String, to: String },
    #[error("{tool} is not available")]
    ToolUnavailable { tool: String },
    #[error("{0}")]
    Failed(String),
    #[error("filesystem error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("{}", exhausted_message(.0))]
    Exhausted(Vec<FailedAttempt>),
}

/// One strategy that was tried and did not produce an output.
#[derive(Debug)]
pub struct FailedAttempt {
    pub strategy: &'static str,
    pub error: ConversionError,
}

fn exhausted_message(attempts: &[FailedAttempt]) -> String {
    let Some(last) = attempts.last() else {
        return "no conversion strategy was attempted".to_string();
    };
    let tried = attempts
        .iter()
        .map(|a| a.strategy)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}: {} (tried {})", last.strategy, last.error, tried)
}

impl ConversionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ConversionError::Failed(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::InputMissing(_) | ConversionError::Storage(_) => {
                ErrorKind::StorageError
            }
            ConversionError::Unsupported { .. } => ErrorKind::UnsupportedConversion,
            ConversionError::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            ConversionError::Failed(_) => ErrorKind::ConversionFailed,
            ConversionError::Exhausted(attempts) => attempts
                .last()
                .map(|a| a.error.kind())
                .unwrap_or(ErrorKind::UnsupportedConversion),
        }
    }

    /// The error of the last strategy tried, or `self` for single failures.
    pub fn last(&self) -> &ConversionError {
        match self {
            ConversionError::Exhausted(attempts) => {
                attempts.last().map(|a| a.error.last()).unwrap_or(self)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_reports_last_attempt() {
        let err = ConversionError::Exhausted(vec![
            FailedAttempt {
                strategy: "libreoffice",
                error: ConversionError::ToolUnavailable {
                    tool: "libreoffice".to_string(),
                },
            },
            FailedAttempt {
                strategy: "plain-text-pdf",
                error: ConversionError::failed("no text could be extracted"),
            },
        ]);

        assert_eq!(err.kind(), ErrorKind::ConversionFailed);
        assert!(matches!(err.last(), ConversionError::Failed(_)));
        let message = err.to_string();
        assert!(message.starts_with("plain-text-pdf: no text could be extracted"));
        assert!(message.contains("tried libreoffice, plain-text-pdf"));
    }

    #[test]
    fn io_errors_are_storage_errors() {
        let err: ConversionError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind(), ErrorKind::StorageError);
    }
}
