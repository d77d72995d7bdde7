use std::time::Duration;

use thiserror::Error;

use crate::browser::BrowserError;

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    /// Login rejected by the target site. Never retried; the reason is
    /// surfaced verbatim to the operator.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },
    #[error("no export artifact appeared within {}s", .0.as_secs())]
    ArtifactTimeout(Duration),
    #[error("artifact download failed with status {0}")]
    DownloadFailed(u16),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub fn step(step: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ExportError::StepFailed {
            step: step.into(),
            reason: reason.to_string(),
        }
    }
}

/// Operator-facing failure classes. The point is to let a human tell
/// "fix the password" apart from "the target UI changed" and "it was slow".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Credentials,
    UiDrift,
    Timeout,
    Transport,
    Setup,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Credentials => "credentials",
            FailureClass::UiDrift => "ui-drift",
            FailureClass::Timeout => "timeout",
            FailureClass::Transport => "transport",
            FailureClass::Setup => "setup",
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            FailureClass::Credentials => {
                "check the WordPress username, password, and any extra verification steps"
            }
            FailureClass::UiDrift => {
                "the admin interface no longer matches the configured selectors"
            }
            FailureClass::Timeout => "the target site was slow; retrying may succeed",
            FailureClass::Transport => "the artifact transfer failed; check connectivity",
            FailureClass::Setup => "fix the request parameters or local configuration",
        }
    }
}

impl ExportError {
    pub fn class(&self) -> FailureClass {
        match self {
            ExportError::AuthenticationFailed(_) => FailureClass::Credentials,
            ExportError::StepFailed { .. } => FailureClass::UiDrift,
            ExportError::ArtifactTimeout(_) => FailureClass::Timeout,
            ExportError::DownloadFailed(_) | ExportError::Http(_) => FailureClass::Transport,
            ExportError::Configuration(_) => FailureClass::Setup,
            ExportError::Browser(BrowserError::Timeout(_)) => FailureClass::Timeout,
            ExportError::Browser(BrowserError::ElementNotReady(_))
            | ExportError::Browser(BrowserError::ElementMissing(_)) => FailureClass::UiDrift,
            ExportError::Browser(BrowserError::Configuration(_)) => FailureClass::Setup,
            ExportError::Browser(_) | ExportError::Io(_) => FailureClass::Transport,
        }
    }
}
