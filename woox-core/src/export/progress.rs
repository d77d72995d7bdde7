use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Progress,
    Error,
    Done,
}

/// One wire-level status update. The terminal `done` event is the only one
/// that may carry the artifact payload, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(
        rename = "contentType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ProgressEvent {
    pub fn progress(step: impl Into<String>, pct: u8, message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Progress,
            message: message.into(),
            step: Some(step.into()),
            pct: Some(pct),
            filename: None,
            content_type: None,
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Error,
            message: message.into(),
            step: None,
            pct: None,
            filename: None,
            content_type: None,
            data: None,
        }
    }

    pub fn done(
        message: impl Into<String>,
        filename: Option<String>,
        content_type: Option<String>,
        data: Option<String>,
    ) -> Self {
        Self {
            kind: ProgressKind::Done,
            message: message.into(),
            step: None,
            pct: Some(100),
            filename,
            content_type,
            data,
        }
    }
}

/// Producer side of the progress conduit. Pushing never blocks the worker:
/// the channel is unbounded and a vanished consumer turns every subsequent
/// emit into a no-op. Delivery to a remote observer is entirely the
/// consumer's responsibility.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            trace!("progress observer detached, dropping event");
        }
    }
}
