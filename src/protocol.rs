//! Bridge message types for window ↔ host communication.
//!
//! The window content subscribes to a single event channel (`python-output`)
//! shared by every script run. Each forwarded message is a tagged
//! [`OutputEvent`] carrying the request id of the run that produced it, so a
//! receiver can demultiplex concurrent runs. The terminal `Exited` event is
//! the last event for its request id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;
use uuid::Uuid;

/// Event channel the shell emits every forwarded message on.
pub const OUTPUT_CHANNEL: &str = "python-output";

/// Marker prepended to stderr lines in the display rendering.
pub const ERROR_PREFIX: &str = "Error: ";

/// Identifier generated per run request; tags every event of that run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One forwarded message from a script run.
///
/// Per-stream ordering follows the order lines were written by the child;
/// no ordering holds across streams or across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputEvent {
    /// A line the child wrote to stdout, trailing whitespace removed.
    #[serde(rename_all = "camelCase")]
    Stdout { request_id: RequestId, line: String },
    /// A line the child wrote to stderr, trailing whitespace removed.
    #[serde(rename_all = "camelCase")]
    Stderr { request_id: RequestId, line: String },
    /// Terminal status, sent exactly once per run, after all stream events.
    /// `code` is `None` when the child was killed by a signal.
    #[serde(rename_all = "camelCase")]
    Exited {
        request_id: RequestId,
        code: Option<i32>,
        success: bool,
    },
}

impl OutputEvent {
    pub fn stdout(request_id: RequestId, line: impl Into<String>) -> Self {
        Self::Stdout {
            request_id,
            line: line.into(),
        }
    }

    pub fn stderr(request_id: RequestId, line: impl Into<String>) -> Self {
        Self::Stderr {
            request_id,
            line: line.into(),
        }
    }

    pub fn exited(request_id: RequestId, status: &ExitStatus) -> Self {
        Self::Exited {
            request_id,
            code: status.code(),
            success: status.success(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Stdout { request_id, .. }
            | Self::Stderr { request_id, .. }
            | Self::Exited { request_id, .. } => *request_id,
        }
    }

    /// Whether this is the terminal event of its run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }

    /// Plain-text rendering: what the window's output log shows. Stderr
    /// lines carry the error marker; the exit status becomes one
    /// human-readable status line.
    pub fn display_line(&self) -> String {
        match self {
            Self::Stdout { line, .. } => line.clone(),
            Self::Stderr { line, .. } => format!("{ERROR_PREFIX}{line}"),
            Self::Exited {
                code: Some(code), ..
            } => format!("Process exited with code {code}"),
            Self::Exited { code: None, .. } => "Process terminated by signal".to_string(),
        }
    }
}

/// Payload emitted on [`OUTPUT_CHANNEL`]: the structured event plus its
/// preformatted display line, so the window can render without
/// reimplementing the formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: OutputEvent,
    pub display: String,
}

impl Envelope {
    pub fn new(event: OutputEvent) -> Self {
        let display = event.display_line();
        Self { event, display }
    }
}
