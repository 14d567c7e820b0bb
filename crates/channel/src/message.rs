//! The coordination message contract.
//!
//! Every message crossing a context boundary is a [`CoordinationMessage`],
//! serialized as a JSON object tagged by `kind`:
//!
//! ```text
//! { "kind": "awaiting-input", "sessionId", "requestId", "prompt" }
//! { "kind": "input-response", "requestId", "value" }
//! { "kind": "ready",          "sessionId", "interpreterVersion" }
//! { "kind": "output",         "sessionId", "text" }
//! ```

use chrono::{DateTime, Utc};
use pybridge_core::{RequestId, SessionId};
use serde::{Deserialize, Serialize};

/// The execution side is blocked on a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwaitingInput {
    /// Session that issued the request.
    pub session_id: SessionId,
    /// Correlation id the response must carry.
    pub request_id: RequestId,
    /// Prompt text shown to the user.
    pub prompt: String,
}

/// A value supplied for an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputResponse {
    /// Request being answered.
    pub request_id: RequestId,
    /// The line the user entered, without a trailing newline.
    pub value: String,
}

/// The interpreter finished loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    /// Freshly generated session id.
    pub session_id: SessionId,
    /// Version string reported by the interpreter.
    pub interpreter_version: String,
}

/// A piece of the interpreter's stdout character stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    /// Session that produced the text.
    pub session_id: SessionId,
    /// Raw text exactly as written.
    pub text: String,
}

/// Closed set of messages exchanged between contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CoordinationMessage {
    /// See [`AwaitingInput`].
    AwaitingInput(AwaitingInput),
    /// See [`InputResponse`].
    InputResponse(InputResponse),
    /// See [`Ready`].
    Ready(Ready),
    /// See [`OutputChunk`].
    #[serde(rename = "output")]
    OutputChunk(OutputChunk),
}

impl CoordinationMessage {
    /// The wire tag of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AwaitingInput(_) => "awaiting-input",
            Self::InputResponse(_) => "input-response",
            Self::Ready(_) => "ready",
            Self::OutputChunk(_) => "output",
        }
    }

    /// Session the message belongs to, when it carries one.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::AwaitingInput(m) => Some(m.session_id),
            Self::Ready(m) => Some(m.session_id),
            Self::OutputChunk(m) => Some(m.session_id),
            Self::InputResponse(_) => None,
        }
    }

    /// Encode as a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from a JSON string.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}

impl From<AwaitingInput> for CoordinationMessage {
    fn from(value: AwaitingInput) -> Self {
        Self::AwaitingInput(value)
    }
}

impl From<InputResponse> for CoordinationMessage {
    fn from(value: InputResponse) -> Self {
        Self::InputResponse(value)
    }
}

impl From<Ready> for CoordinationMessage {
    fn from(value: Ready) -> Self {
        Self::Ready(value)
    }
}

impl From<OutputChunk> for CoordinationMessage {
    fn from(value: OutputChunk) -> Self {
        Self::OutputChunk(value)
    }
}

/// A blocking input call waiting for exactly one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInputRequest {
    /// Unique correlation id.
    pub request_id: RequestId,
    /// Owning session.
    pub session_id: SessionId,
    /// Prompt passed to `input()`; empty for bare stdin reads.
    pub prompt: String,
    /// When the request was issued.
    pub created_at: DateTime<Utc>,
}

impl PendingInputRequest {
    /// Issue a new request with a fresh id.
    pub fn new(session_id: SessionId, prompt: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::v4(),
            session_id,
            prompt: prompt.into(),
            created_at: Utc::now(),
        }
    }

    /// The notice announcing this request to the UI side.
    #[must_use]
    pub fn awaiting(&self) -> AwaitingInput {
        AwaitingInput {
            session_id: self.session_id,
            request_id: self.request_id,
            prompt: self.prompt.clone(),
        }
    }
}
