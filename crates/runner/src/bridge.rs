//! The host side of one interpreter session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pybridge_channel::{CoordinationMessage, OutputChunk, PendingInputRequest, SharedTransport};
use pybridge_core::SessionId;

use crate::error::InterpreterError;
use crate::interpreter::Host;

/// Banner some interpreters print on startup; never forwarded.
pub const BANNER: &str = "Python initialization complete";

/// Where an execution context publishes its messages.
///
/// Called synchronously, in order, from the worker task.
pub type OutputSink = Arc<dyn Fn(CoordinationMessage) + Send + Sync>;

/// A sink that drops everything.
pub fn discard_sink() -> OutputSink {
    Arc::new(|_| {})
}

/// Connects an interpreter's stdout and stdin to the coordination channel.
pub struct SessionBridge {
    session_id: SessionId,
    transport: SharedTransport,
    sink: OutputSink,
    line_open: AtomicBool,
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("session_id", &self.session_id)
            .field("transport", &self.transport.kind())
            .finish_non_exhaustive()
    }
}

impl SessionBridge {
    /// Create a bridge for `session_id`.
    pub fn new(session_id: SessionId, transport: SharedTransport, sink: OutputSink) -> Self {
        Self {
            session_id,
            transport,
            sink,
            line_open: AtomicBool::new(false),
        }
    }

    /// Session this bridge serves.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Publish a message on the sink.
    pub fn publish(&self, message: CoordinationMessage) {
        (self.sink)(message);
    }

    /// Terminate the current output line, if one is open.
    pub fn flush(&self) {
        if self.line_open.load(Ordering::Acquire) {
            self.write("\n");
        }
    }
}

#[async_trait]
impl Host for SessionBridge {
    fn write(&self, text: &str) {
        if text.is_empty() || text.trim_end_matches('\n') == BANNER {
            return;
        }
        self.line_open.store(!text.ends_with('\n'), Ordering::Release);
        self.publish(
            OutputChunk {
                session_id: self.session_id,
                text: text.to_owned(),
            }
            .into(),
        );
    }

    async fn read_line(&self, prompt: &str) -> Result<String, InterpreterError> {
        self.write(prompt);
        let request = PendingInputRequest::new(self.session_id, prompt);
        let request_id = request.request_id;
        tracing::debug!(session_id = %self.session_id, %request_id, "waiting for input");

        let value = self.transport.request_input(request).await?;
        self.write(&format!("{value}\n"));
        Ok(value)
    }
}
