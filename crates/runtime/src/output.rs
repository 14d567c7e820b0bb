//! Captured stdout and stderr of the current run.

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Streams {
    chunks: Vec<String>,
    stderr: String,
}

/// Append-only stdout chunks plus a stderr slot, reset per run.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    streams: Mutex<Streams>,
}

impl OutputBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stdout chunk.
    pub fn push(&self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.streams.lock().chunks.push(chunk);
        }
    }

    /// Replace stderr.
    pub fn set_stderr(&self, text: impl Into<String>) {
        self.streams.lock().stderr = text.into();
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut streams = self.streams.lock();
        streams.chunks.clear();
        streams.stderr.clear();
    }

    /// Chunks in arrival order.
    pub fn chunks(&self) -> Vec<String> {
        self.streams.lock().chunks.clone()
    }

    /// Concatenated stdout.
    pub fn stdout(&self) -> String {
        self.streams.lock().chunks.concat()
    }

    /// Current stderr.
    pub fn stderr(&self) -> String {
        self.streams.lock().stderr.clone()
    }

    /// Number of stdout chunks.
    pub fn len(&self) -> usize {
        self.streams.lock().chunks.len()
    }

    /// Whether nothing was written to either stream.
    pub fn is_empty(&self) -> bool {
        let streams = self.streams.lock();
        streams.chunks.is_empty() && streams.stderr.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chunks_concatenate_in_order() {
        let buffer = OutputBuffer::new();
        buffer.push("Enter name: ");
        buffer.push("");
        buffer.push("Ada\n");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.stdout(), "Enter name: Ada\n");
    }

    #[test]
    fn clear_resets_both_streams() {
        let buffer = OutputBuffer::new();
        buffer.push("x\n");
        buffer.set_stderr("boom");
        assert!(!buffer.is_empty());
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.stderr(), "");
    }
}
