//! Python-shaped tracebacks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One stack frame of a raised exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Source file name (`code` for user snippets).
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// Function name, `<module>` at top level.
    pub name: String,
}

impl Frame {
    /// Build a frame.
    pub fn new(file: impl Into<String>, line: u32, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            name: name.into(),
        }
    }
}

/// An exception raised by user code, innermost frame last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traceback {
    /// Frames from outermost to innermost.
    pub frames: Vec<Frame>,
    /// Exception line, e.g. `ValueError: bad value`.
    pub exception: String,
}

impl Traceback {
    /// A traceback without frames.
    pub fn bare(exception: impl Into<String>) -> Self {
        Self {
            frames: Vec::new(),
            exception: exception.into(),
        }
    }

    /// Drop the outermost frame, which belongs to the code that dispatched
    /// the user snippet rather than to the snippet itself.
    #[must_use]
    pub fn strip_dispatch_frame(mut self) -> Self {
        if !self.frames.is_empty() {
            self.frames.remove(0);
        }
        self
    }

    /// Exception type name, e.g. `ValueError`.
    pub fn exception_type(&self) -> &str {
        self.exception
            .split_once(':')
            .map_or(self.exception.as_str(), |(name, _)| name)
            .trim()
    }
}

impl fmt::Display for Traceback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(
                f,
                "  File \"{}\", line {}, in {}",
                frame.file, frame.line, frame.name
            )?;
        }
        write!(f, "{}", self.exception)
    }
}
