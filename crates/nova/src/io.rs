use std::io::{self, BufRead, Write as _};

use crate::error::Exception;

/// Trait for the interpreter's standard streams.
///
/// Implement this to capture or redirect output from sandboxed Nova code.
/// The default implementation `StdStreams` writes to the process stdout and
/// stderr and reads stdin line-wise.
pub trait ConsoleStreams: Send {
    /// Writes `text` to standard output. The caller supplies any newline.
    fn write_out(&mut self, text: &str) -> Result<(), Exception>;

    /// Writes `text` to standard error. The caller supplies any newline.
    fn write_err(&mut self, text: &str) -> Result<(), Exception>;

    /// Reads one line from standard input, without the trailing newline.
    /// Returns `None` at end of input.
    fn read_line(&mut self) -> Result<Option<String>, Exception>;
}

/// Default streams bound to the host process's stdio.
#[derive(Debug, Default)]
pub struct StdStreams;

impl ConsoleStreams for StdStreams {
    fn write_out(&mut self, text: &str) -> Result<(), Exception> {
        let mut out = io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
        Ok(())
    }

    fn write_err(&mut self, text: &str) -> Result<(), Exception> {
        let mut err = io::stderr().lock();
        let _ = err.write_all(text.as_bytes());
        let _ = err.flush();
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, Exception> {
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line).unwrap_or(0);
        if read == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

/// Streams that collect all output into strings.
///
/// Useful for testing or capturing print output programmatically.
#[derive(Debug, Default)]
pub struct CollectStrings {
    out: String,
    err: String,
    input: Vec<String>,
    next_input: usize,
}

impl CollectStrings {
    /// Creates empty collecting streams.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates collecting streams with canned stdin lines.
    #[must_use]
    pub fn with_input(input: Vec<String>) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }

    /// The collected standard output.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.out
    }

    /// The collected standard error.
    #[must_use]
    pub fn errors(&self) -> &str {
        &self.err
    }
}

impl ConsoleStreams for CollectStrings {
    fn write_out(&mut self, text: &str) -> Result<(), Exception> {
        self.out.push_str(text);
        Ok(())
    }

    fn write_err(&mut self, text: &str) -> Result<(), Exception> {
        self.err.push_str(text);
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, Exception> {
        let line = self.input.get(self.next_input).cloned();
        if line.is_some() {
            self.next_input += 1;
        }
        Ok(line)
    }
}

/// A cloneable handle over [`CollectStrings`], for reading captured output
/// after handing the streams to an engine.
#[derive(Debug, Clone, Default)]
pub struct SharedCollect(std::sync::Arc<parking_lot::Mutex<CollectStrings>>);

impl SharedCollect {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard output collected so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.0.lock().output().to_owned()
    }

    /// The standard error collected so far.
    #[must_use]
    pub fn errors(&self) -> String {
        self.0.lock().errors().to_owned()
    }
}

impl ConsoleStreams for SharedCollect {
    fn write_out(&mut self, text: &str) -> Result<(), Exception> {
        self.0.lock().write_out(text)
    }

    fn write_err(&mut self, text: &str) -> Result<(), Exception> {
        self.0.lock().write_err(text)
    }

    fn read_line(&mut self) -> Result<Option<String>, Exception> {
        self.0.lock().read_line()
    }
}

/// Streams that ignore all output and report exhausted input.
///
/// Useful for suppressing output during benchmarking.
#[derive(Debug, Default)]
pub struct NullStreams;

impl ConsoleStreams for NullStreams {
    fn write_out(&mut self, _text: &str) -> Result<(), Exception> {
        Ok(())
    }

    fn write_err(&mut self, _text: &str) -> Result<(), Exception> {
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, Exception> {
        Ok(None)
    }
}
