use std::{
    borrow::Cow,
    fmt::{self, Write},
    sync::Arc,
};

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can produce a runtime error
/// or an escaping control-flow signal.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Runtime failure kinds visible to Nova programs.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `TypeOp` -> "TypeOp").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Operator unsupported for the operand types.
    TypeOp,
    /// Division or modulo by zero.
    ArithZero,
    /// Field or method lookup failed.
    UndefinedProperty,
    /// A required parameter received no argument.
    MissingArgument,
    /// More positional arguments than non-vararg parameters.
    TooManyArguments,
    /// A named argument matched no declared parameter.
    UnknownNamedArgument,
    /// Constructor overload selection failed.
    NoMatchingConstructor,
    /// Attempted instantiation of an abstract or annotation class.
    InstantiateForbidden,
    /// A concrete class omits an abstract method.
    UnimplementedAbstract,
    /// A sealed class was extended from another module.
    SealedExtension,
    /// Call depth exceeded the security policy limit.
    RecursionLimit,
    /// Loop iteration, wall-clock, or task-quota limit exceeded.
    ResourceLimit,
    /// A blocking wait passed its deadline.
    Timeout,
    /// A worker observed cancellation.
    Interrupted,
    /// Host reflective call denied or failed.
    ForeignAccess,
    /// A language-level thrown value.
    UserThrown,
}

impl ErrorKind {
    /// Whether failures of this kind may be intercepted by a catch handler.
    ///
    /// Policy-enforcement failures are uncatchable so untrusted code cannot
    /// suppress its own limits. `Interrupted` stays catchable so tasks can
    /// run cleanup after cancellation.
    #[must_use]
    pub fn is_catchable(self) -> bool {
        !matches!(self, Self::RecursionLimit | Self::ResourceLimit | Self::Timeout)
    }
}

/// A source location attached to a raised error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLoc {
    /// File name as supplied to the lowering collaborator.
    pub file: Arc<str>,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
    /// Span length in characters.
    pub length: u32,
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One formatted frame of a language-level stack trace.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Display name of the callable (function, method, or constructor).
    pub name: String,
    /// Brief parameter summary, e.g. `(2, "ab")`. Computed only when the
    /// error is formed.
    pub summary: String,
    /// Line of the active instruction when the frame was captured.
    pub line: u32,
    /// Number of tail-recursion iterations folded into this frame.
    pub folded: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}{}", self.name, self.summary)?;
        if self.line > 0 {
            write!(f, " (line {})", self.line)?;
        }
        if self.folded > 0 {
            write!(f, " [{} recursive iterations folded]", self.folded)?;
        }
        Ok(())
    }
}

/// Maximum number of stack frames retained on a raised error.
///
/// Older frames are discarded and reported as a single "N frames omitted"
/// marker when the trace is formatted.
pub(crate) const MAX_TRACE_FRAMES: usize = 64;

/// Number of frames above which `Exception` folds the middle of the trace.
const TRACE_FOLD_THRESHOLD: usize = 16;

/// An in-flight raised error, carried on the `RunError::Raise` arm while the
/// interpreter unwinds.
///
/// Frames are appended as each interpreter frame is popped, so the vector is
/// ordered innermost-first.
#[derive(Debug, Clone)]
pub(crate) struct Raised {
    pub kind: ErrorKind,
    pub message: String,
    /// Payload of a language-level `throw`; `None` for runtime failures.
    pub value: Option<Value>,
    pub location: Option<CodeLoc>,
    /// Text of the source line at `location`, when the module registered its source.
    pub line_text: Option<Arc<str>>,
    pub frames: Vec<StackFrame>,
    /// Count of frames dropped past [`MAX_TRACE_FRAMES`].
    pub omitted: usize,
}

impl Raised {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: None,
            location: None,
            line_text: None,
            frames: Vec::new(),
            omitted: 0,
        }
    }

    /// Creates a `UserThrown` failure carrying the thrown value.
    pub fn thrown(value: Value) -> Self {
        let message = value.display();
        Self {
            kind: ErrorKind::UserThrown,
            message,
            value: Some(value),
            location: None,
            line_text: None,
            frames: Vec::new(),
            omitted: 0,
        }
    }

    /// Appends one unwound frame, discarding the oldest past the cap.
    pub fn push_frame(&mut self, frame: StackFrame) {
        if self.frames.len() >= MAX_TRACE_FRAMES {
            self.frames.pop();
            self.omitted += 1;
        }
        self.frames.push(frame);
    }

    /// The value a catch handler receives.
    ///
    /// Thrown values unwrap to their payload; runtime failures surface as a
    /// `(kind, message)` pair so handlers can pattern over the kind name.
    pub fn catch_value(&self) -> Value {
        match &self.value {
            Some(v) => v.clone(),
            None => Value::pair(
                Value::str(<&'static str>::from(self.kind)),
                Value::str(self.message.as_str()),
            ),
        }
    }
}

/// Escaping control flow and runtime failures, threaded through
/// `RunResult` instead of unwinding the Rust stack.
///
/// `return` is not represented here: the `Return` opcode completes its frame
/// directly. Break and continue ride this channel so callables invoked inside
/// loop bodies (native iteration helpers, host callbacks) can signal loop
/// control structurally; a signal that escapes its function frame degrades to
/// a runtime failure.
#[derive(Debug)]
pub(crate) enum RunError {
    /// A raised runtime failure or thrown value, unwinding to the nearest
    /// catch handler.
    Raise(Box<Raised>),
    /// A `break`, with an optional loop label.
    Break(Option<Arc<str>>),
    /// A `continue`, with an optional loop label.
    Continue(Option<Arc<str>>),
    /// Internal interpreter error - indicates a bug in the engine, not user code.
    Internal(Cow<'static, str>),
}

impl RunError {
    pub fn raise(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Raise(Box::new(Raised::new(kind, message)))
    }

    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Converts an escaped break/continue into the runtime failure mandated
    /// for signals that reach a frame boundary without a matching loop.
    #[must_use]
    pub fn escape_frame(self) -> Self {
        match self {
            Self::Break(label) => Self::raise(ErrorKind::TypeOp, unmatched_signal("break", label.as_deref())),
            Self::Continue(label) => Self::raise(ErrorKind::TypeOp, unmatched_signal("continue", label.as_deref())),
            other => other,
        }
    }

    /// Converts this error to the public `Exception` for the embedding API.
    #[must_use]
    pub fn into_exception(self) -> Exception {
        match self.escape_frame() {
            Self::Raise(raised) => Exception::from_raised(*raised),
            Self::Internal(msg) => Exception::internal(msg),
            Self::Break(_) | Self::Continue(_) => unreachable!("escape_frame converts loop signals"),
        }
    }
}

impl From<Raised> for RunError {
    fn from(raised: Raised) -> Self {
        Self::Raise(Box::new(raised))
    }
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        let mut raised = Raised::new(exc.kind, exc.message);
        raised.value = exc.value;
        raised.location = exc.location;
        raised.line_text = exc.line_text;
        raised.frames = exc.frames;
        raised.into()
    }
}

fn unmatched_signal(which: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("no enclosing loop labelled '{label}' for {which}"),
        None => format!("{which} outside of a loop"),
    }
}

/// A runtime error surfaced to the embedding host.
///
/// Carries the failure kind, message, optional source location with the
/// offending line text, and the language-level stack trace. Formatting folds
/// traces longer than 16 frames.
#[derive(Debug, Clone)]
pub struct Exception {
    kind: ErrorKind,
    message: String,
    value: Option<Value>,
    location: Option<CodeLoc>,
    line_text: Option<Arc<str>>,
    frames: Vec<StackFrame>,
    omitted: usize,
}

impl Exception {
    pub(crate) fn from_raised(raised: Raised) -> Self {
        Self {
            kind: raised.kind,
            message: raised.message,
            value: raised.value,
            location: raised.location,
            line_text: raised.line_text,
            frames: raised.frames,
            omitted: raised.omitted,
        }
    }

    pub(crate) fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind: ErrorKind::UserThrown,
            message: format!("internal error in nova: {}", message.into()),
            value: None,
            location: None,
            line_text: None,
            frames: Vec::new(),
            omitted: 0,
        }
    }

    /// Creates an exception with just a kind and message, no trace.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: None,
            location: None,
            line_text: None,
            frames: Vec::new(),
            omitted: 0,
        }
    }

    /// The failure kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The thrown value for `UserThrown` failures.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The source location, when known.
    #[must_use]
    pub fn location(&self) -> Option<&CodeLoc> {
        self.location.as_ref()
    }

    /// The language-level stack trace, innermost frame first.
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(loc) = &self.location {
            write!(f, "\n  --> {loc}")?;
            if let Some(text) = &self.line_text {
                write!(f, "\n   | {text}")?;
            }
        }
        let mut trace = String::new();
        if self.frames.len() > TRACE_FOLD_THRESHOLD {
            let head = TRACE_FOLD_THRESHOLD / 2;
            let tail = self.frames.len() - head;
            for frame in &self.frames[..head] {
                write!(trace, "\n  {frame}")?;
            }
            let hidden = self.frames.len() - 2 * head + self.omitted;
            write!(trace, "\n  ... {hidden} frames omitted ...")?;
            for frame in &self.frames[tail..] {
                write!(trace, "\n  {frame}")?;
            }
        } else {
            for frame in &self.frames {
                write!(trace, "\n  {frame}")?;
            }
            if self.omitted > 0 {
                write!(trace, "\n  ... {} frames omitted ...", self.omitted)?;
            }
        }
        f.write_str(&trace)
    }
}

impl std::error::Error for Exception {}

/// Errors produced by the embedding surface itself, before any Nova code runs.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `eval` was called but no lowering collaborator is installed.
    #[error("no frontend installed: call Engine::set_lowering before eval")]
    NoFrontend,
    /// The lowering collaborator rejected the source.
    #[error("lowering failed: {0}")]
    Lowering(Exception),
    /// Nova code failed at runtime.
    #[error(transparent)]
    Runtime(#[from] Exception),
}
