//! Runtime interpreter error implementation

use crate::backtrace::StackFrame;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
#[non_exhaustive]
/// Panic reason representation for the interpreter.
///
/// A panic stops the dispatch loop; the executor attaches a stack trace and
/// surfaces it as [`VmError::Panic`].
pub enum PanicReason {
    /// The byte can't be mapped to any known `PanicReason`.
    UnknownPanicReason = 0x00,
    /// An operand had a type the opcode cannot handle.
    TypeMismatch = 0x01,
    /// Index, slice bound or reverse index outside the aggregate.
    OutOfBounds = 0x02,
    /// No method with this symbol is bound for the receiver's type.
    MissingSymbol = 0x03,
    /// The receiver has no such field and is not a map.
    MissingField = 0x04,
    /// A closure was created with more captures than fit inline.
    TooManyCaptures = 0x05,
    /// Callee parameter count does not match the call site.
    ArityMismatch = 0x06,
    /// A `throw` converted a first-class error value into a panic.
    UserError = 0x07,
    /// A native callee returned an error marker.
    NativeError = 0x08,
    /// The call site requested more than one return value.
    UnsupportedReturnCount = 0x09,
    /// A small-object literal carried more fields than a cell holds.
    TooManyFields = 0x0a,
    /// A function symbol was called before anything was bound to it.
    UnboundSymbol = 0x0b,
}

impl std::fmt::Display for PanicReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<u8> for PanicReason {
    fn from(b: u8) -> Self {
        use PanicReason::*;
        match b {
            0x01 => TypeMismatch,
            0x02 => OutOfBounds,
            0x03 => MissingSymbol,
            0x04 => MissingField,
            0x05 => TooManyCaptures,
            0x06 => ArityMismatch,
            0x07 => UserError,
            0x08 => NativeError,
            0x09 => UnsupportedReturnCount,
            0x0a => TooManyFields,
            0x0b => UnboundSymbol,
            _ => UnknownPanicReason,
        }
    }
}

/// Interpreter error variants: everything `eval` can surface.
#[derive(Debug, Error)]
pub enum VmError {
    /// The frontend failed to produce a syntax tree. Reported through the VM
    /// so embedders deal with a single error surface.
    #[error("Parse error: {0}")]
    ParseError(String),
    /// The frontend failed to produce bytecode.
    #[error("Compile error: {0}")]
    CompileError(String),
    /// The execution resulted in a well-formed panic.
    #[error("Panic: {reason}: {msg}")]
    Panic {
        reason: PanicReason,
        msg: String,
        /// Frames from the panic site upward, filled by `build_stack_trace`.
        trace: Vec<StackFrame>,
    },
    /// Stack growth hit the configured limit.
    #[error("Stack overflow")]
    StackOverflow,
    /// Heap growth hit the configured limit.
    #[error("Out of memory")]
    OutOfMemory,
    /// A bytecode-level access was outside its buffer.
    #[error("Out of bounds bytecode access")]
    OutOfBounds,
    /// The debug table has no entry covering the panic pc.
    #[error("No debug symbol for pc {0}")]
    NoDebugSym(u32),
    /// The program does not terminate with an `end` opcode.
    #[error("Missing end opcode")]
    NoEndOp,
}

impl VmError {
    /// Panic with an empty trace; the executor fills the trace in before the
    /// error leaves `eval`.
    pub(crate) fn panic(reason: PanicReason, msg: impl Into<String>) -> Self {
        Self::Panic {
            reason,
            msg: msg.into(),
            trace: Vec::new(),
        }
    }

    /// Return the panic reason that caused this error, if applicable.
    pub const fn panic_reason(&self) -> Option<PanicReason> {
        match self {
            Self::Panic { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Stack trace frames of a panic, outermost last.
    pub fn trace(&self) -> &[StackFrame] {
        match self {
            Self::Panic { trace, .. } => trace.as_slice(),
            _ => &[],
        }
    }
}

impl From<PanicReason> for VmError {
    fn from(reason: PanicReason) -> Self {
        VmError::panic(reason, "")
    }
}
