//! Execution core of the Rill scripting language: a register-based bytecode
//! interpreter over NaN-boxed values, a fixed-cell slab heap with reference
//! counting and an on-demand cycle collector, adaptive method/field symbol
//! tables with inline caches, and cooperative fibers.
//!
//! The frontend (lexer/parser/compiler) and the builtin library are external
//! collaborators: the compiler hands a [`bytecode::ByteCodeBuffer`] to
//! [`interpreter::Vm::eval`], and builtins are native functions registered
//! through the binding surface.

pub mod backtrace;
pub mod bytecode;
pub mod call;
pub mod consts;
pub mod error;
pub mod heap;
pub mod host;
pub mod interpreter;
pub mod object;
pub mod profiler;
pub mod state;
pub mod symbol;
pub mod value;

pub mod prelude {
    pub use crate::backtrace::StackFrame;
    pub use crate::bytecode::{ByteCodeBuffer, DebugSym, EndLocalsSym, Opcode};
    pub use crate::call::{NativeFn, ReturnInfo};
    pub use crate::consts::{VmParams, NO_MAIN_LOCAL, NULL_ID, NULL_ID_U16, NULL_PC};
    pub use crate::error::{PanicReason, VmError};
    pub use crate::host::{Host, StdioHost};
    pub use crate::interpreter::Vm;
    pub use crate::state::ExecState;
    pub use crate::symbol::{MethodSymKind, SymEntry, SymId};
    pub use crate::value::{Value, ValueTag};

    #[cfg(feature = "test-helpers")]
    pub use crate::host::CaptureHost;
}
