//! Call/return protocol types: packed return info and the native ABI.

use crate::interpreter::Vm;
use crate::value::Value;

/// Host (native) function. Receives the VM, a pointer to the first argument
/// slot and the argument count, and returns a single value. The callee may
/// retain/release, allocate, and re-enter the interpreter, but must not touch
/// the current fiber, pc or frame pointer directly. Re-entering can grow the
/// stack and invalidate the argument pointer; copy arguments out first.
pub type NativeFn<H> = fn(&mut Vm<H>, *const Value, u8) -> Value;

/// Frame slot 1 record: where to continue after the frame returns. Stored as
/// a raw 64-bit pattern that is never interpreted as a user value.
///
/// Layout: pc in bits 0..30, caller fp in bits 30..60, requested return-value
/// count in bits 60..62, and the continue/exit flag in bit 62.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnInfo {
    pub pc: u32,
    pub fp: u32,
    pub num_ret_vals: u8,
    /// When set, the dispatcher exits to its caller after this frame pops
    /// (used when native code re-enters the interpreter).
    pub ret_flag: bool,
}

const FIELD_MASK: u64 = (1 << 30) - 1;

/// `pc` marker for frames with no continuation (the main body, fiber entry
/// frames). Stack walks stop here.
pub const END_FRAME_PC: u32 = FIELD_MASK as u32;

impl ReturnInfo {
    /// Info for a frame nothing returns into.
    pub fn end_frame() -> Self {
        Self {
            pc: END_FRAME_PC,
            fp: 0,
            num_ret_vals: 0,
            ret_flag: true,
        }
    }

    pub fn pack(self) -> Value {
        debug_assert!(self.pc as u64 <= FIELD_MASK && self.fp as u64 <= FIELD_MASK);
        debug_assert!(self.num_ret_vals < 4);
        let bits = (self.pc as u64 & FIELD_MASK)
            | ((self.fp as u64 & FIELD_MASK) << 30)
            | ((self.num_ret_vals as u64) << 60)
            | ((self.ret_flag as u64) << 62);
        Value::from_bits(bits)
    }

    pub fn unpack(v: Value) -> Self {
        let bits = v.bits();
        Self {
            pc: (bits & FIELD_MASK) as u32,
            fp: ((bits >> 30) & FIELD_MASK) as u32,
            num_ret_vals: ((bits >> 60) & 0x3) as u8,
            ret_flag: bits & (1 << 62) != 0,
        }
    }
}
