//! Stack traces for panics.
//!
//! Walks the current fiber's frames from the faulting `(pc, fp)` upward
//! through the saved return-info slots, resolving each pc against the sorted
//! debug table and each source offset against the program source.

use crate::call::{ReturnInfo, END_FRAME_PC};
use crate::consts::*;
use crate::error::VmError;
use crate::interpreter::Vm;

use itertools::Itertools;

#[derive(Debug, Clone, PartialEq, Eq)]
/// One frame of a panic trace, innermost first.
pub struct StackFrame {
    pub func_name: String,
    pub line: u32,
    pub col: u32,
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.func_name, self.line, self.col)
    }
}

/// Render a trace the way the CLI prints it, one frame per line.
pub fn format_trace(frames: &[StackFrame]) -> String {
    frames.iter().map(|f| f.to_string()).join("\n")
}

pub(crate) fn build_stack_trace<H>(
    vm: &Vm<H>,
    mut pc: u32,
    mut fp: u32,
) -> Result<Vec<StackFrame>, VmError> {
    let mut frames = Vec::new();
    loop {
        let idx = vm.debug_table.partition_point(|sym| sym.pc <= pc);
        if idx == 0 {
            return Err(VmError::NoDebugSym(pc));
        }
        let sym = vm.debug_table[idx - 1];
        let func_name = if sym.frame_loc == NULL_ID {
            "main".to_string()
        } else {
            vm.funcs.name(sym.frame_loc).to_string()
        };
        let (line, col) = line_col(&vm.src, sym.source_loc);
        frames.push(StackFrame {
            func_name,
            line,
            col,
        });

        let info = ReturnInfo::unpack(vm.stack[fp as usize + FRAME_INFO_SLOT]);
        if info.pc == END_FRAME_PC {
            return Ok(frames);
        }
        pc = info.pc;
        fp = info.fp;
    }
}

/// 1-based line/column of a byte offset.
fn line_col(src: &str, offset: u32) -> (u32, u32) {
    let offset = std::cmp::min(offset as usize, src.len());
    let mut line = 1;
    let mut line_start = 0;
    for (i, b) in src.bytes().enumerate().take(offset) {
        if b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    (line, (offset - line_start) as u32 + 1)
}
