//! Reference counting.
//!
//! Retain/release sites are chosen at compile time; the interpreter performs
//! exactly what each opcode's contract says and nothing implicit. Release
//! walks the object's shape-specific children before handing the cell back to
//! the allocator. Releasing a suspended fiber walks its frame chain and runs
//! the compiler-emitted end-of-locals release sequence for every frame.

use super::Vm;
use crate::bytecode::Opcode;
use crate::call::{ReturnInfo, END_FRAME_PC};
use crate::consts::*;
use crate::object::{list, map, string, HeapCell};
use crate::value::Value;

impl<H> Vm<H> {
    #[inline]
    pub fn retain(&mut self, v: Value) {
        self.heap.retain(v);
    }

    pub fn release(&mut self, v: Value) {
        if !v.is_pointer() {
            return;
        }
        let cell = v.as_pointer();
        unsafe {
            assert!(!(*cell).is_free(), "release of a freed cell");
            assert!((*cell).header.rc >= 1, "release drops rc below zero");
            (*cell).header.rc -= 1;
            self.heap.note_release();
            if (*cell).header.rc == 0 {
                self.free_object(cell);
            }
        }
    }

    /// Release all children of `cell`, drop its side buffers and return it to
    /// the allocator. The cell's own rc is already zero.
    pub(crate) fn free_object(&mut self, cell: *mut HeapCell) {
        if unsafe { (*cell).struct_id() } == FIBER_ID {
            // Fibers release their suspended stack frame by frame instead of
            // through the generic child walk.
            let prev = unsafe { (*cell).as_fiber().prev_fiber };
            self.release(prev);
            self.release_fiber_stack(cell);
        } else {
            for child in self.children_of(cell) {
                self.release(child);
            }
        }
        self.free_shape_buffers(cell);
        self.heap.free(cell);
    }

    /// Values this object holds references to. Non-pointer slots are skipped.
    pub(crate) fn children_of(&mut self, cell: *mut HeapCell) -> Vec<Value> {
        let cell = unsafe { &mut *cell };
        let mut out = Vec::new();
        match cell.struct_id() {
            LIST_ID => {
                out.extend(
                    list::elems(cell.as_list())
                        .iter()
                        .copied()
                        .filter(|v| v.is_pointer()),
                );
            }
            MAP_ID => {
                for entry in map::entries_snapshot(cell.as_map()) {
                    if entry.key.is_pointer() {
                        out.push(entry.key);
                    }
                    if entry.val.is_pointer() {
                        out.push(entry.val);
                    }
                }
            }
            CLOSURE_ID => {
                let closure = cell.as_closure();
                out.extend(
                    closure.captured[..closure.num_captured as usize]
                        .iter()
                        .copied()
                        .filter(|v| v.is_pointer()),
                );
            }
            FIBER_ID => {
                // A suspended fiber's live references are found by its frame
                // chain on release; for reachability the whole stack is
                // scanned, relying on the compiler keeping dead slots none.
                let fiber = cell.as_fiber();
                if fiber.prev_fiber.is_pointer() {
                    out.push(fiber.prev_fiber);
                }
                if !fiber.stack_ptr.is_null() {
                    let stack = unsafe {
                        std::slice::from_raw_parts(fiber.stack_ptr, fiber.stack_len as usize)
                    };
                    out.extend(stack.iter().copied().filter(|v| v.is_pointer()));
                }
            }
            STRING_ID | LAMBDA_ID => {}
            _ => {
                let small = cell.as_small();
                let n = self
                    .structs
                    .get(small.header.struct_id)
                    .map(|d| d.num_fields as usize)
                    .unwrap_or(0);
                out.extend(small.fields[..n].iter().copied().filter(|v| v.is_pointer()));
            }
        }
        out
    }

    /// Drop side allocations (element buffers, map tables, string bytes,
    /// fiber stacks). Children must already be handled.
    pub(crate) fn free_shape_buffers(&mut self, cell: *mut HeapCell) {
        let cell = unsafe { &mut *cell };
        match cell.struct_id() {
            LIST_ID => list::free_buf(cell.as_list()),
            MAP_ID => map::free_bufs(cell.as_map()),
            STRING_ID => string::free_buf(cell.as_string()),
            FIBER_ID => {
                let fiber = cell.as_fiber();
                if !fiber.stack_ptr.is_null() {
                    unsafe {
                        drop(Vec::from_raw_parts(
                            fiber.stack_ptr,
                            fiber.stack_len as usize,
                            fiber.stack_cap as usize,
                        ));
                    }
                    fiber.stack_ptr = std::ptr::null_mut();
                }
            }
            _ => {}
        }
    }
}

/* Fiber stack teardown overrides the generic child walk: a dying fiber's
 * stack is released frame by frame, running each frame's end-of-locals
 * sequence, exactly as the compiler laid it out. */

impl<H> Vm<H> {
    /// Release every live local of a suspended fiber by walking its frames
    /// from `(pc, fp)` upward through the saved return-info slots.
    pub(crate) fn release_fiber_stack(&mut self, cell: *mut HeapCell) {
        let fiber = unsafe { *(*cell).as_fiber() };
        if fiber.stack_ptr.is_null() {
            return;
        }
        let stack = unsafe {
            std::slice::from_raw_parts(fiber.stack_ptr, fiber.stack_len as usize)
        };
        if fiber.pc != NULL_PC {
            let mut pc = fiber.pc;
            let mut fp = fiber.fp as usize;
            loop {
                if let Some(release_pc) = self.end_locals_pc(pc) {
                    self.run_release_seq(release_pc, stack, fp);
                }
                let info = ReturnInfo::unpack(stack[fp + FRAME_INFO_SLOT]);
                if info.pc == END_FRAME_PC {
                    break;
                }
                pc = info.pc;
                fp = info.fp as usize;
            }
        }
    }

    /// End-of-locals pc for the function enclosing `pc`, from the sorted
    /// unwind table.
    fn end_locals_pc(&self, pc: u32) -> Option<u32> {
        let idx = self
            .unwind_table
            .partition_point(|sym| sym.func_pc <= pc);
        (idx > 0).then(|| self.unwind_table[idx - 1].release_pc)
    }

    /// Execute a run of `release` opcodes against a detached fiber frame.
    fn run_release_seq(&mut self, release_pc: u32, stack: &[Value], fp: usize) {
        let mut p = release_pc as usize;
        while p + 1 < self.ops.len() && self.ops[p] == Opcode::Release as u8 {
            let local = self.ops[p + 1] as usize;
            self.release(stack[fp + local]);
            p += 2;
        }
    }
}
