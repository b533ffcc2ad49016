//! Cooperative fibers.
//!
//! A fiber is a plain heap record holding a suspended `(stack, fp, pc)` plus
//! the fiber it interrupted; a switch is a struct swap, never an OS thread.
//! The main fiber's context parks in the VM itself. The `cur_fiber` slot owns
//! one reference to the running fiber: `coresume` takes it, `coyield` and
//! `coreturn` give it back.

use super::{MainCtx, Vm};
use crate::bytecode::Opcode;
use crate::call::ReturnInfo;
use crate::consts::*;
use crate::error::{PanicReason, VmError};
use crate::object::{deref_cell, FiberObj, ObjHeader};
use crate::value::Value;

use std::mem::ManuallyDrop;

use tracing::trace;

impl<H> Vm<H> {
    /// `coinit`: allocate a fiber whose stack starts with the usual two frame
    /// slots followed by copies of the arguments, suspended at `entry_pc`.
    pub(crate) fn exec_coinit(&mut self) -> Result<(), VmError> {
        let (arg_start, num_args) = (self.op_u8(1) as usize, self.op_u8(2) as usize);
        let entry_pc = self.op_u16(3) as u32;
        let init_stack = self.op_u8(5) as usize;
        let dst = self.op_u8(6);

        let stack_len = std::cmp::max(init_stack, FRAME_ARG_START + num_args);
        let mut fiber_stack = vec![Value::none(); stack_len];
        fiber_stack[FRAME_INFO_SLOT] = ReturnInfo::end_frame().pack();
        for i in 0..num_args {
            let arg = self.stack[self.fp + arg_start + i];
            self.heap.retain(arg);
            fiber_stack[FRAME_ARG_START + i] = arg;
        }

        let mut fiber_stack = ManuallyDrop::new(fiber_stack);
        let cell = self.heap.alloc()?;
        unsafe {
            (*cell).fiber = FiberObj {
                header: ObjHeader {
                    struct_id: FIBER_ID,
                    rc: 1,
                },
                prev_fiber: Value::none(),
                stack_ptr: fiber_stack.as_mut_ptr(),
                stack_len: fiber_stack.len() as u32,
                stack_cap: fiber_stack.capacity() as u32,
                pc: entry_pc,
                fp: 0,
            };
        }
        self.set_reg(dst, Value::from_pointer(cell));
        self.pc += 7;
        Ok(())
    }

    /// `coresume`: switch into `fiber`. Resuming the running fiber or a
    /// finished one is a no-op.
    pub(crate) fn exec_coresume(&mut self) -> Result<(), VmError> {
        let fiber_v = self.reg(self.op_u8(1));
        if crate::object::pointee_struct_id(fiber_v) != Some(FIBER_ID) {
            return Err(VmError::panic(
                PanicReason::TypeMismatch,
                "coresume of a non-fiber value",
            ));
        }
        self.pc += 2;
        if fiber_v.bits() == self.cur_fiber.bits() {
            return Ok(());
        }
        if unsafe { deref_cell(fiber_v).as_fiber().pc } == NULL_PC {
            // Finished fibers cannot be resumed.
            return Ok(());
        }

        trace!("resuming fiber");
        self.heap.retain(fiber_v);
        self.park_current();

        let target = unsafe { deref_cell(fiber_v).as_fiber() };
        target.prev_fiber = self.cur_fiber;
        self.mount_fiber_stack(fiber_v);
        self.cur_fiber = fiber_v;
        // A fiber suspended at a yield point resumes just past it, so the
        // yield reads as a plain statement.
        if self.ops.get(self.pc) == Some(&(Opcode::Coyield as u8)) {
            self.pc += 1;
        }
        Ok(())
    }

    /// `coyield` / `coreturn` (`finish` marks the fiber dead). Yielding on
    /// the main fiber is a no-op.
    pub(crate) fn exec_coyield(&mut self, finish: bool) -> Result<(), VmError> {
        if self.cur_fiber.is_none() {
            self.pc += 1;
            return Ok(());
        }
        trace!(finish, "suspending fiber");
        let suspended = self.cur_fiber;
        // A plain yield saves the pc of the yield op itself; resume skips it.
        let saved_pc = if finish { NULL_PC } else { self.pc as u32 };
        let mut stack = ManuallyDrop::new(std::mem::take(&mut self.stack));
        let prev = {
            let cell = unsafe { deref_cell(suspended).as_fiber() };
            cell.stack_ptr = stack.as_mut_ptr();
            cell.stack_len = stack.len() as u32;
            cell.stack_cap = stack.capacity() as u32;
            cell.pc = saved_pc;
            cell.fp = self.fp as u32;
            let prev = cell.prev_fiber;
            cell.prev_fiber = Value::none();
            prev
        };

        if prev.is_none() {
            let ctx = self
                .main_ctx
                .take()
                .expect("main context parked while a fiber runs");
            self.stack = ctx.stack;
            self.pc = ctx.pc;
            self.fp = ctx.fp;
        } else {
            self.mount_fiber_stack(prev);
        }
        self.cur_fiber = prev;
        self.release(suspended);
        Ok(())
    }

    /// Park the running context into its owner (main slot or fiber cell).
    fn park_current(&mut self) {
        if self.cur_fiber.is_none() {
            self.main_ctx = Some(MainCtx {
                stack: std::mem::take(&mut self.stack),
                pc: self.pc,
                fp: self.fp,
            });
        } else {
            let mut stack = ManuallyDrop::new(std::mem::take(&mut self.stack));
            let cell = unsafe { deref_cell(self.cur_fiber).as_fiber() };
            cell.stack_ptr = stack.as_mut_ptr();
            cell.stack_len = stack.len() as u32;
            cell.stack_cap = stack.capacity() as u32;
            cell.pc = self.pc as u32;
            cell.fp = self.fp as u32;
        }
    }

    /// Move a suspended fiber's stack into the VM and load its pc/fp. The
    /// cell's stack pointer is cleared while the fiber runs.
    fn mount_fiber_stack(&mut self, fiber_v: Value) {
        let cell = unsafe { deref_cell(fiber_v).as_fiber() };
        self.stack = unsafe {
            Vec::from_raw_parts(
                cell.stack_ptr,
                cell.stack_len as usize,
                cell.stack_cap as usize,
            )
        };
        cell.stack_ptr = std::ptr::null_mut();
        self.pc = cell.pc as usize;
        self.fp = cell.fp as usize;
    }
}
