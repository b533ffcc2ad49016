//! Control transfer: jumps, the call/return protocol, native invocation and
//! re-entry from native code.

use super::Vm;
use crate::call::ReturnInfo;
use crate::consts::*;
use crate::error::{PanicReason, VmError};
use crate::host::Host;
use crate::state::ExecState;
use crate::symbol::SymEntry;
use crate::value::Value;

impl<H> Vm<H> {
    pub(crate) fn exec_jump(&mut self) {
        let rel = self.op_i16(1);
        self.jump_rel(rel);
    }

    /// `negate` selects jump-if-falsy.
    pub(crate) fn exec_jump_cond(&mut self, negate: bool) {
        let cond = self.reg(self.op_u8(1));
        let rel = self.op_i16(2);
        if cond.is_truthy() != negate {
            self.jump_rel(rel);
        } else {
            self.pc += 4;
        }
    }

    /// `call0`/`call1`: the callee value sits after the arguments. `num_args`
    /// counts the callee slot.
    pub(crate) fn exec_call_value(
        &mut self,
        num_ret: u8,
    ) -> Result<Option<ExecState>, VmError> {
        let start = self.op_u8(1) as usize;
        let num_args = self.op_u8(2);
        if num_args == 0 {
            // num_args counts the callee slot, so it is at least 1.
            return Err(PanicReason::ArityMismatch.into());
        }
        let new_fp = self.fp + start;
        let callee = self.stack[new_fp + FRAME_ARG_START + num_args as usize - 1];
        let ret_pc = (self.pc + 3) as u32;
        self.enter_callable(callee, new_fp, num_args, num_ret, ret_pc)
    }

    /// Thread a frame for a lambda or closure. Verifies arity, checks stack
    /// capacity (signalling the growth trampoline before any state changes),
    /// saves return info and transfers control.
    pub(crate) fn enter_callable(
        &mut self,
        callee: Value,
        new_fp: usize,
        num_args: u8,
        num_ret: u8,
        ret_pc: u32,
    ) -> Result<Option<ExecState>, VmError> {
        if !callee.is_pointer() {
            return Err(VmError::panic(
                PanicReason::TypeMismatch,
                "calling a non-callable value",
            ));
        }
        let cell = callee.as_pointer();
        match unsafe { (*cell).struct_id() } {
            LAMBDA_ID => {
                let lambda = unsafe { *(*cell).as_lambda() };
                if num_args - 1 != lambda.num_params {
                    return Err(VmError::panic(
                        PanicReason::ArityMismatch,
                        format!(
                            "expected {} args, got {}",
                            lambda.num_params,
                            num_args - 1
                        ),
                    ));
                }
                let required = new_fp + lambda.num_locals as usize;
                if required > self.stack.len() {
                    return Ok(Some(ExecState::StackGrow { required }));
                }
                self.stack[new_fp + FRAME_INFO_SLOT] = ReturnInfo {
                    pc: ret_pc,
                    fp: self.fp as u32,
                    num_ret_vals: num_ret,
                    ret_flag: false,
                }
                .pack();
                self.fp = new_fp;
                self.pc = lambda.func_pc as usize;
                Ok(None)
            }
            CLOSURE_ID => {
                let closure = unsafe { *(*cell).as_closure() };
                if num_args - 1 != closure.num_params {
                    return Err(VmError::panic(
                        PanicReason::ArityMismatch,
                        format!(
                            "expected {} args, got {}",
                            closure.num_params,
                            num_args - 1
                        ),
                    ));
                }
                let required = new_fp + closure.num_locals as usize;
                if required > self.stack.len() {
                    return Ok(Some(ExecState::StackGrow { required }));
                }
                self.stack[new_fp + FRAME_INFO_SLOT] = ReturnInfo {
                    pc: ret_pc,
                    fp: self.fp as u32,
                    num_ret_vals: num_ret,
                    ret_flag: false,
                }
                .pack();
                // Captured values land after the callee slot; the frame holds
                // fresh references to them.
                let capture_base = new_fp + FRAME_ARG_START + num_args as usize;
                for i in 0..closure.num_captured as usize {
                    let cap = closure.captured[i];
                    self.heap.retain(cap);
                    self.stack[capture_base + i] = cap;
                }
                self.fp = new_fp;
                self.pc = closure.func_pc as usize;
                Ok(None)
            }
            _ => Err(VmError::panic(
                PanicReason::TypeMismatch,
                "calling a non-callable object",
            )),
        }
    }

    /// `ret0`/`ret1`. Reconciles produced vs requested return values, restores
    /// the caller context, and reports whether the dispatcher must exit to a
    /// native caller.
    pub(crate) fn exec_ret(&mut self, src: Option<u8>) -> Result<Option<ExecState>, VmError> {
        let info = ReturnInfo::unpack(self.stack[self.fp + FRAME_INFO_SLOT]);
        match (src, info.num_ret_vals) {
            (Some(s), 1) => {
                let v = self.reg(s);
                self.stack[self.fp + FRAME_RET_SLOT] = v;
            }
            (Some(s), 0) => {
                // Produced value is surplus; drop it.
                let v = self.reg(s);
                self.release(v);
            }
            (None, 1) => {
                self.stack[self.fp + FRAME_RET_SLOT] = Value::none();
            }
            (None, 0) => {}
            _ => {
                return Err(VmError::panic(
                    PanicReason::UnsupportedReturnCount,
                    format!("{} return values requested", info.num_ret_vals),
                ));
            }
        }
        self.pc = info.pc as usize;
        self.fp = info.fp as usize;
        if info.ret_flag {
            return Ok(Some(ExecState::NestedReturn));
        }
        Ok(None)
    }

    /// `callSym0`/`callSym1`: static function symbol, bytecode or native.
    /// `num_args` is the plain argument count (no callee slot).
    pub(crate) fn exec_call_sym(&mut self, num_ret: u8) -> Result<Option<ExecState>, VmError>
    where
        H: Host,
    {
        let start = self.op_u8(1) as usize;
        let num_args = self.op_u8(2);
        let sym = self.op_u16(3) as u32;
        let new_fp = self.fp + start;
        match self.funcs.get(sym) {
            None => Err(VmError::panic(
                PanicReason::UnboundSymbol,
                self.funcs.name(sym).to_string(),
            )),
            Some(SymEntry::Bytecode {
                pc,
                num_params,
                num_locals,
            }) => {
                if num_args != num_params {
                    return Err(VmError::panic(
                        PanicReason::ArityMismatch,
                        format!("expected {num_params} args, got {num_args}"),
                    ));
                }
                let required = new_fp + num_locals as usize;
                if required > self.stack.len() {
                    return Ok(Some(ExecState::StackGrow { required }));
                }
                self.stack[new_fp + FRAME_INFO_SLOT] = ReturnInfo {
                    pc: (self.pc + 5) as u32,
                    fp: self.fp as u32,
                    num_ret_vals: num_ret,
                    ret_flag: false,
                }
                .pack();
                self.fp = new_fp;
                self.pc = pc as usize;
                Ok(None)
            }
            Some(SymEntry::Native(f)) => {
                self.pc += 5;
                self.invoke_native(f, new_fp, num_args, num_ret)?;
                Ok(None)
            }
        }
    }

    /// Invoke a native callee over the frame at `new_fp`. The frame pointer
    /// is moved for the duration of the call and restored afterwards; the
    /// result lands in slot 0 of the frame when one value is requested.
    pub(crate) fn invoke_native(
        &mut self,
        f: crate::call::NativeFn<H>,
        new_fp: usize,
        num_args: u8,
        num_ret: u8,
    ) -> Result<(), VmError>
    where
        H: Host,
    {
        let caller_fp = self.fp;
        self.fp = new_fp;
        let args = unsafe { self.stack.as_ptr().add(new_fp + FRAME_ARG_START) };
        let result = f(self, args, num_args);
        self.fp = caller_fp;
        if result.is_error() {
            let msg = self.value_to_string(result);
            return Err(VmError::panic(PanicReason::NativeError, msg));
        }
        if num_ret == 1 {
            self.stack[new_fp + FRAME_RET_SLOT] = result;
        } else {
            self.release(result);
        }
        Ok(())
    }
}

impl<H: Host> Vm<H> {
    /// Re-enter the interpreter from native code: call `callee` with `args`
    /// and run it to completion. The frame is threaded above the current
    /// stack top with the exit flag set, so the dispatch loop returns here
    /// when the frame pops.
    pub fn call_value(&mut self, callee: Value, args: &[Value]) -> Result<Value, VmError> {
        let base = self.stack.len();
        let num_args = args.len() as u8 + 1;
        let arg_end = base + FRAME_ARG_START + args.len() + 1;
        if arg_end > self.stack.len() {
            self.grow_stack(arg_end)?;
        }
        for (i, &arg) in args.iter().enumerate() {
            self.heap.retain(arg);
            self.stack[base + FRAME_ARG_START + i] = arg;
        }
        self.heap.retain(callee);
        self.stack[base + FRAME_ARG_START + args.len()] = callee;
        self.stack[base + FRAME_INFO_SLOT] = ReturnInfo::end_frame().pack();

        let outer_pc = self.pc;
        let outer_fp = self.fp;
        let entered = self
            .enter_callable(callee, base, num_args, 1, outer_pc as u32)
            .and_then(|signal| match signal {
                Some(ExecState::StackGrow { required }) => {
                    self.grow_stack(required)?;
                    match self.enter_callable(callee, base, num_args, 1, outer_pc as u32)? {
                        None => Ok(()),
                        Some(_) => Err(VmError::StackOverflow),
                    }
                }
                _ => Ok(()),
            });
        if let Err(e) = entered {
            self.drop_scratch_frame(base, args.len());
            return Err(e);
        }
        // The entered frame's return info must exit the loop back to us.
        self.stack[base + FRAME_INFO_SLOT] = ReturnInfo {
            pc: outer_pc as u32,
            fp: outer_fp as u32,
            num_ret_vals: 1,
            ret_flag: true,
        }
        .pack();

        loop {
            match self.run()? {
                ExecState::NestedReturn => break,
                ExecState::StackGrow { required } => self.grow_stack(required)?,
                ExecState::Done(_) => {
                    return Err(VmError::panic(
                        PanicReason::UnknownPanicReason,
                        "program ended inside a nested call",
                    ));
                }
            }
        }
        let result = self.stack[base + FRAME_RET_SLOT];
        // The callee's epilogue released the frame's argument and callee
        // slots; only the slots themselves remain to drop.
        self.stack.truncate(base);
        Ok(result)
    }

    /// Undo a scratch frame whose callable never ran: release the copies
    /// written into it and pop the slots.
    fn drop_scratch_frame(&mut self, base: usize, num_args: usize) {
        for i in 0..=num_args {
            let v = self.stack[base + FRAME_ARG_START + i];
            self.release(v);
        }
        self.stack.truncate(base);
    }
}
