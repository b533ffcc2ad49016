//! Method and field dispatch.
//!
//! `callObjSym` resolves through the adaptive method table: empty symbols and
//! receiver-type misses fall back to a dynamic map lookup when the receiver
//! is a map, and panic otherwise. Field access has a one-struct fast path
//! plus an inline-cached opcode whose `(struct_id, offset)` operand pair the
//! slow path writes back into the instruction stream.

use super::Vm;
use crate::call::ReturnInfo;
use crate::consts::*;
use crate::error::{PanicReason, VmError};
use crate::host::Host;
use crate::object::{deref_cell, map, string};
use crate::state::ExecState;
use crate::symbol::SymEntry;
use crate::value::Value;

use tracing::trace;

impl<H: Host> Vm<H> {
    /// `callObjSym0`/`callObjSym1`. The receiver is the first argument and is
    /// counted in `num_args`.
    pub(crate) fn exec_call_obj_sym(
        &mut self,
        num_ret: u8,
    ) -> Result<Option<ExecState>, VmError> {
        let start = self.op_u8(1) as usize;
        let num_args = self.op_u8(2);
        let method = self.op_u16(3) as u32;
        let new_fp = self.fp + start;
        let recv = self.stack[new_fp + FRAME_ARG_START];

        if !recv.is_pointer() {
            return Err(self.missing_symbol(method, recv));
        }
        let sid = unsafe { (*recv.as_pointer()).struct_id() };

        match self.methods.lookup(sid, method) {
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
            None if sid == MAP_ID => {
                // Dynamic fallback: the map may carry a callable under the
                // method's name.
                let name = self.methods.name(method).as_bytes().to_vec();
                let found = {
                    let cell = unsafe { deref_cell(recv) };
                    map::get_by_str(cell.as_map(), &name, &self.str_buf)
                };
                let Some(callee) = found else {
                    return Err(self.missing_symbol(method, recv));
                };
                // The callee slot follows the arguments; capacity for it is
                // covered by the callee's frame size check below, and nothing
                // is written until that check passed.
                let ret_pc = (self.pc + 5) as u32;
                self.enter_map_method(callee, new_fp, num_args, num_ret, ret_pc)
            }
            None => Err(self.missing_symbol(method, recv)),
        }
    }

    /// Thread a frame for a callable found on a map receiver. The receiver
    /// stays in the first argument slot; `num_args + 1` counts the appended
    /// callee.
    fn enter_map_method(
        &mut self,
        callee: Value,
        new_fp: usize,
        num_args: u8,
        num_ret: u8,
        ret_pc: u32,
    ) -> Result<Option<ExecState>, VmError> {
        let callee_slot = new_fp + FRAME_ARG_START + num_args as usize;
        let required = callee_slot + 1;
        if required > self.stack.len() {
            return Ok(Some(ExecState::StackGrow { required }));
        }
        self.heap.retain(callee);
        self.stack[callee_slot] = callee;
        match self.enter_callable(callee, new_fp, num_args + 1, num_ret, ret_pc)? {
            Some(signal) => {
                // Undo before the trampoline re-executes this opcode.
                self.release(callee);
                Ok(Some(signal))
            }
            None => Ok(None),
        }
    }

    fn missing_symbol(&self, method: u32, recv: Value) -> VmError {
        VmError::panic(
            PanicReason::MissingSymbol,
            format!(
                "missing symbol '{}' for {}",
                self.methods.name(method),
                self.value_to_string(recv)
            ),
        )
    }
}

impl<H> Vm<H> {
    /// `fieldGet`: one-struct fast path, then the dynamic map fallback.
    pub(crate) fn exec_field_get(&mut self) -> Result<(), VmError> {
        let (obj, dst, field) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let recv = self.reg(obj);
        let v = self.field_value(recv, field as u32)?;
        self.set_reg(dst, v);
        self.pc += 4;
        Ok(())
    }

    /// `fieldGetIc`: compare the receiver's struct id against the embedded
    /// cache; on a hit read the field at the cached offset, otherwise resolve
    /// slowly and write the cache back into the operand bytes.
    pub(crate) fn exec_field_get_ic(&mut self) -> Result<(), VmError> {
        let (obj, dst, field) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let cached_type = self.op_u16(4);
        let recv = self.reg(obj);
        if recv.is_pointer() {
            let sid = unsafe { (*recv.as_pointer()).struct_id() };
            if sid == cached_type as u32 {
                let offset = self.op_u8(6) as usize;
                let v = unsafe { deref_cell(recv).as_small().fields[offset] };
                self.set_reg(dst, v);
                self.pc += 7;
                return Ok(());
            }
        }
        let v = self.field_value(recv, field as u32)?;
        // Install the cache for small-object receivers so the next execution
        // skips the table.
        if let Some(sid) = crate::object::pointee_struct_id(recv) {
            let sym = self.fields.get(field as u32);
            if sym.is_small_object && sym.struct_id == sid && sid < NULL_ID_U16 as u32 {
                trace!(field = self.fields.name(field as u32), "field cache writeback");
                let at = self.pc + 4;
                self.ops[at..at + 2].copy_from_slice(&(sid as u16).to_le_bytes());
                self.ops[at + 2] = sym.field_idx;
            }
        }
        self.set_reg(dst, v);
        self.pc += 7;
        Ok(())
    }

    fn field_value(&mut self, recv: Value, field: u32) -> Result<Value, VmError> {
        if let Some(sid) = crate::object::pointee_struct_id(recv) {
            let sym = self.fields.get(field);
            if sym.is_small_object && sym.struct_id == sid {
                return Ok(unsafe { deref_cell(recv).as_small().fields[sym.field_idx as usize] });
            }
            if sid == MAP_ID {
                let name = self.fields.name(field).as_bytes();
                let cell = unsafe { deref_cell(recv) };
                return Ok(map::get_by_str(cell.as_map(), name, &self.str_buf)
                    .unwrap_or(Value::none()));
            }
        }
        Err(self.missing_field(field, recv))
    }

    /// `fieldSet`/`fieldSetRelease`: `release` drops the displaced value.
    pub(crate) fn exec_field_set(&mut self, release: bool) -> Result<(), VmError> {
        let (obj, field, src) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let recv = self.reg(obj);
        let val = self.reg(src);
        let displaced = self.field_store(recv, field as u32, val)?;
        if release {
            self.release(displaced);
        }
        self.pc += 4;
        Ok(())
    }

    /// Store and return the displaced value (which the non-releasing set
    /// variant intentionally leaks to its compiler-chosen owner).
    fn field_store(&mut self, recv: Value, field: u32, val: Value) -> Result<Value, VmError> {
        if let Some(sid) = crate::object::pointee_struct_id(recv) {
            let sym = self.fields.get(field);
            if sym.is_small_object && sym.struct_id == sid {
                let slot =
                    unsafe { &mut deref_cell(recv).as_small().fields[sym.field_idx as usize] };
                let old = *slot;
                *slot = val;
                return Ok(old);
            }
            if sid == MAP_ID {
                let name = self.fields.name(field).to_string();
                let key = string::new_string(&mut self.heap, name.as_bytes())?;
                let cell = unsafe { deref_cell(recv) };
                let replaced = map::put(cell.as_map(), key, val, &self.str_buf)?;
                if let Some((dup_key, old_val)) = replaced {
                    self.release(dup_key);
                    return Ok(old_val);
                }
                return Ok(Value::none());
            }
        }
        Err(self.missing_field(field, recv))
    }

    fn missing_field(&self, field: u32, recv: Value) -> VmError {
        VmError::panic(
            PanicReason::MissingField,
            format!(
                "no field '{}' on {}",
                self.fields.name(field),
                self.value_to_string(recv)
            ),
        )
    }
}
