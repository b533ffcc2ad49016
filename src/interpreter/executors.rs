//! The fetch-decode-execute loop.
//!
//! One dense match over the opcode byte at `pc`. Handlers either mutate
//! registers in place and advance `pc`, or surface a loop signal: program
//! end, a stack-growth request for the trampoline in [`Vm::eval`], or an
//! exit back to a native caller. Panics travel as errors; the faulting
//! opcode's pc is still current when they leave, which is what the stack
//! trace builder needs.

use super::Vm;
use crate::bytecode::Opcode;
use crate::consts::*;
use crate::error::VmError;
use crate::host::Host;
use crate::state::ExecState;
use crate::value::Value;

impl<H: Host> Vm<H> {
    pub(crate) fn run(&mut self) -> Result<ExecState, VmError> {
        loop {
            let op = Opcode::from(self.ops[self.pc]);
            #[cfg(feature = "profile-ops")]
            self.profiler.record(op);
            match op {
                Opcode::End => {
                    let main_local =
                        *self.ops.get(self.pc + 1).ok_or(VmError::OutOfBounds)?;
                    let v = if main_local == NO_MAIN_LOCAL {
                        Value::none()
                    } else {
                        self.reg(main_local)
                    };
                    return Ok(ExecState::Done(v));
                }

                Opcode::ConstOp => {
                    let idx = self.op_u16(1) as usize;
                    let dst = self.op_u8(3);
                    let v = *self.consts.get(idx).ok_or(VmError::OutOfBounds)?;
                    self.set_reg(dst, v);
                    self.pc += 4;
                }
                Opcode::ConstI8 => {
                    let v = Value::from_f64(self.op_i8(1) as f64);
                    let dst = self.op_u8(2);
                    self.set_reg(dst, v);
                    self.pc += 3;
                }
                Opcode::True => {
                    let dst = self.op_u8(1);
                    self.set_reg(dst, Value::from_bool(true));
                    self.pc += 2;
                }
                Opcode::False => {
                    let dst = self.op_u8(1);
                    self.set_reg(dst, Value::from_bool(false));
                    self.pc += 2;
                }
                Opcode::NoneOp => {
                    let dst = self.op_u8(1);
                    self.set_reg(dst, Value::none());
                    self.pc += 2;
                }

                Opcode::Copy => {
                    let (src, dst) = (self.op_u8(1), self.op_u8(2));
                    let v = self.reg(src);
                    self.set_reg(dst, v);
                    self.pc += 3;
                }
                Opcode::CopyRetainSrc => {
                    let (src, dst) = (self.op_u8(1), self.op_u8(2));
                    let v = self.reg(src);
                    self.heap.retain(v);
                    self.set_reg(dst, v);
                    self.pc += 3;
                }
                Opcode::CopyReleaseDst => {
                    let (src, dst) = (self.op_u8(1), self.op_u8(2));
                    let v = self.reg(src);
                    let old = self.reg(dst);
                    self.release(old);
                    self.set_reg(dst, v);
                    self.pc += 3;
                }
                Opcode::CopyRetainRelease => {
                    // Retain before releasing: src and dst may be the same slot.
                    let (src, dst) = (self.op_u8(1), self.op_u8(2));
                    let v = self.reg(src);
                    self.heap.retain(v);
                    let old = self.reg(dst);
                    self.release(old);
                    self.set_reg(dst, v);
                    self.pc += 3;
                }
                Opcode::Retain => {
                    let v = self.reg(self.op_u8(1));
                    self.heap.retain(v);
                    self.pc += 2;
                }
                Opcode::Release => {
                    let v = self.reg(self.op_u8(1));
                    self.release(v);
                    self.pc += 2;
                }
                Opcode::SetInitN => {
                    let n = self.op_u8(1) as usize;
                    for i in 0..n {
                        let local = self.op_u8(2 + i);
                        self.set_reg(local, Value::none());
                    }
                    self.pc += 2 + n;
                }

                Opcode::Add => self.exec_add()?,
                Opcode::Sub => self.exec_num_binop(|a, b| a - b)?,
                Opcode::Mul => self.exec_num_binop(|a, b| a * b)?,
                Opcode::Div => self.exec_num_binop(|a, b| a / b)?,
                Opcode::Mod => self.exec_num_binop(|a, b| a % b)?,
                Opcode::Pow => self.exec_num_binop(f64::powf)?,
                Opcode::BitAnd => self.exec_int_binop(|a, b| a & b)?,
                Opcode::BitOr => self.exec_int_binop(|a, b| a | b)?,
                Opcode::BitXor => self.exec_int_binop(|a, b| a ^ b)?,
                Opcode::Shl => self.exec_int_binop(|a, b| a.wrapping_shl(b as u32))?,
                Opcode::Shr => self.exec_int_binop(|a, b| a.wrapping_shr(b as u32))?,
                Opcode::Neg => self.exec_neg()?,
                Opcode::Not => self.exec_not()?,

                Opcode::EqNum => self.exec_eq_num()?,
                Opcode::Eq => self.exec_eq(false)?,
                Opcode::Neq => self.exec_eq(true)?,
                Opcode::Lt => self.exec_compare(|a, b| a < b)?,
                Opcode::Le => self.exec_compare(|a, b| a <= b)?,
                Opcode::Gt => self.exec_compare(|a, b| a > b)?,
                Opcode::Ge => self.exec_compare(|a, b| a >= b)?,

                Opcode::Jump => self.exec_jump(),
                Opcode::JumpCond => self.exec_jump_cond(false),
                Opcode::JumpNotCond => self.exec_jump_cond(true),

                Opcode::Call0 => {
                    if let Some(signal) = self.exec_call_value(0)? {
                        return Ok(signal);
                    }
                }
                Opcode::Call1 => {
                    if let Some(signal) = self.exec_call_value(1)? {
                        return Ok(signal);
                    }
                }
                Opcode::CallSym0 => {
                    if let Some(signal) = self.exec_call_sym(0)? {
                        return Ok(signal);
                    }
                }
                Opcode::CallSym1 => {
                    if let Some(signal) = self.exec_call_sym(1)? {
                        return Ok(signal);
                    }
                }
                Opcode::CallObjSym0 => {
                    if let Some(signal) = self.exec_call_obj_sym(0)? {
                        return Ok(signal);
                    }
                }
                Opcode::CallObjSym1 => {
                    if let Some(signal) = self.exec_call_obj_sym(1)? {
                        return Ok(signal);
                    }
                }
                Opcode::Ret0 => {
                    if let Some(signal) = self.exec_ret(None)? {
                        return Ok(signal);
                    }
                }
                Opcode::Ret1 => {
                    let src = self.op_u8(1);
                    if let Some(signal) = self.exec_ret(Some(src))? {
                        return Ok(signal);
                    }
                }

                Opcode::ForRange => self.exec_for_range()?,
                Opcode::ForIter => self.exec_for_iter()?,
                Opcode::Throw => self.exec_throw()?,

                Opcode::ListBuild => self.exec_list_build()?,
                Opcode::MapEmpty => self.exec_map_empty()?,
                Opcode::MapBuild => self.exec_map_build()?,
                Opcode::SliceOp => self.exec_slice()?,
                Opcode::IndexGet => self.exec_index_get()?,
                Opcode::IndexSet => self.exec_index_set()?,
                Opcode::ReverseIndexGet => self.exec_reverse_index_get()?,
                Opcode::SmallObjectBuild => self.exec_small_object_build()?,
                Opcode::FieldGet => self.exec_field_get()?,
                Opcode::FieldSet => self.exec_field_set(false)?,
                Opcode::FieldGetIc => self.exec_field_get_ic()?,
                Opcode::FieldSetRelease => self.exec_field_set(true)?,

                Opcode::LambdaBuild => self.exec_lambda_build()?,
                Opcode::ClosureBuild => self.exec_closure_build()?,
                Opcode::StringTemplate => self.exec_string_template()?,

                Opcode::Coinit => self.exec_coinit()?,
                Opcode::Coyield => self.exec_coyield(false)?,
                Opcode::Coresume => self.exec_coresume()?,
                Opcode::Coreturn => self.exec_coyield(true)?,
            }
        }
    }
}
