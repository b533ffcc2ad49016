//! Aggregate opcodes: literals, indexing, slicing, iteration, small objects,
//! lambdas/closures and string templates.

use super::Vm;
use crate::consts::*;
use crate::error::{PanicReason, VmError};
use crate::object::{
    deref_cell, list, map, string, ClosureObj, LambdaObj, ObjHeader, SmallObj,
};
use crate::value::Value;

impl<H> Vm<H> {
    pub(crate) fn exec_list_build(&mut self) -> Result<(), VmError> {
        let (start, n, dst) = (self.op_u8(1) as usize, self.op_u8(2) as usize, self.op_u8(3));
        let elems: Vec<Value> = self.stack[self.fp + start..self.fp + start + n].to_vec();
        let v = list::new_list(&mut self.heap, &elems)?;
        self.set_reg(dst, v);
        self.pc += 4;
        Ok(())
    }

    pub(crate) fn exec_map_empty(&mut self) -> Result<(), VmError> {
        let dst = self.op_u8(1);
        let v = map::new_map(&mut self.heap)?;
        self.set_reg(dst, v);
        self.pc += 2;
        Ok(())
    }

    /// `n` key/value pairs in consecutive locals. Ownership of keys and
    /// values moves into the map.
    pub(crate) fn exec_map_build(&mut self) -> Result<(), VmError> {
        let (start, n, dst) = (self.op_u8(1) as usize, self.op_u8(2) as usize, self.op_u8(3));
        let mv = map::new_map(&mut self.heap)?;
        for i in 0..n {
            let key = self.stack[self.fp + start + 2 * i];
            let val = self.stack[self.fp + start + 2 * i + 1];
            let cell = unsafe { deref_cell(mv) };
            let replaced = map::put(cell.as_map(), key, val, &self.str_buf)?;
            if let Some((dup_key, old_val)) = replaced {
                self.release(dup_key);
                self.release(old_val);
            }
        }
        self.set_reg(dst, mv);
        self.pc += 4;
        Ok(())
    }

    pub(crate) fn exec_index_get(&mut self) -> Result<(), VmError> {
        let (obj, idx, dst) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let recv = self.reg(obj);
        let key = self.reg(idx);
        let v = match crate::object::pointee_struct_id(recv) {
            Some(LIST_ID) => {
                if !key.is_number() {
                    return Err(PanicReason::TypeMismatch.into());
                }
                let cell = unsafe { deref_cell(recv) };
                list::get(cell.as_list(), key.as_f64())?
            }
            Some(MAP_ID) => {
                let cell = unsafe { deref_cell(recv) };
                map::get(cell.as_map(), key, &self.str_buf).unwrap_or(Value::none())
            }
            _ => return Err(PanicReason::TypeMismatch.into()),
        };
        self.set_reg(dst, v);
        self.pc += 4;
        Ok(())
    }

    pub(crate) fn exec_index_set(&mut self) -> Result<(), VmError> {
        let (obj, idx, src) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let recv = self.reg(obj);
        let key = self.reg(idx);
        let val = self.reg(src);
        match crate::object::pointee_struct_id(recv) {
            Some(LIST_ID) => {
                if !key.is_number() {
                    return Err(PanicReason::TypeMismatch.into());
                }
                let cell = unsafe { deref_cell(recv) };
                let displaced = list::set(cell.as_list(), key.as_f64(), val)?;
                self.release(displaced);
            }
            Some(MAP_ID) => {
                let cell = unsafe { deref_cell(recv) };
                let replaced = map::put(cell.as_map(), key, val, &self.str_buf)?;
                if let Some((dup_key, old_val)) = replaced {
                    self.release(dup_key);
                    self.release(old_val);
                }
            }
            _ => return Err(PanicReason::TypeMismatch.into()),
        }
        self.pc += 4;
        Ok(())
    }

    pub(crate) fn exec_reverse_index_get(&mut self) -> Result<(), VmError> {
        let (obj, idx, dst) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let recv = self.reg(obj);
        let key = self.reg(idx);
        if crate::object::pointee_struct_id(recv) != Some(LIST_ID) || !key.is_number() {
            return Err(PanicReason::TypeMismatch.into());
        }
        let cell = unsafe { deref_cell(recv) };
        let v = list::get_reverse(cell.as_list(), key.as_f64())?;
        self.set_reg(dst, v);
        self.pc += 4;
        Ok(())
    }

    pub(crate) fn exec_slice(&mut self) -> Result<(), VmError> {
        let (obj, start, end, dst) = (
            self.op_u8(1),
            self.op_u8(2),
            self.op_u8(3),
            self.op_u8(4),
        );
        let recv = self.reg(obj);
        let (s, e) = (self.reg(start), self.reg(end));
        if crate::object::pointee_struct_id(recv) != Some(LIST_ID)
            || !s.is_number()
            || !e.is_number()
        {
            return Err(PanicReason::TypeMismatch.into());
        }
        let sub = {
            let cell = unsafe { deref_cell(recv) };
            // The source list is not touched by the allocation below.
            let src = *cell.as_list();
            list::slice(&mut self.heap, &src, s.as_f64(), e.as_f64())?
        };
        self.set_reg(dst, sub);
        self.pc += 5;
        Ok(())
    }

    pub(crate) fn exec_small_object_build(&mut self) -> Result<(), VmError> {
        let type_id = self.op_u16(1) as u32;
        let (start, n, dst) = (self.op_u8(3) as usize, self.op_u8(4) as usize, self.op_u8(5));
        if n > MAX_SMALL_OBJECT_FIELDS {
            return Err(VmError::panic(
                PanicReason::TooManyFields,
                format!("{n} fields in an object literal"),
            ));
        }
        let mut fields = [Value::none(); MAX_SMALL_OBJECT_FIELDS];
        fields[..n].copy_from_slice(&self.stack[self.fp + start..self.fp + start + n]);
        let cell = self.heap.alloc()?;
        unsafe {
            (*cell).small = SmallObj {
                header: ObjHeader {
                    struct_id: type_id,
                    rc: 1,
                },
                fields,
            };
        }
        self.set_reg(dst, Value::from_pointer(cell));
        self.pc += 6;
        Ok(())
    }

    pub(crate) fn exec_lambda_build(&mut self) -> Result<(), VmError> {
        let func_pc = self.op_u16(1) as u32;
        let (num_params, num_locals, dst) = (self.op_u8(3), self.op_u8(4), self.op_u8(5));
        let cell = self.heap.alloc()?;
        unsafe {
            (*cell).lambda = LambdaObj {
                header: ObjHeader {
                    struct_id: LAMBDA_ID,
                    rc: 1,
                },
                func_pc,
                num_params,
                num_locals,
            };
        }
        self.set_reg(dst, Value::from_pointer(cell));
        self.pc += 6;
        Ok(())
    }

    /// More than [`MAX_CAPTURES`] captures is an error at creation time.
    pub(crate) fn exec_closure_build(&mut self) -> Result<(), VmError> {
        let func_pc = self.op_u16(1) as u32;
        let (num_params, num_captured, num_locals) =
            (self.op_u8(3), self.op_u8(4), self.op_u8(5));
        if num_captured as usize > MAX_CAPTURES {
            return Err(VmError::panic(
                PanicReason::TooManyCaptures,
                format!("{num_captured} captures"),
            ));
        }
        let mut captured = [Value::none(); MAX_CAPTURES];
        for i in 0..num_captured as usize {
            let local = self.op_u8(6 + i);
            captured[i] = self.reg(local);
        }
        let dst = self.op_u8(6 + num_captured as usize);
        let cell = self.heap.alloc()?;
        unsafe {
            (*cell).closure = ClosureObj {
                header: ObjHeader {
                    struct_id: CLOSURE_ID,
                    rc: 1,
                },
                func_pc,
                num_params,
                num_captured,
                num_locals,
                _pad: 0,
                captured,
            };
        }
        self.set_reg(dst, Value::from_pointer(cell));
        self.pc += 7 + num_captured as usize;
        Ok(())
    }

    /// `forRange cnt, end, rel`: increment the counter; loop back while it
    /// stays below the limit.
    pub(crate) fn exec_for_range(&mut self) -> Result<(), VmError> {
        let (cnt, end) = (self.op_u8(1), self.op_u8(2));
        let rel = self.op_i16(3);
        let (vc, ve) = (self.reg(cnt), self.reg(end));
        if !vc.is_number() || !ve.is_number() {
            return Err(PanicReason::TypeMismatch.into());
        }
        let next = vc.as_f64() + 1.0;
        self.set_reg(cnt, Value::from_f64(next));
        if next < ve.as_f64() {
            self.jump_rel(rel);
        } else {
            self.pc += 5;
        }
        Ok(())
    }

    /// `forIter iter, dst, rel`: store the next element (retained) and loop
    /// back, or fall through when the iterator is exhausted.
    pub(crate) fn exec_for_iter(&mut self) -> Result<(), VmError> {
        let (iter, dst) = (self.op_u8(1), self.op_u8(2));
        let rel = self.op_i16(3);
        let recv = self.reg(iter);
        let next = match crate::object::pointee_struct_id(recv) {
            Some(LIST_ID) => {
                let cell = unsafe { deref_cell(recv) };
                list::next(&mut self.heap, cell.as_list())
            }
            Some(MAP_ID) => {
                let cell = unsafe { deref_cell(recv) };
                match map::next(cell.as_map()) {
                    Some(entry) => {
                        self.heap.retain(entry.val);
                        entry.val
                    }
                    None => Value::none(),
                }
            }
            _ => return Err(PanicReason::TypeMismatch.into()),
        };
        if next.is_none() {
            self.pc += 5;
        } else {
            self.set_reg(dst, next);
            self.jump_rel(rel);
        }
        Ok(())
    }

    /// `stringTemplate start, n, dst`: locals alternate constant fragments
    /// and expression values, ending on a fragment. Each expression value is
    /// released after stringification.
    pub(crate) fn exec_string_template(&mut self) -> Result<(), VmError> {
        let (start, count, dst) = (self.op_u8(1) as usize, self.op_u8(2) as usize, self.op_u8(3));
        let mut out = String::new();
        for i in 0..count {
            let frag = self.stack[self.fp + start + 2 * i];
            let expr = self.stack[self.fp + start + 2 * i + 1];
            out.push_str(&self.value_to_string(frag));
            out.push_str(&self.value_to_string(expr));
            self.release(expr);
        }
        let last = self.stack[self.fp + start + 2 * count];
        out.push_str(&self.value_to_string(last));
        let v = string::new_string(&mut self.heap, out.as_bytes())?;
        self.set_reg(dst, v);
        self.pc += 4;
        Ok(())
    }

    /// `throw src`: a first-class error value becomes a panic carrying its
    /// tag; throwing anything else is itself a type mismatch.
    pub(crate) fn exec_throw(&mut self) -> Result<(), VmError> {
        let v = self.reg(self.op_u8(1));
        if v.is_error() {
            let msg = self.value_to_string(v);
            return Err(VmError::panic(PanicReason::UserError, msg));
        }
        Err(VmError::panic(
            PanicReason::TypeMismatch,
            "throw of a non-error value",
        ))
    }
}
