//! Numeric opcode handlers and the mixed-type fallbacks.

use super::Vm;
use crate::error::{PanicReason, VmError};
use crate::object::string;
use crate::value::{Value, ValueTag};

impl<H> Vm<H> {
    /// Arithmetic coercion: numbers pass through, bools and none convert,
    /// everything else is a type mismatch.
    pub(crate) fn to_number(&self, v: Value) -> Result<f64, PanicReason> {
        if v.is_number() {
            return Ok(v.as_f64());
        }
        match v.tag() {
            Some(ValueTag::Boolean) => Ok(v.as_bool() as u8 as f64),
            Some(ValueTag::None) => Ok(0.0),
            Some(ValueTag::Integer) => Ok(v.as_int() as f64),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// `add` fast-paths two numbers inline in the dispatch loop; this is the
    /// cold half: string concatenation when either side is a string, number
    /// coercion otherwise.
    #[cold]
    pub(crate) fn add_fallback(&mut self, a: Value, b: Value) -> Result<Value, VmError> {
        if string::is_string(a) || string::is_string(b) {
            let sa = self.value_to_string(a);
            let sb = self.value_to_string(b);
            return string::concat(&mut self.heap, sa.as_bytes(), sb.as_bytes());
        }
        let x = self.to_number(a)?;
        let y = self.to_number(b)?;
        Ok(Value::from_f64(x + y))
    }

    pub(crate) fn exec_add(&mut self) -> Result<(), VmError> {
        let (a, b, dst) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let (va, vb) = (self.reg(a), self.reg(b));
        let out = if va.is_number() && vb.is_number() {
            Value::from_f64(va.as_f64() + vb.as_f64())
        } else {
            self.add_fallback(va, vb)?
        };
        self.set_reg(dst, out);
        self.pc += 4;
        Ok(())
    }

    pub(crate) fn exec_num_binop(&mut self, f: fn(f64, f64) -> f64) -> Result<(), VmError> {
        let (a, b, dst) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let x = self.to_number(self.reg(a))?;
        let y = self.to_number(self.reg(b))?;
        self.set_reg(dst, Value::from_f64(f(x, y)));
        self.pc += 4;
        Ok(())
    }

    /// Bitwise ops act on the 32-bit integer image of the operands.
    pub(crate) fn exec_int_binop(&mut self, f: fn(i32, i32) -> i32) -> Result<(), VmError> {
        let (a, b, dst) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let x = self.to_number(self.reg(a))? as i64 as i32;
        let y = self.to_number(self.reg(b))? as i64 as i32;
        self.set_reg(dst, Value::from_f64(f(x, y) as f64));
        self.pc += 4;
        Ok(())
    }

    pub(crate) fn exec_neg(&mut self) -> Result<(), VmError> {
        let (src, dst) = (self.op_u8(1), self.op_u8(2));
        let x = self.to_number(self.reg(src))?;
        self.set_reg(dst, Value::from_f64(-x));
        self.pc += 3;
        Ok(())
    }

    pub(crate) fn exec_not(&mut self) -> Result<(), VmError> {
        let (src, dst) = (self.op_u8(1), self.op_u8(2));
        let v = self.reg(src);
        self.set_reg(dst, Value::from_bool(!v.is_truthy()));
        self.pc += 3;
        Ok(())
    }

    /// Ordering comparisons are number-only.
    pub(crate) fn exec_compare(&mut self, f: fn(f64, f64) -> bool) -> Result<(), VmError> {
        let (a, b, dst) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let (va, vb) = (self.reg(a), self.reg(b));
        if !va.is_number() || !vb.is_number() {
            return Err(PanicReason::TypeMismatch.into());
        }
        self.set_reg(dst, Value::from_bool(f(va.as_f64(), vb.as_f64())));
        self.pc += 4;
        Ok(())
    }

    /// Specialized equality: the compiler proved both operands numeric.
    pub(crate) fn exec_eq_num(&mut self) -> Result<(), VmError> {
        let (a, b, dst) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let eq = self.reg(a).as_f64() == self.reg(b).as_f64();
        self.set_reg(dst, Value::from_bool(eq));
        self.pc += 4;
        Ok(())
    }

    pub(crate) fn exec_eq(&mut self, negate: bool) -> Result<(), VmError> {
        let (a, b, dst) = (self.op_u8(1), self.op_u8(2), self.op_u8(3));
        let eq = self.values_equal(self.reg(a), self.reg(b));
        self.set_reg(dst, Value::from_bool(eq != negate));
        self.pc += 4;
        Ok(())
    }

    /// Mixed-type equality: numbers by numeric value, strings by contents,
    /// everything else (including heap pointers) by bit identity.
    pub(crate) fn values_equal(&self, a: Value, b: Value) -> bool {
        if a.is_number() && b.is_number() {
            return a.as_f64() == b.as_f64();
        }
        match (
            string::str_bytes(a, &self.str_buf),
            string::str_bytes(b, &self.str_buf),
        ) {
            (Some(x), Some(y)) => x == y,
            _ => a.bits() == b.bits(),
        }
    }
}
