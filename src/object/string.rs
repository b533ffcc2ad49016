//! Heap strings and the constant-string view.

use crate::consts::*;
use crate::error::VmError;
use crate::heap::Heap;
use crate::object::{ObjHeader, StringObj};
use crate::value::{Value, ValueTag};

use std::mem::ManuallyDrop;

pub fn new_string(heap: &mut Heap, bytes: &[u8]) -> Result<Value, VmError> {
    let mut buf = ManuallyDrop::new(bytes.to_vec());
    let cell = heap.alloc()?;
    unsafe {
        (*cell).string = StringObj {
            header: ObjHeader {
                struct_id: STRING_ID,
                rc: 1,
            },
            ptr: buf.as_mut_ptr(),
            len: bytes.len() as u32,
            cap: buf.capacity() as u32,
        };
    }
    Ok(Value::from_pointer(cell))
}

/// Concatenation always allocates; strings are immutable.
pub fn concat(heap: &mut Heap, a: &[u8], b: &[u8]) -> Result<Value, VmError> {
    let mut joined = Vec::with_capacity(a.len() + b.len());
    joined.extend_from_slice(a);
    joined.extend_from_slice(b);
    new_string(heap, &joined)
}

#[inline]
pub fn bytes(s: &StringObj) -> &[u8] {
    if s.ptr.is_null() {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(s.ptr, s.len as usize) }
}

/// Byte contents of a string value of either representation, or `None` when
/// `v` is not a string. Heap string contents are immutable and outlive the
/// borrow as long as the caller holds a reference on `v`; the returned slice
/// must not be kept across a release.
pub fn str_bytes<'a>(v: Value, str_buf: &'a [u8]) -> Option<&'a [u8]> {
    if v.tag() == Some(ValueTag::ConstString) {
        let (start, len) = v.as_const_string();
        return Some(&str_buf[start as usize..start as usize + len as usize]);
    }
    if v.is_pointer() {
        let cell = v.as_pointer();
        unsafe {
            if (*cell).struct_id() == STRING_ID {
                let s = &(*cell).string;
                if s.ptr.is_null() {
                    return Some(&[]);
                }
                return Some(std::slice::from_raw_parts(s.ptr, s.len as usize));
            }
        }
    }
    None
}

/// Whether `v` is a constant or heap string.
#[inline]
pub fn is_string(v: Value) -> bool {
    v.tag() == Some(ValueTag::ConstString)
        || v.is_pointer() && unsafe { (*v.as_pointer()).struct_id() } == STRING_ID
}

/// Drop the byte buffer.
pub(crate) fn free_buf(s: &mut StringObj) {
    if !s.ptr.is_null() {
        unsafe {
            drop(Vec::from_raw_parts(s.ptr, s.len as usize, s.cap as usize));
        }
        s.ptr = std::ptr::null_mut();
    }
}
