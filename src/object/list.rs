//! List operations over [`ListObj`] cells.

use crate::consts::*;
use crate::error::{PanicReason, VmError};
use crate::heap::Heap;
use crate::object::{ListObj, ObjHeader};
use crate::value::Value;

use std::mem::ManuallyDrop;

/// Allocate a list owning a copy of `elems`. Ownership of the element
/// references moves into the list; the caller retains beforehand when the
/// source slots stay live.
pub fn new_list(heap: &mut Heap, elems: &[Value]) -> Result<Value, VmError> {
    let mut buf = ManuallyDrop::new(elems.to_vec());
    let cell = heap.alloc()?;
    unsafe {
        (*cell).list = ListObj {
            header: ObjHeader {
                struct_id: LIST_ID,
                rc: 1,
            },
            ptr: buf.as_mut_ptr(),
            len: elems.len() as u32,
            cap: buf.capacity() as u32,
            next_iter_idx: 0,
        };
    }
    Ok(Value::from_pointer(cell))
}

#[inline]
pub fn elems(list: &ListObj) -> &[Value] {
    if list.ptr.is_null() {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(list.ptr, list.len as usize) }
}

pub fn get(list: &ListObj, idx: f64) -> Result<Value, PanicReason> {
    let len = list.len as i64;
    let i = idx as i64;
    if idx.fract() != 0.0 || i < 0 || i >= len {
        return Err(PanicReason::OutOfBounds);
    }
    Ok(unsafe { *list.ptr.add(i as usize) })
}

/// Negative-index access: `-1` is the last element. An index below `-len`
/// (or any non-negative index) is out of bounds.
pub fn get_reverse(list: &ListObj, idx: f64) -> Result<Value, PanicReason> {
    let len = list.len as i64;
    let i = idx as i64;
    if idx.fract() != 0.0 || i >= 0 || i < -len {
        return Err(PanicReason::OutOfBounds);
    }
    Ok(unsafe { *list.ptr.add((len + i) as usize) })
}

/// Store `val` at `idx`, returning the displaced element for the caller to
/// release.
pub fn set(list: &mut ListObj, idx: f64, val: Value) -> Result<Value, PanicReason> {
    let len = list.len as i64;
    let i = idx as i64;
    if idx.fract() != 0.0 || i < 0 || i >= len {
        return Err(PanicReason::OutOfBounds);
    }
    unsafe {
        let slot = list.ptr.add(i as usize);
        let old = *slot;
        *slot = val;
        Ok(old)
    }
}

/// Copy `[start, end)` into a fresh list, retaining each copied element.
pub fn slice(
    heap: &mut Heap,
    list: &ListObj,
    start: f64,
    end: f64,
) -> Result<Value, VmError> {
    let len = list.len as i64;
    let (s, e) = (start as i64, end as i64);
    if start.fract() != 0.0 || end.fract() != 0.0 || s < 0 || s > e || e > len {
        return Err(PanicReason::OutOfBounds.into());
    }
    let sub = &elems(list)[s as usize..e as usize];
    for &v in sub {
        heap.retain(v);
    }
    new_list(heap, sub)
}

/// Reset the embedded cursor. The `iterator` operation also retains the list
/// and hands it back as its own iterator; that part is the dispatcher's.
#[inline]
pub fn iter_reset(list: &mut ListObj) {
    list.next_iter_idx = 0;
}

/// Element at the cursor (retained), post-incrementing, or `none` at the end.
pub fn next(heap: &mut Heap, list: &mut ListObj) -> Value {
    if list.next_iter_idx >= list.len {
        return Value::none();
    }
    let v = unsafe { *list.ptr.add(list.next_iter_idx as usize) };
    list.next_iter_idx += 1;
    heap.retain(v);
    v
}

/// `(index, element)` at the cursor, or `None` at the end. The element is
/// retained like [`next`].
pub fn next_pair(heap: &mut Heap, list: &mut ListObj) -> Option<(f64, Value)> {
    if list.next_iter_idx >= list.len {
        return None;
    }
    let idx = list.next_iter_idx;
    let v = unsafe { *list.ptr.add(idx as usize) };
    list.next_iter_idx += 1;
    heap.retain(v);
    Some((idx as f64, v))
}

/// Drop the element buffer. Elements must already be released.
pub(crate) fn free_buf(list: &mut ListObj) {
    if !list.ptr.is_null() {
        unsafe {
            drop(Vec::from_raw_parts(
                list.ptr,
                list.len as usize,
                list.cap as usize,
            ));
        }
        list.ptr = std::ptr::null_mut();
    }
}
