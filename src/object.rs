//! In-heap object shapes.
//!
//! Every heap object occupies exactly one 40-byte cell. All shapes begin with
//! [`ObjHeader`]; the `struct_id` discriminates both builtin shapes and
//! user-defined small-object types, and doubles as the free marker
//! (`NULL_ID`) for cells owned by the allocator.

use crate::consts::*;
use crate::value::Value;

use std::mem;

pub mod list;
pub mod map;
pub mod string;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
/// Shared prefix of every heap object.
pub struct ObjHeader {
    pub struct_id: u32,
    pub rc: u32,
}

#[derive(Clone, Copy)]
#[repr(C)]
/// Growable array of values with an embedded iteration cursor.
pub struct ListObj {
    pub header: ObjHeader,
    pub ptr: *mut Value,
    pub len: u32,
    pub cap: u32,
    /// Owned by the iteration protocol; valid only between an `iterator`
    /// call and the terminating none from `next`.
    pub next_iter_idx: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
/// One key/value slot of a map's entry buffer.
pub struct MapEntry {
    pub key: Value,
    pub val: Value,
}

#[derive(Clone, Copy)]
#[repr(C)]
/// Open-addressed hash table. `metadata` and `entries` are parallel buffers
/// of `cap` slots; `extra` is the iteration cursor.
pub struct MapObj {
    pub header: ObjHeader,
    pub metadata: *mut u8,
    pub entries: *mut MapEntry,
    pub size: u32,
    pub cap: u32,
    /// Insertions left before the table must grow.
    pub available: u32,
    pub extra: u32,
}

#[derive(Clone, Copy)]
#[repr(C)]
/// Immutable byte sequence.
pub struct StringObj {
    pub header: ObjHeader,
    pub ptr: *mut u8,
    pub len: u32,
    pub cap: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
/// Callable with no captured environment.
pub struct LambdaObj {
    pub header: ObjHeader,
    pub func_pc: u32,
    pub num_params: u8,
    pub num_locals: u8,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
/// Callable carrying up to [`MAX_CAPTURES`] captured values inline.
pub struct ClosureObj {
    pub header: ObjHeader,
    pub func_pc: u32,
    pub num_params: u8,
    pub num_captured: u8,
    pub num_locals: u8,
    pub _pad: u8,
    pub captured: [Value; MAX_CAPTURES],
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
/// Suspended execution context. While suspended the fiber owns its stack
/// buffer; `pc == NULL_PC` marks a finished fiber.
pub struct FiberObj {
    pub header: ObjHeader,
    /// Fiber this one interrupted; `none` is the main fiber.
    pub prev_fiber: Value,
    pub stack_ptr: *mut Value,
    pub stack_len: u32,
    pub stack_cap: u32,
    pub pc: u32,
    pub fp: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
/// User-defined record with at most [`MAX_SMALL_OBJECT_FIELDS`] fields.
/// `header.struct_id` is the user type id.
pub struct SmallObj {
    pub header: ObjHeader,
    pub fields: [Value; MAX_SMALL_OBJECT_FIELDS],
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
/// Allocator-internal shape: head of a run of consecutive free cells. The
/// first and last cells of the run both record `start`; only the head's
/// `len`/`next` are meaningful.
pub struct FreeSpan {
    pub header: ObjHeader,
    pub len: u32,
    pub _pad: u32,
    pub start: *mut HeapCell,
    pub next: *mut HeapCell,
}

#[repr(C)]
/// A single heap cell, viewed through whichever shape `struct_id` names.
pub union HeapCell {
    pub header: ObjHeader,
    pub list: ListObj,
    pub map: MapObj,
    pub string: StringObj,
    pub lambda: LambdaObj,
    pub closure: ClosureObj,
    pub fiber: FiberObj,
    pub small: SmallObj,
    pub free: FreeSpan,
}

impl Copy for HeapCell {}

impl Clone for HeapCell {
    fn clone(&self) -> Self {
        *self
    }
}

const _: () = assert!(mem::size_of::<HeapCell>() == CELL_SIZE);
const _: () = assert!(mem::size_of::<ListObj>() <= CELL_SIZE);
const _: () = assert!(mem::size_of::<MapObj>() <= CELL_SIZE);
const _: () = assert!(mem::size_of::<StringObj>() <= CELL_SIZE);
const _: () = assert!(mem::size_of::<ClosureObj>() <= CELL_SIZE);
const _: () = assert!(mem::size_of::<FiberObj>() <= CELL_SIZE);
const _: () = assert!(mem::size_of::<SmallObj>() <= CELL_SIZE);
const _: () = assert!(mem::size_of::<FreeSpan>() <= CELL_SIZE);

impl HeapCell {
    /// A formatted free cell, used when initializing fresh pages.
    pub const fn vacant() -> Self {
        HeapCell {
            free: FreeSpan {
                header: ObjHeader {
                    struct_id: NULL_ID,
                    rc: 0,
                },
                len: 0,
                _pad: 0,
                start: std::ptr::null_mut(),
                next: std::ptr::null_mut(),
            },
        }
    }

    #[inline]
    pub fn struct_id(&self) -> u32 {
        // The header prefix is shared by every shape.
        unsafe { self.header.struct_id }
    }

    #[inline]
    pub fn rc(&self) -> u32 {
        unsafe { self.header.rc }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.struct_id() == NULL_ID
    }

    #[inline]
    pub fn as_list(&mut self) -> &mut ListObj {
        debug_assert_eq!(self.struct_id(), LIST_ID);
        unsafe { &mut self.list }
    }

    #[inline]
    pub fn as_map(&mut self) -> &mut MapObj {
        debug_assert_eq!(self.struct_id(), MAP_ID);
        unsafe { &mut self.map }
    }

    #[inline]
    pub fn as_string(&mut self) -> &mut StringObj {
        debug_assert_eq!(self.struct_id(), STRING_ID);
        unsafe { &mut self.string }
    }

    #[inline]
    pub fn as_lambda(&mut self) -> &mut LambdaObj {
        debug_assert_eq!(self.struct_id(), LAMBDA_ID);
        unsafe { &mut self.lambda }
    }

    #[inline]
    pub fn as_closure(&mut self) -> &mut ClosureObj {
        debug_assert_eq!(self.struct_id(), CLOSURE_ID);
        unsafe { &mut self.closure }
    }

    #[inline]
    pub fn as_fiber(&mut self) -> &mut FiberObj {
        debug_assert_eq!(self.struct_id(), FIBER_ID);
        unsafe { &mut self.fiber }
    }

    #[inline]
    pub fn as_small(&mut self) -> &mut SmallObj {
        debug_assert!(self.struct_id() >= FIRST_USER_STRUCT_ID && self.struct_id() < SENTINEL_ID);
        unsafe { &mut self.small }
    }

    #[inline]
    pub fn as_free(&mut self) -> &mut FreeSpan {
        debug_assert!(self.is_free());
        unsafe { &mut self.free }
    }
}

/// View the heap cell a pointer value refers to.
///
/// # Safety
///
/// `v` must hold a pointer to a live cell (`rc >= 1`), and the returned
/// reference must not outlive the last release of that cell.
#[inline]
pub unsafe fn deref_cell<'a>(v: Value) -> &'a mut HeapCell {
    &mut *v.as_pointer()
}

/// Struct id of a pointer value's referent, or `None` for non-pointers.
#[inline]
pub fn pointee_struct_id(v: Value) -> Option<u32> {
    v.is_pointer().then(|| unsafe { (*v.as_pointer()).struct_id() })
}
