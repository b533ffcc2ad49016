//! Paged slab allocator.
//!
//! The heap is a vector of pages, each a boxed run of [`PAGE_CELLS`] fixed-size
//! cells. Free cells form spans: runs of consecutive free cells whose head
//! records `{len, next}` and whose head and tail both record the span head in
//! `start`. Allocation pops or carves the head span; freeing merges into the
//! left neighbour when that neighbour ends a span. Both are O(1).
//!
//! Cell 0 of every page is a sentinel that is never allocated, so the
//! left-neighbour inspection in [`Heap::free`] cannot underflow a page.

use crate::consts::*;
use crate::error::VmError;
use crate::object::{FreeSpan, HeapCell, ObjHeader};
use crate::value::Value;

use tracing::debug;

pub struct Heap {
    pages: Vec<Box<[HeapCell]>>,
    free_head: *mut HeapCell,
    max_pages: usize,
    #[cfg(feature = "rc-audit")]
    live_refs: i64,
}

impl Heap {
    pub fn new(max_pages: usize) -> Self {
        Self {
            pages: Vec::new(),
            free_head: std::ptr::null_mut(),
            max_pages,
            #[cfg(feature = "rc-audit")]
            live_refs: 0,
        }
    }

    /// Hand out one cell. The caller formats it with a live shape; its header
    /// starts the object at `rc == 1`.
    pub fn alloc(&mut self) -> Result<*mut HeapCell, VmError> {
        if self.free_head.is_null() {
            self.grow_pages()?;
        }
        let head = self.free_head;
        unsafe {
            let len = (*head).free.len;
            let next = (*head).free.next;
            debug_assert!((*head).is_free() && len >= 1);
            if len == 1 {
                self.free_head = next;
            } else {
                // Carve the first cell; the remainder becomes the new head.
                let new_head = head.add(1);
                (*new_head).free = FreeSpan {
                    header: ObjHeader {
                        struct_id: NULL_ID,
                        rc: 0,
                    },
                    len: len - 1,
                    _pad: 0,
                    start: new_head,
                    next,
                };
                let tail = head.add(len as usize - 1);
                (*tail).free.start = new_head;
                self.free_head = new_head;
            }
        }
        self.note_retain();
        Ok(head)
    }

    /// Return a cell to the allocator. The cell must hold a live object whose
    /// children have already been released.
    pub fn free(&mut self, cell: *mut HeapCell) {
        unsafe {
            debug_assert!(!(*cell).is_free(), "freeing a free cell");
            let left = cell.sub(1);
            if (*left).is_free() {
                // The left neighbour ends a span (a span cannot continue past
                // the live cell being freed). Extend it by one; the freed cell
                // becomes the new tail.
                let head = (*left).free.start;
                (*head).free.len += 1;
                (*cell).free = FreeSpan {
                    header: ObjHeader {
                        struct_id: NULL_ID,
                        rc: 0,
                    },
                    len: 0,
                    _pad: 0,
                    start: head,
                    next: std::ptr::null_mut(),
                };
            } else {
                (*cell).free = FreeSpan {
                    header: ObjHeader {
                        struct_id: NULL_ID,
                        rc: 0,
                    },
                    len: 1,
                    _pad: 0,
                    start: cell,
                    next: self.free_head,
                };
                self.free_head = cell;
            }
        }
    }

    fn grow_pages(&mut self) -> Result<(), VmError> {
        let new_pages = std::cmp::max(1, self.pages.len() * 3 / 2);
        if self.pages.len() + new_pages > self.max_pages {
            return Err(VmError::OutOfMemory);
        }
        debug!(pages = self.pages.len(), new_pages, "growing heap");
        for _ in 0..new_pages {
            let mut page = vec![HeapCell::vacant(); PAGE_CELLS].into_boxed_slice();
            page[0].header = ObjHeader {
                struct_id: SENTINEL_ID,
                rc: 1,
            };
            let head: *mut HeapCell = &mut page[1];
            let tail: *mut HeapCell = &mut page[PAGE_CELLS - 1];
            unsafe {
                (*head).free = FreeSpan {
                    header: ObjHeader {
                        struct_id: NULL_ID,
                        rc: 0,
                    },
                    len: (PAGE_CELLS - 1) as u32,
                    _pad: 0,
                    start: head,
                    next: self.free_head,
                };
                (*tail).free.start = head;
                (*tail).header.struct_id = NULL_ID;
            }
            self.free_head = head;
            self.pages.push(page);
        }
        Ok(())
    }

    /// Add a reference when `v` points into the heap; no-op otherwise.
    /// Releasing is the interpreter's job — it has to walk children.
    #[inline]
    pub fn retain(&mut self, v: Value) {
        if v.is_pointer() {
            unsafe {
                debug_assert!(!(*v.as_pointer()).is_free(), "retain of a freed cell");
                (*v.as_pointer()).header.rc += 1;
            }
            self.note_retain();
        }
    }

    /// Number of cells currently holding live objects (sentinels excluded).
    pub fn live_objects(&self) -> usize {
        self.pages
            .iter()
            .map(|page| {
                page.iter()
                    .filter(|c| !c.is_free() && c.struct_id() != SENTINEL_ID)
                    .count()
            })
            .sum()
    }

    /// Snapshot of every live cell, for the cycle collector's sweep.
    pub(crate) fn live_cell_pointers(&mut self) -> Vec<*mut HeapCell> {
        let mut out = Vec::new();
        for page in self.pages.iter_mut() {
            for cell in page.iter_mut() {
                if !cell.is_free() && cell.struct_id() != SENTINEL_ID {
                    out.push(cell as *mut HeapCell);
                }
            }
        }
        out
    }

    #[inline]
    pub(crate) fn note_retain(&mut self) {
        #[cfg(feature = "rc-audit")]
        {
            self.live_refs += 1;
        }
    }

    #[inline]
    pub(crate) fn note_release(&mut self) {
        #[cfg(feature = "rc-audit")]
        {
            self.live_refs -= 1;
        }
    }

    #[cfg(feature = "rc-audit")]
    /// Sum of all reference counts. Zero once a program and its results have
    /// been fully released.
    pub fn rc_balance(&self) -> i64 {
        self.live_refs
    }

    /// Audit every page: each cell is either live or part of exactly one free
    /// span, and the free list reaches every span exactly once.
    pub fn check_integrity(&self) -> Result<(), String> {
        use std::collections::HashSet;

        let mut free_cells = 0usize;
        for page in self.pages.iter() {
            if page[0].struct_id() != SENTINEL_ID {
                return Err("page sentinel is not live".into());
            }
            free_cells += page.iter().filter(|c| c.is_free()).count();
        }

        let mut seen = HashSet::new();
        let mut reached = 0usize;
        let mut span = self.free_head;
        while !span.is_null() {
            if !seen.insert(span as usize) {
                return Err(format!("free list cycles through span {span:p}"));
            }
            unsafe {
                if !(*span).is_free() {
                    return Err(format!("free-list span {span:p} is live"));
                }
                let len = (*span).free.len as usize;
                if len == 0 {
                    return Err(format!("free-list span {span:p} has zero length"));
                }
                for i in 0..len {
                    if !(*span.add(i)).is_free() {
                        return Err(format!("span {span:p} covers a live cell at +{i}"));
                    }
                }
                if (*span).free.start != span {
                    return Err(format!("span head {span:p} does not start itself"));
                }
                if (*span.add(len - 1)).free.start != span {
                    return Err(format!("span tail of {span:p} does not point at head"));
                }
                reached += len;
                span = (*span).free.next;
            }
        }
        if reached != free_cells {
            return Err(format!(
                "free list reaches {reached} cells but {free_cells} are free"
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("pages", &self.pages.len())
            .field("live_objects", &self.live_objects())
            .finish()
    }
}
