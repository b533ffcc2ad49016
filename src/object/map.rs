//! Open-addressed hash map over [`MapObj`] cells.
//!
//! `metadata` and `entries` are parallel buffers of `cap` slots (`cap` is a
//! power of two). A metadata byte is either `EMPTY`, `TOMBSTONE`, or the low
//! seven bits of the key's hash, so probing rejects most non-matching slots
//! without touching the entry buffer.

use crate::consts::*;
use crate::error::VmError;
use crate::heap::Heap;
use crate::object::string::str_bytes;
use crate::object::{MapEntry, MapObj, ObjHeader};
use crate::value::Value;

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::mem::ManuallyDrop;

pub const EMPTY: u8 = 0xff;
pub const TOMBSTONE: u8 = 0xfe;

const MIN_CAP: u32 = 8;

pub fn new_map(heap: &mut Heap) -> Result<Value, VmError> {
    let cell = heap.alloc()?;
    unsafe {
        (*cell).map = MapObj {
            header: ObjHeader {
                struct_id: MAP_ID,
                rc: 1,
            },
            metadata: std::ptr::null_mut(),
            entries: std::ptr::null_mut(),
            size: 0,
            cap: 0,
            available: 0,
            extra: 0,
        };
    }
    Ok(Value::from_pointer(cell))
}

/// Key hashing: strings by contents, everything else by bit pattern. Heap
/// pointers therefore hash by identity, matching [`keys_equal`].
fn hash_key(key: Value, str_buf: &[u8]) -> u64 {
    let mut h = DefaultHasher::new();
    match str_bytes(key, str_buf) {
        Some(bytes) => h.write(bytes),
        None => h.write_u64(key.bits()),
    }
    h.finish()
}

/// Value identity for heap keys, bit equality for tagged keys, and content
/// equality for strings (constant and heap strings compare alike).
pub fn keys_equal(a: Value, b: Value, str_buf: &[u8]) -> bool {
    match (str_bytes(a, str_buf), str_bytes(b, str_buf)) {
        (Some(x), Some(y)) => x == y,
        _ => a.bits() == b.bits(),
    }
}

#[inline]
fn meta_of(hash: u64) -> u8 {
    (hash >> 57) as u8 & 0x7f
}

struct RawParts {
    metadata: &'static mut [u8],
    entries: &'static mut [MapEntry],
}

fn raw_parts(map: &MapObj) -> Option<RawParts> {
    if map.cap == 0 {
        return None;
    }
    // The buffers live until free_bufs; borrows never cross a release.
    unsafe {
        Some(RawParts {
            metadata: std::slice::from_raw_parts_mut(map.metadata, map.cap as usize),
            entries: std::slice::from_raw_parts_mut(map.entries, map.cap as usize),
        })
    }
}

/// Insert `key -> val`, taking ownership of both references. When the key was
/// already present the existing slot keeps its original key; the now-redundant
/// `key` copy and the displaced value are returned for the caller to release.
pub fn put(
    map: &mut MapObj,
    key: Value,
    val: Value,
    str_buf: &[u8],
) -> Result<Option<(Value, Value)>, VmError> {
    if map.available == 0 {
        grow(map, str_buf);
    }
    let hash = hash_key(key, str_buf);
    let parts = raw_parts(map).expect("grown map has capacity");
    let mask = (map.cap - 1) as usize;
    let mut slot = hash as usize & mask;
    let mut first_tombstone = None;
    loop {
        match parts.metadata[slot] {
            EMPTY => {
                let target = first_tombstone.unwrap_or(slot);
                parts.metadata[target] = meta_of(hash);
                parts.entries[target] = MapEntry { key, val };
                map.size += 1;
                if first_tombstone.is_none() {
                    map.available -= 1;
                }
                return Ok(None);
            }
            TOMBSTONE => {
                first_tombstone.get_or_insert(slot);
            }
            m if m == meta_of(hash) => {
                let entry = &mut parts.entries[slot];
                if keys_equal(entry.key, key, str_buf) {
                    let old_val = entry.val;
                    entry.val = val;
                    return Ok(Some((key, old_val)));
                }
            }
            _ => {}
        }
        slot = (slot + 1) & mask;
    }
}

pub fn get(map: &MapObj, key: Value, str_buf: &[u8]) -> Option<Value> {
    let parts = raw_parts(map)?;
    let hash = hash_key(key, str_buf);
    let mask = (map.cap - 1) as usize;
    let mut slot = hash as usize & mask;
    loop {
        match parts.metadata[slot] {
            EMPTY => return None,
            TOMBSTONE => {}
            m if m == meta_of(hash) => {
                let entry = &parts.entries[slot];
                if keys_equal(entry.key, key, str_buf) {
                    return Some(entry.val);
                }
            }
            _ => {}
        }
        slot = (slot + 1) & mask;
    }
}

/// Lookup with a raw string key, for field/method fallbacks on map
/// receivers. Hashes the bytes the same way string-keyed [`put`] does.
pub fn get_by_str(map: &MapObj, name: &[u8], str_buf: &[u8]) -> Option<Value> {
    let parts = raw_parts(map)?;
    let mut h = DefaultHasher::new();
    h.write(name);
    let hash = h.finish();
    let mask = (map.cap - 1) as usize;
    let mut slot = hash as usize & mask;
    loop {
        match parts.metadata[slot] {
            EMPTY => return None,
            TOMBSTONE => {}
            m if m == meta_of(hash) => {
                let entry = &parts.entries[slot];
                if str_bytes(entry.key, str_buf) == Some(name) {
                    return Some(entry.val);
                }
            }
            _ => {}
        }
        slot = (slot + 1) & mask;
    }
}

/// Remove `key`, returning the stored entry for the caller to release.
pub fn remove(map: &mut MapObj, key: Value, str_buf: &[u8]) -> Option<MapEntry> {
    let parts = raw_parts(map)?;
    let hash = hash_key(key, str_buf);
    let mask = (map.cap - 1) as usize;
    let mut slot = hash as usize & mask;
    loop {
        match parts.metadata[slot] {
            EMPTY => return None,
            TOMBSTONE => {}
            m if m == meta_of(hash) => {
                let entry = parts.entries[slot];
                if keys_equal(entry.key, key, str_buf) {
                    parts.metadata[slot] = TOMBSTONE;
                    map.size -= 1;
                    return Some(entry);
                }
            }
            _ => {}
        }
        slot = (slot + 1) & mask;
    }
}

/// Reset the iteration cursor held in `extra`.
#[inline]
pub fn iter_reset(map: &mut MapObj) {
    map.extra = 0;
}

/// Next occupied entry at or past the cursor, post-incrementing.
pub fn next(map: &mut MapObj) -> Option<MapEntry> {
    let parts = raw_parts(map)?;
    while (map.extra as usize) < parts.metadata.len() {
        let slot = map.extra as usize;
        map.extra += 1;
        if parts.metadata[slot] < 0x80 {
            return Some(parts.entries[slot]);
        }
    }
    None
}

/// Copy of every occupied entry, for teardown and the cycle collector.
pub(crate) fn entries_snapshot(map: &MapObj) -> Vec<MapEntry> {
    match raw_parts(map) {
        None => Vec::new(),
        Some(parts) => (0..map.cap as usize)
            .filter(|&slot| parts.metadata[slot] < 0x80)
            .map(|slot| parts.entries[slot])
            .collect(),
    }
}

fn grow(map: &mut MapObj, str_buf: &[u8]) {
    let new_cap = std::cmp::max(MIN_CAP, map.cap * 2);
    let mut metadata = ManuallyDrop::new(vec![EMPTY; new_cap as usize]);
    let mut entries = ManuallyDrop::new(vec![
        MapEntry {
            key: Value::none(),
            val: Value::none(),
        };
        new_cap as usize
    ]);

    let old = *map;
    map.metadata = metadata.as_mut_ptr();
    map.entries = entries.as_mut_ptr();
    map.cap = new_cap;
    map.size = 0;
    map.available = new_cap * 7 / 8;

    if let Some(parts) = raw_parts(&old) {
        for slot in 0..old.cap as usize {
            if parts.metadata[slot] < 0x80 {
                let entry = parts.entries[slot];
                // Re-insertion cannot collide with an existing key.
                let _ = put(map, entry.key, entry.val, str_buf);
            }
        }
        let mut dead = old;
        free_bufs(&mut dead);
    }
}

/// Drop both buffers. Entries must already be released.
pub(crate) fn free_bufs(map: &mut MapObj) {
    if map.cap != 0 {
        unsafe {
            drop(Vec::from_raw_parts(
                map.metadata,
                map.cap as usize,
                map.cap as usize,
            ));
            drop(Vec::from_raw_parts(
                map.entries,
                map.cap as usize,
                map.cap as usize,
            ));
        }
        map.metadata = std::ptr::null_mut();
        map.entries = std::ptr::null_mut();
        map.cap = 0;
    }
}
