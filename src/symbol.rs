//! Method, field, function, struct, global and tag tables.
//!
//! All tables are append-only: ids are handed out during compilation/binding
//! and never removed. Method lookup is self-adjusting — the first resolution
//! installs a one-struct fast path, a second distinct receiver type promotes
//! the symbol to a many-structs map with an MRU cache backed by an auxiliary
//! `(struct_id, method_id)` hash.

use crate::call::NativeFn;
use crate::consts::*;

use std::collections::HashMap;

use tracing::debug;

pub type SymId = u32;

/// Resolved call target: bytecode entry point or native function pointer.
pub enum SymEntry<H> {
    Bytecode {
        pc: u32,
        num_params: u8,
        num_locals: u8,
    },
    Native(NativeFn<H>),
}

impl<H> Clone for SymEntry<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for SymEntry<H> {}

/// Per-method dispatch state.
pub enum MethodSym<H> {
    /// Never bound for any type.
    Empty,
    /// Monomorphic so far.
    One { struct_id: u32, entry: SymEntry<H> },
    /// Seen on two or more types; the MRU pair short-circuits the aux table.
    Many {
        mru_struct_id: u32,
        mru_entry: SymEntry<H>,
    },
}

pub struct MethodTable<H> {
    by_name: HashMap<String, SymId>,
    names: Vec<String>,
    syms: Vec<MethodSym<H>>,
    /// Backing store for polymorphic symbols.
    aux: HashMap<(u32, SymId), SymEntry<H>>,
}

impl<H> MethodTable<H> {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            names: Vec::new(),
            syms: Vec::new(),
            aux: HashMap::new(),
        }
    }

    /// Id for `name`, allocating on first sight.
    pub fn ensure(&mut self, name: &str) -> SymId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.syms.len() as SymId;
        self.by_name.insert(name.to_string(), id);
        self.names.push(name.to_string());
        self.syms.push(MethodSym::Empty);
        id
    }

    pub fn name(&self, id: SymId) -> &str {
        self.names
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    /// Bind `entry` as the implementation of method `id` for `struct_id`.
    pub fn bind(&mut self, struct_id: u32, id: SymId, entry: SymEntry<H>) {
        let sym = &mut self.syms[id as usize];
        match *sym {
            MethodSym::Empty => {
                *sym = MethodSym::One { struct_id, entry };
            }
            MethodSym::One {
                struct_id: prev, ..
            } if prev == struct_id => {
                *sym = MethodSym::One { struct_id, entry };
            }
            MethodSym::One {
                struct_id: prev,
                entry: prev_entry,
            } => {
                debug!(method = %self.names[id as usize], "promoting method to many-structs");
                self.aux.insert((prev, id), prev_entry);
                self.aux.insert((struct_id, id), entry);
                *sym = MethodSym::Many {
                    mru_struct_id: struct_id,
                    mru_entry: entry,
                };
            }
            MethodSym::Many { .. } => {
                self.aux.insert((struct_id, id), entry);
                *sym = MethodSym::Many {
                    mru_struct_id: struct_id,
                    mru_entry: entry,
                };
            }
        }
    }

    /// Resolve method `id` for a receiver of `struct_id`, refreshing the MRU
    /// on a polymorphic miss. `None` means the dispatcher must fall back
    /// (dynamic map lookup for map receivers, else a missing-symbol panic).
    pub fn lookup(&mut self, struct_id: u32, id: SymId) -> Option<SymEntry<H>> {
        match self.syms[id as usize] {
            MethodSym::Empty => None,
            MethodSym::One {
                struct_id: cached,
                entry,
            } => (cached == struct_id).then_some(entry),
            MethodSym::Many {
                mru_struct_id,
                mru_entry,
            } => {
                if mru_struct_id == struct_id {
                    return Some(mru_entry);
                }
                let entry = *self.aux.get(&(struct_id, id))?;
                self.syms[id as usize] = MethodSym::Many {
                    mru_struct_id: struct_id,
                    mru_entry: entry,
                };
                Some(entry)
            }
        }
    }

    /// Dispatch-state inspection, for tests of the promotion protocol.
    pub fn kind(&self, id: SymId) -> MethodSymKind {
        match self.syms[id as usize] {
            MethodSym::Empty => MethodSymKind::Empty,
            MethodSym::One { .. } => MethodSymKind::One,
            MethodSym::Many { mru_struct_id, .. } => MethodSymKind::Many { mru_struct_id },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodSymKind {
    Empty,
    One,
    Many { mru_struct_id: u32 },
}

#[derive(Debug, Clone, Copy)]
/// One-struct fast path of a field symbol. `struct_id == NULL_ID` until the
/// first binding; later bindings for other types fall back to name lookup.
pub struct FieldSym {
    pub struct_id: u32,
    pub field_idx: u8,
    pub is_small_object: bool,
}

pub struct FieldTable {
    by_name: HashMap<String, SymId>,
    names: Vec<String>,
    syms: Vec<FieldSym>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            names: Vec::new(),
            syms: Vec::new(),
        }
    }

    pub fn ensure(&mut self, name: &str) -> SymId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.syms.len() as SymId;
        self.by_name.insert(name.to_string(), id);
        self.names.push(name.to_string());
        self.syms.push(FieldSym {
            struct_id: NULL_ID,
            field_idx: 0,
            is_small_object: false,
        });
        id
    }

    pub fn name(&self, id: SymId) -> &str {
        self.names
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    pub fn bind(&mut self, id: SymId, struct_id: u32, field_idx: u8) {
        let sym = &mut self.syms[id as usize];
        if sym.struct_id == NULL_ID || sym.struct_id == struct_id {
            *sym = FieldSym {
                struct_id,
                field_idx,
                is_small_object: true,
            };
        }
        // A second distinct struct keeps the first fast path; access for the
        // newcomer goes through the dynamic fallback.
    }

    #[inline]
    pub fn get(&self, id: SymId) -> FieldSym {
        self.syms[id as usize]
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StructDef {
    pub name: String,
    pub num_fields: u32,
}

pub struct StructTable {
    defs: Vec<StructDef>,
}

impl StructTable {
    /// Seeded with the builtin shapes so indexes line up with struct ids.
    pub fn new() -> Self {
        let defs = ["List", "Map", "String", "Lambda", "Closure", "Fiber"]
            .iter()
            .map(|name| StructDef {
                name: (*name).to_string(),
                num_fields: 0,
            })
            .collect();
        Self { defs }
    }

    pub fn add(&mut self, name: &str, num_fields: u32) -> u32 {
        let id = self.defs.len() as u32;
        self.defs.push(StructDef {
            name: name.to_string(),
            num_fields,
        });
        id
    }

    pub fn get(&self, id: u32) -> Option<&StructDef> {
        self.defs.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Function symbols callable through `callSym`, plus the name -> id globals.
pub struct FuncTable<H> {
    globals: HashMap<String, SymId>,
    names: Vec<String>,
    syms: Vec<Option<SymEntry<H>>>,
}

impl<H> FuncTable<H> {
    pub fn new() -> Self {
        Self {
            globals: HashMap::new(),
            names: Vec::new(),
            syms: Vec::new(),
        }
    }

    pub fn ensure(&mut self, name: &str) -> SymId {
        if let Some(&id) = self.globals.get(name) {
            return id;
        }
        let id = self.syms.len() as SymId;
        self.globals.insert(name.to_string(), id);
        self.names.push(name.to_string());
        self.syms.push(None);
        id
    }

    pub fn bind(&mut self, id: SymId, entry: SymEntry<H>) {
        self.syms[id as usize] = Some(entry);
    }

    pub fn resolve(&self, name: &str) -> Option<SymId> {
        self.globals.get(name).copied()
    }

    pub fn name(&self, id: SymId) -> &str {
        self.names
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    #[inline]
    pub fn get(&self, id: SymId) -> Option<SymEntry<H>> {
        self.syms.get(id as usize).copied().flatten()
    }
}

/// Names for user tag literals, so error values render symbolically.
pub struct TagTable {
    by_name: HashMap<String, u32>,
    names: Vec<String>,
}

impl TagTable {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            names: Vec::new(),
        }
    }

    pub fn ensure(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.by_name.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }
}

impl<H> Default for MethodTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for StructTable {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Default for FuncTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for TagTable {
    fn default() -> Self {
        Self::new()
    }
}
