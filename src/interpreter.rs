//! [`Vm`] implementation.
//!
//! The interpreter owns one value stack (the main fiber's), the heap, the
//! symbol tables and the loaded program. Registers are stack slots addressed
//! relative to the frame pointer. Submodules contribute the opcode handlers
//! as further `impl Vm` blocks, one per concern: arithmetic, control flow,
//! dispatch, aggregate ops, reference counting, cycle collection and fibers.

use crate::bytecode::{ByteCodeBuffer, DebugSym, EndLocalsSym};
use crate::call::{NativeFn, ReturnInfo};
use crate::consts::*;
use crate::error::VmError;
use crate::heap::Heap;
use crate::host::{Host, StdioHost};
use crate::object::{deref_cell, string};
use crate::state::ExecState;
use crate::symbol::{
    FieldTable, FuncTable, MethodTable, StructTable, SymEntry, SymId, TagTable,
};
use crate::value::{Value, ValueTag};

mod arith;
mod cycle;
mod dispatch;
mod executors;
mod fiber;
mod flow;
mod object_ops;
mod rc;

#[cfg(feature = "profile-ops")]
use crate::profiler::OpProfiler;

/// Main-fiber context, parked here while a user fiber runs.
pub(crate) struct MainCtx {
    pub stack: Vec<Value>,
    pub pc: usize,
    pub fp: usize,
}

/// VM interpreter.
///
/// `H` is the embedder seam: native functions receive `&mut Vm<H>` and reach
/// ambient services (stdout) through it. Symbols are append-only; a `Vm` can
/// evaluate any number of programs against the same bindings.
pub struct Vm<H> {
    host: H,
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) pc: usize,
    pub(crate) fp: usize,

    pub(crate) ops: Vec<u8>,
    pub(crate) consts: Vec<Value>,
    pub(crate) str_buf: Vec<u8>,
    pub(crate) debug_table: Vec<DebugSym>,
    pub(crate) unwind_table: Vec<EndLocalsSym>,
    pub(crate) src: String,

    pub(crate) methods: MethodTable<H>,
    pub(crate) fields: FieldTable,
    pub(crate) funcs: FuncTable<H>,
    pub(crate) structs: StructTable,
    pub(crate) tags: TagTable,

    /// Currently running fiber; `none` is the main fiber.
    pub(crate) cur_fiber: Value,
    /// Main-fiber context while suspended; `None` while main runs.
    pub(crate) main_ctx: Option<MainCtx>,

    params: VmParams,

    #[cfg(feature = "profile-ops")]
    pub(crate) profiler: OpProfiler,
}

impl Vm<StdioHost> {
    pub fn new() -> Self {
        Self::with_host(StdioHost, VmParams::default())
    }
}

impl Default for Vm<StdioHost> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Vm<H> {
    pub fn with_host(host: H, params: VmParams) -> Self {
        Self {
            host,
            heap: Heap::new(params.max_heap_pages),
            stack: Vec::new(),
            pc: 0,
            fp: 0,
            ops: Vec::new(),
            consts: Vec::new(),
            str_buf: Vec::new(),
            debug_table: Vec::new(),
            unwind_table: Vec::new(),
            src: String::new(),
            methods: MethodTable::new(),
            fields: FieldTable::new(),
            funcs: FuncTable::new(),
            structs: StructTable::new(),
            tags: TagTable::new(),
            cur_fiber: Value::none(),
            main_ctx: None,
            params,
            #[cfg(feature = "profile-ops")]
            profiler: OpProfiler::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Current state of the value stack.
    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    pub const fn params(&self) -> &VmParams {
        &self.params
    }

    pub fn methods(&self) -> &MethodTable<H> {
        &self.methods
    }

    pub fn structs(&self) -> &StructTable {
        &self.structs
    }

    #[cfg(feature = "profile-ops")]
    pub const fn profiler(&self) -> &OpProfiler {
        &self.profiler
    }

    /* Binding surface: append-only, used by the compiler and embedders. */

    /// Declare (or look up) a global function symbol without binding it.
    pub fn func_id(&mut self, name: &str) -> SymId {
        self.funcs.ensure(name)
    }

    pub fn register_native(&mut self, name: &str, f: NativeFn<H>) -> SymId {
        let id = self.funcs.ensure(name);
        self.funcs.bind(id, SymEntry::Native(f));
        id
    }

    pub fn register_func(
        &mut self,
        name: &str,
        pc: u32,
        num_params: u8,
        num_locals: u8,
    ) -> SymId {
        let id = self.funcs.ensure(name);
        self.funcs.bind(
            id,
            SymEntry::Bytecode {
                pc,
                num_params,
                num_locals,
            },
        );
        id
    }

    pub fn add_struct(&mut self, name: &str, num_fields: u32) -> u32 {
        self.structs.add(name, num_fields)
    }

    pub fn method_id(&mut self, name: &str) -> SymId {
        self.methods.ensure(name)
    }

    pub fn bind_method(&mut self, struct_id: u32, name: &str, entry: SymEntry<H>) -> SymId {
        let id = self.methods.ensure(name);
        self.methods.bind(struct_id, id, entry);
        id
    }

    pub fn field_id(&mut self, name: &str) -> SymId {
        self.fields.ensure(name)
    }

    pub fn bind_field(&mut self, name: &str, struct_id: u32, field_idx: u8) -> SymId {
        let id = self.fields.ensure(name);
        self.fields.bind(id, struct_id, field_idx);
        id
    }

    pub fn ensure_tag(&mut self, name: &str) -> u32 {
        self.tags.ensure(name)
    }

    /* Operand decoding, relative to the current pc. */

    #[inline]
    pub(crate) fn op_u8(&self, off: usize) -> u8 {
        self.ops[self.pc + off]
    }

    #[inline]
    pub(crate) fn op_i8(&self, off: usize) -> i8 {
        self.ops[self.pc + off] as i8
    }

    #[inline]
    pub(crate) fn op_u16(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.ops[self.pc + off], self.ops[self.pc + off + 1]])
    }

    #[inline]
    pub(crate) fn op_i16(&self, off: usize) -> i16 {
        self.op_u16(off) as i16
    }

    /// Jump offsets are relative to the opcode byte of the jump itself.
    #[inline]
    pub(crate) fn jump_rel(&mut self, rel: i16) {
        self.pc = (self.pc as i64 + rel as i64) as usize;
    }

    #[inline]
    pub(crate) fn reg(&self, off: u8) -> Value {
        self.stack[self.fp + off as usize]
    }

    #[inline]
    pub(crate) fn set_reg(&mut self, off: u8, v: Value) {
        self.stack[self.fp + off as usize] = v;
    }

    /* Program installation and the growth trampoline. */

    pub(crate) fn load(&mut self, buf: ByteCodeBuffer) -> Result<(), VmError> {
        if !buf.has_end_op() {
            return Err(VmError::NoEndOp);
        }
        self.ops = buf.ops;
        self.consts = buf.consts.iter().map(|&b| Value::from_bits(b)).collect();
        self.str_buf = buf.str_buf;
        self.debug_table = buf.debug_table;
        self.unwind_table = buf.unwind_table;
        self.src = buf.src;

        let len = std::cmp::max(
            std::cmp::max(2, self.params.initial_stack_len),
            buf.main_local_size as usize,
        );
        self.stack = vec![Value::none(); len];
        self.stack[FRAME_INFO_SLOT] = ReturnInfo::end_frame().pack();
        self.pc = 0;
        self.fp = 0;
        self.cur_fiber = Value::none();
        self.main_ctx = None;
        Ok(())
    }

    pub(crate) fn grow_stack(&mut self, required: usize) -> Result<(), VmError> {
        if required > self.params.max_stack_len {
            return Err(VmError::StackOverflow);
        }
        let new_len = std::cmp::min(
            self.params.max_stack_len,
            std::cmp::max(required, self.stack.len() * 2),
        );
        tracing::debug!(from = self.stack.len(), to = new_len, "growing stack");
        self.stack.resize(new_len, Value::none());
        Ok(())
    }

    /* Value rendering, used by string templates and panic messages. */

    pub fn value_to_string(&self, v: Value) -> String {
        if v.is_number() {
            return format!("{}", v.as_f64());
        }
        if let Some(bytes) = string::str_bytes(v, &self.str_buf) {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        if v.is_pointer() {
            let sid = unsafe { deref_cell(v).struct_id() };
            let name = self
                .structs
                .get(sid)
                .map(|d| d.name.as_str())
                .unwrap_or("object");
            return format!("<{name}>");
        }
        match v.tag() {
            Some(ValueTag::None) => "none".to_string(),
            Some(ValueTag::Boolean) => format!("{}", v.as_bool()),
            Some(ValueTag::Error) => {
                let id = v.as_error_tag();
                match self.tags.name(id) {
                    Some(name) => format!("error#{name}"),
                    None => format!("error#{id}"),
                }
            }
            Some(ValueTag::UserTag) => {
                let id = v.as_user_tag();
                match self.tags.name(id) {
                    Some(name) => format!("#{name}"),
                    None => format!("#{id}"),
                }
            }
            Some(ValueTag::Symbol) => format!("sym#{}", v.as_symbol()),
            Some(ValueTag::Integer) => format!("{}", v.as_int()),
            _ => "none".to_string(),
        }
    }

    pub(crate) fn attach_trace(&mut self, e: VmError) -> VmError {
        match e {
            VmError::Panic { reason, msg, trace } if trace.is_empty() => {
                match crate::backtrace::build_stack_trace(self, self.pc as u32, self.fp as u32) {
                    Ok(trace) => VmError::Panic { reason, msg, trace },
                    Err(e) => e,
                }
            }
            other => other,
        }
    }
}

impl<H> Drop for Vm<H> {
    fn drop(&mut self) {
        // Free side allocations of whatever is still live (programs that
        // panicked mid-run leave objects behind); rc bookkeeping no longer
        // matters past this point.
        for cell in self.heap.live_cell_pointers() {
            self.free_shape_buffers(cell);
        }
    }
}

impl<H: Host> Vm<H> {
    /// Run a compiled program to completion. The returned value is owned by
    /// the caller; release it through [`Vm::release`] when done with it.
    pub fn eval(&mut self, buf: ByteCodeBuffer) -> Result<Value, VmError> {
        self.load(buf)?;
        loop {
            match self.run() {
                Ok(ExecState::Done(v)) => return Ok(v),
                Ok(ExecState::StackGrow { required }) => self.grow_stack(required)?,
                Ok(ExecState::NestedReturn) => {
                    let e = VmError::panic(
                        crate::error::PanicReason::UnknownPanicReason,
                        "frame exited past the main body",
                    );
                    return Err(self.attach_trace(e));
                }
                Err(e) => return Err(self.attach_trace(e)),
            }
        }
    }
}
