//! VM parameters and bit-layout constants

/* VALUE ENCODING */

/// Quiet-NaN mask. Any word with all of these bits set is a tagged value or a
/// pointer; anything else is a plain IEEE-754 double.
pub const QNAN_MASK: u64 = 0x7ffc_0000_0000_0000;

/// Sign bit. Together with [`QNAN_MASK`] it marks a heap pointer.
pub const SIGN_MASK: u64 = 0x8000_0000_0000_0000;

/// A pointer value keeps the low 48 bits of the address.
pub const POINTER_PAYLOAD_MASK: u64 = 0x0000_ffff_ffff_ffff;

/// Tag field position for non-pointer tagged values.
pub const TAG_SHIFT: u64 = 32;

/// Width of the tag field, in bits.
pub const TAG_WIDTH: u64 = 3;

pub const TAG_MASK: u64 = ((1 << TAG_WIDTH) - 1) << TAG_SHIFT;

/// Payload of a tagged (non-pointer) value.
pub const TAGGED_PAYLOAD_MASK: u64 = 0x0000_0000_ffff_ffff;

pub const TAG_NONE: u64 = 0;
pub const TAG_BOOLEAN: u64 = 1;
pub const TAG_ERROR: u64 = 2;
pub const TAG_CONST_STRING: u64 = 3;
pub const TAG_USER_TAG: u64 = 4;
pub const TAG_SYMBOL: u64 = 5;
pub const TAG_INTEGER: u64 = 6;

/* HEAP GEOMETRY */

/// Cells per heap page. At 40 bytes per cell a page is ~64 KiB.
pub const PAGE_CELLS: usize = 1600;

/// Size of a single heap cell, in bytes. Every object shape must fit.
pub const CELL_SIZE: usize = 40;

/// Sentinel struct id: marks free cells and "no id" slots in tables.
pub const NULL_ID: u32 = u32::MAX;

/// 16-bit variant used inside opcode operands (inline caches, jump tables).
pub const NULL_ID_U16: u16 = u16::MAX;

/// Program counter sentinel marking a finished fiber.
pub const NULL_PC: u32 = u32::MAX;

/* BUILTIN STRUCT IDS */

pub const LIST_ID: u32 = 0;
pub const MAP_ID: u32 = 1;
pub const STRING_ID: u32 = 2;
pub const LAMBDA_ID: u32 = 3;
pub const CLOSURE_ID: u32 = 4;
pub const FIBER_ID: u32 = 5;

/// First struct id available to user-defined types.
pub const FIRST_USER_STRUCT_ID: u32 = 6;

/// Reserved id for the page sentinel cell. Never in the struct table.
pub const SENTINEL_ID: u32 = u32::MAX - 1;

/* FRAME LAYOUT */

/// Frame slot holding the call's return value.
pub const FRAME_RET_SLOT: usize = 0;

/// Frame slot holding the packed return info.
pub const FRAME_INFO_SLOT: usize = 1;

/// First argument slot of a frame.
pub const FRAME_ARG_START: usize = 2;

/// `End` operand meaning "main returns none".
pub const NO_MAIN_LOCAL: u8 = 255;

/// Maximum number of values a closure can capture inline.
pub const MAX_CAPTURES: usize = 3;

/// Maximum field count of a small object.
pub const MAX_SMALL_OBJECT_FIELDS: usize = 4;

/* TUNABLES */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Runtime limits. Programs exceeding them fail with `StackOverflow` or
/// `OutOfMemory` rather than exhausting the host process.
pub struct VmParams {
    /// Stack slots reserved before entering main, if the program requires less.
    pub initial_stack_len: usize,
    /// Hard cap on stack slots; the growth trampoline fails beyond it.
    pub max_stack_len: usize,
    /// Hard cap on heap pages.
    pub max_heap_pages: usize,
}

impl Default for VmParams {
    fn default() -> Self {
        Self {
            initial_stack_len: 64,
            max_stack_len: 1024 * 1024,
            max_heap_pages: 16 * 1024,
        }
    }
}
