//! Execution engine: instance state, the interpreter loop, gas metering, and
//! the fixed-capacity stacks backing frames, blocks, and values.

pub mod frame;
pub mod gas;
pub mod instance;
pub mod interpreter;
pub mod numeric;
pub mod opcode;
pub mod stack;

/// One Wasm page: 64 KiB, the unit of memory growth.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Spec cap on linear memory, in pages (4 GiB address space).
pub const MAX_PAGES: u32 = 65536;

/// Value stack depth, in 64-bit slots.
pub const STACK_SIZE: usize = 1024 * 8;

/// Maximum active call frames.
pub const MAX_FRAMES: usize = 1024;

/// Maximum active control blocks.
pub const MAX_BLOCKS: usize = 1024;

/// Cap on `br_table` target-vector length.
pub const MAX_BR_TABLE_TARGETS: usize = 64 * 1024;
