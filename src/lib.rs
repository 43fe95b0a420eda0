//! A deterministic, gas-metered WebAssembly MVP interpreter for sandboxed
//! embeddings.
//!
//! The engine decodes a binary module, materializes an instance with linear
//! memory, globals, and a caller-supplied gas budget, and executes exported
//! functions to completion. Every opcode is charged against the budget before
//! it runs; every violation (out-of-bounds access, integer overflow, stack
//! exhaustion, division by zero, NaN conversion) traps with a stable error
//! text instead of corrupting state. Host functionality is injected through
//! an import resolver; the core itself performs no I/O.
//!
//! Supported: the MVP opcode set plus the sign-extension opcodes and the
//! saturating truncations (`0xFC` prefix). Not supported: threads, SIMD,
//! reference types, bulk memory, multi-memory, multi-table, exceptions.
//!
//! ```
//! use std::sync::Arc;
//! use wasmeter::{FreeGasPolicy, Gas, HostFunction, ImportResolver, Instance, Module};
//!
//! struct NoImports;
//! impl ImportResolver for NoImports {
//!     fn get_function(&self, _module: &str, _field: &str) -> Option<Arc<HostFunction>> {
//!         None
//!     }
//! }
//!
//! // (module (func (export "calc") (result i32) i32.const -1))
//! let bytes = [
//!     0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // magic + version
//!     0x01, 0x05, 0x01, 0x60, 0x00, 0x01, 0x7F, // type () -> i32
//!     0x03, 0x02, 0x01, 0x00, // function section
//!     0x07, 0x08, 0x01, 0x04, b'c', b'a', b'l', b'c', 0x00, 0x00, // export
//!     0x0A, 0x06, 0x01, 0x04, 0x00, 0x41, 0x7F, 0x0B, // code: i32.const -1
//! ];
//! let module = Arc::new(Module::decode(&bytes).unwrap());
//! let mut vm = Instance::new(
//!     module,
//!     Box::new(FreeGasPolicy),
//!     Gas::new(0),
//!     &NoImports,
//! )
//! .unwrap();
//! let calc = vm.function_index("calc").unwrap();
//! assert_eq!(vm.invoke(calc, &[]).unwrap(), 0xFFFF_FFFF);
//! ```

pub mod binary;
pub mod error;
pub mod host;
pub mod model;
pub mod vm;

pub use binary::DecodeError;
pub use error::{Trap, VmError};
pub use host::{HostFunction, ImportResolver};
pub use model::{Export, ExportKind, FuncType, Module, ValType};
pub use vm::gas::{FreeGasPolicy, Gas, GasPolicy, SimpleGasPolicy};
pub use vm::instance::Instance;
pub use vm::opcode;
pub use vm::{MAX_PAGES, PAGE_SIZE, STACK_SIZE};

/// Decode a binary module, resolving every index space.
pub fn decode(bytes: &[u8]) -> Result<Module, DecodeError> {
    Module::decode(bytes)
}
