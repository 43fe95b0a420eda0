//! Host bridge: the contract by which imported functions reach embedder code.

use std::sync::Arc;

use crate::error::Trap;
use crate::vm::instance::Instance;

/// A host callable bound to a function import. It receives the calling
/// instance and the argument slots in declaration order, and returns the
/// result slot. A returned trap propagates out of the calling bytecode.
///
/// Host code may read and write linear memory through the instance's public
/// memory operations; it must not touch the interpreter's stacks.
pub type HostFunction = dyn Fn(&mut Instance, &[u64]) -> Result<u64, Trap> + Send + Sync;

/// Embedder-supplied lookup for function imports, keyed by the import's
/// module and field names. Returning `None` fails instantiation.
pub trait ImportResolver {
    fn get_function(&self, module: &str, field: &str) -> Option<Arc<HostFunction>>;
}
