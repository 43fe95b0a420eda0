//! The decoded module record: unified function index space (imports first),
//! globals with resolved initial values, the element-initialized table, and
//! raw data segments awaiting instantiation.

use std::collections::HashMap;

use super::types::{Export, FuncType, GlobalType, Import, MemoryType, TableType, ValType};
use crate::binary::{sections, DecodeError};

/// Local declarations inside a function body (count repetitions of a type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDecl {
    pub count: u32,
    pub val_type: ValType,
}

/// Code body of a defined function. `code` holds the instruction bytes with
/// the terminating `end` stripped; the interpreter treats running off the end
/// of this buffer as the function's implicit return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncBody {
    pub locals: Vec<LocalDecl>,
    pub code: Vec<u8>,
}

impl FuncBody {
    /// Total local slot count: parameters are accounted separately.
    pub fn local_slots(&self) -> usize {
        self.locals.iter().map(|d| d.count as usize).sum()
    }
}

/// Where a function in the unified index space comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuncSource {
    /// Host-provided import, dispatched through the resolver's callable.
    Import { module: String, field: String },
    /// Locally defined body.
    Local(FuncBody),
}

/// A function in the unified index space: signature plus source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub sig: FuncType,
    pub source: FuncSource,
}

impl Function {
    pub fn is_import(&self) -> bool {
        matches!(self.source, FuncSource::Import { .. })
    }
}

/// A global with its declared type and the evaluated initial slot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalVar {
    pub ty: GlobalType,
    pub init: u64,
}

/// An active data segment with its resolved byte offset. The bytes are copied
/// into linear memory at instantiation time, after the gas-charged allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub offset: u32,
    pub init: Vec<u8>,
}

/// A decoded module. Immutable after decode; may be shared across instances.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Unified function index space: function imports first, then defined
    /// functions, exactly as call-site indices reference them.
    pub functions: Vec<Function>,
    pub table: Option<TableType>,
    /// The table index space with element segments applied. Slots never
    /// written by an element segment stay `None` and trap on `call_indirect`.
    pub table_elems: Vec<Option<u32>>,
    pub memory: Option<MemoryType>,
    pub globals: Vec<GlobalVar>,
    pub exports: HashMap<String, Export>,
    pub start: Option<u32>,
    pub data: Vec<DataSegment>,
    /// Names of custom sections, kept for debugging; payloads are discarded.
    pub custom_sections: Vec<String>,
}

impl Module {
    /// Decode a binary module, resolving every index space.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        sections::parse_module(bytes)
    }

    /// Declared minimum memory size in pages (zero when no memory section).
    pub fn min_pages(&self) -> u32 {
        self.memory.map(|m| m.limits.min).unwrap_or(0)
    }

    /// Declared maximum memory size in pages, when bounded.
    pub fn max_pages(&self) -> Option<u32> {
        self.memory.and_then(|m| m.limits.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_defaults() {
        let m = Module::default();
        assert_eq!(m.min_pages(), 0);
        assert_eq!(m.max_pages(), None);
        assert!(m.functions.is_empty());
    }
}
