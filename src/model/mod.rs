//! In-memory module representation: type definitions and the decoded,
//! index-space-resolved module record.

pub mod module;
pub mod types;

pub use module::{DataSegment, FuncBody, FuncSource, Function, GlobalVar, LocalDecl, Module};
pub use types::{
    Export, ExportKind, FuncType, GlobalType, Import, ImportKind, Limits, MemoryType, TableType,
    ValType,
};
