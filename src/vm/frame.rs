//! Call frames and structured control blocks.

use crate::model::ValType;

/// Activation record of a function call. `base_pointer` addresses the first
/// local on the value stack; `base_block_index` is the block-stack depth on
/// entry, restored when the frame pops.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub fn_idx: usize,
    /// Byte offset of the next instruction within the function body.
    pub ip: usize,
    pub base_pointer: usize,
    pub base_block_index: usize,
}

impl Frame {
    pub fn new(fn_idx: usize, base_pointer: usize, base_block_index: usize) -> Self {
        Self {
            fn_idx,
            ip: 0,
            base_pointer,
            base_block_index,
        }
    }
}

/// Kind of a structured control scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Block,
    Loop,
    If,
    Else,
}

/// A structured control scope.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    /// Instruction pointer just past the block header; the jump target for
    /// branches to a loop.
    pub label_pointer: usize,
    pub kind: BlockKind,
    /// Declared result type; `None` is the empty blocktype.
    pub return_type: Option<ValType>,
    /// Value-stack height at entry, used to settle results on exit.
    pub base_pointer: usize,
    /// Only meaningful for `If`: the condition was zero, so the matching
    /// `else` body must execute.
    pub execute_else: bool,
}
