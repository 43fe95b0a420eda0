//! Execution errors: traps (caught at the invoke boundary) and the non-trap
//! errors returned inline.

use thiserror::Error;

/// A trap terminates the current invocation from anywhere inside bytecode
/// execution. The display texts are stable; embedders and tests match on
/// them.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("unreachable")]
    Unreachable,

    #[error("integer divide by zero")]
    IntegerDivideByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("invalid conversion to integer")]
    InvalidIntConversion,

    #[error("out of bounds memory access")]
    OutOfBoundsMemoryAccess,

    #[error("out of bounds table access")]
    OutOfBoundsTableAccess,

    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,

    #[error("call stack overflow")]
    StackOverflow,

    #[error("call stack underflow")]
    StackUnderflow,

    #[error("frame stack overflow")]
    FrameOverflow,

    #[error("no frame to pop")]
    FrameUnderflow,

    #[error("block stack overflow")]
    BlockOverflow,

    #[error("cannot find matching block open")]
    BlockUnderflow,

    #[error("invalid break recover")]
    InvalidBreak,

    #[error("invalid break depth")]
    InvalidBreakDepth,

    #[error("cannot break out of current function")]
    BreakOutOfFunction,

    #[error("unknown opcode")]
    UnknownOpcode,

    #[error("unknown block return type")]
    UnknownReturnType,

    #[error("too many br_table targets")]
    TooManyBrTableTargets,

    #[error("no matching If for Else block")]
    NoMatchingIf,

    #[error("unsigned leb overflow")]
    LebOverflow,
}

/// Errors an invocation (or instance construction) returns inline. Traps are
/// wrapped here once they reach the invoke boundary; the remaining variants
/// never unwind bytecode execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error(transparent)]
    Trap(#[from] Trap),

    #[error("func not found at index")]
    FuncNotFound,

    #[error("invalid block type")]
    InvalidBlockType,

    #[error("out of gas")]
    OutOfGas,

    #[error("wrong number of arguments")]
    WrongNumberOfArgs,

    #[error("unresolved import: {module}.{field}")]
    UnresolvedImport { module: String, field: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_texts_are_stable() {
        assert_eq!(Trap::Unreachable.to_string(), "unreachable");
        assert_eq!(
            Trap::IntegerDivideByZero.to_string(),
            "integer divide by zero"
        );
        assert_eq!(Trap::IntegerOverflow.to_string(), "integer overflow");
        assert_eq!(
            Trap::InvalidIntConversion.to_string(),
            "invalid conversion to integer"
        );
        assert_eq!(
            Trap::OutOfBoundsMemoryAccess.to_string(),
            "out of bounds memory access"
        );
        assert_eq!(
            Trap::OutOfBoundsTableAccess.to_string(),
            "out of bounds table access"
        );
        assert_eq!(
            Trap::IndirectCallTypeMismatch.to_string(),
            "indirect call type mismatch"
        );
    }

    #[test]
    fn trap_text_passes_through_vm_error() {
        let e = VmError::from(Trap::Unreachable);
        assert_eq!(e.to_string(), "unreachable");
        assert_eq!(VmError::OutOfGas.to_string(), "out of gas");
    }
}
