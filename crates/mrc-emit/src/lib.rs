//! Stage 7: lowering to a single C compilation unit.
//!
//! The emitted stream targets the fixed runtime: `header.h` declares the
//! `MEM_*` accessors, the `BITCAST_*` and `FloatReg` helpers, the
//! `wrapper_*` libc shims and the trampoline signature.

mod calls;
mod emitter;
mod instr;

pub use emitter::*;

use thiserror::Error;

/// Emission errors.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("symbol {0} not found")]
    MissingSymbol(&'static str),
    #[error("call at {0:#x} targets unknown function {1:#x}")]
    UnknownCallTarget(u32, u32),
    #[error("odd double-precision register pair at {0:#x}")]
    OddDoubleRegister(u32),
    #[error("FP control move at {0:#x} is not against the FCSR")]
    UnexpectedControlRegister(u32),
    #[error("JR at {0:#x} has no jump table and is not a return")]
    UnsupportedJump(u32),
}

pub type Result<T> = std::result::Result<T, EmitError>;
