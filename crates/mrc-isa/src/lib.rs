//! MIPS-I/II instruction set definitions for the recompiler.
//!
//! This crate provides big-endian instruction decoding, descriptor
//! predicates, register-set masks for the dataflow passes, and the O32
//! extern-function catalog shared by liveness analysis and code emission.

pub mod abi;
mod decode;
mod encode;
mod op;
mod regmask;
mod types;

pub use decode::*;
pub use encode::*;
pub use op::*;
pub use regmask::*;
pub use types::*;
