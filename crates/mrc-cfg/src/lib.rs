//! Analysis pipeline over the flat MIPS instruction stream.
//!
//! The central data structure is the instruction vector ([`Program::insns`]),
//! progressively annotated by the passes:
//!
//! 1. linear disassembly ([`disasm`])
//! 2. symbolic relocation recovery ([`resolve`])
//! 3. function discovery ([`functions`])
//! 4. control-flow graph construction ([`graph`])
//! 5. forward and backward liveness ([`liveness`])
//! 6. signature inference ([`signature`])
//!
//! Address-taken code pointers in the data sections are collected up front
//! by [`pointers`]. Each stage mutates a disjoint set of fields; the only
//! instruction rewriting happens in stage 2 (and the surgical patches of
//! stage 3).

pub mod disasm;
pub mod functions;
pub mod graph;
mod insn;
pub mod liveness;
pub mod pointers;
pub mod resolve;
pub mod signature;
#[cfg(test)]
mod testutil;

pub use insn::*;

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use thiserror::Error;

use mrc_elf::BinaryImage;
use mrc_isa::Op;

/// Analysis errors. All are fatal: a partial model would silently corrupt
/// the translation.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("symbol {0} not found")]
    MissingSymbol(&'static str),
    #[error("return at {0:#x} outside any known function")]
    OrphanReturn(u32),
    #[error("function {0:#x} has no return and no known noreturn pattern")]
    FunctionWithoutReturn(u32),
    #[error("unexpected {1:?} rewrite target at {0:#x}")]
    UnsupportedPatchSite(u32, Op),
    #[error("{0} layout at {1:#x} does not match a known compiler output")]
    AllocatorLayoutMismatch(&'static str, u32),
    #[error("GOT global load at {0:#x} is not a LW")]
    UnexpectedGotLoad(u32),
    #[error("jump table at {0:#x} lies outside .rodata")]
    JumpTableOutsideRodata(u32),
    #[error("JR at {0:#x} on a register other than $ra without a recognized jump table")]
    UnsupportedJumpRegister(u32),
    #[error("control-flow target {target:#x} from {from:#x} is outside .text")]
    EdgeOutOfRange { from: u32, target: u32 },
    #[error("call at {0:#x} targets unknown function {1:#x}")]
    UnknownCallTarget(u32, u32),
    #[error("missing extern function: {0}")]
    MissingExtern(String),
    #[error("extern call at {0:#x} targets an address with no symbol")]
    UnnamedExtern(u32),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Jump-table detection quirks for specific compiled binaries, keyed by
/// instruction index of the dispatching `JR`.
#[derive(Clone, Copy, Debug)]
pub enum JumpTableHint {
    /// Extend the backward scan for the bound-check `SLTIU`.
    ScanDepth { insn_index: usize, depth: usize },
    /// The bound check lives in another basic block; trust this case count.
    ForcedCases { insn_index: usize, num_cases: u32 },
}

/// Per-binary analysis configuration.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub jtbl_hints: Vec<JumpTableHint>,
    /// Data words that look like code pointers but are plain integers.
    pub data_pointer_exceptions: Vec<u32>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            // Known quirks of the IDO copt and as1 binaries.
            jtbl_hints: vec![
                JumpTableHint::ScanDepth {
                    insn_index: 368393,
                    depth: 18,
                },
                JumpTableHint::ForcedCases {
                    insn_index: 219382,
                    num_cases: 13,
                },
                JumpTableHint::ForcedCases {
                    insn_index: 370995,
                    num_cases: 12,
                },
            ],
            data_pointer_exceptions: vec![0x430b00, 0x433b00, 0x4a0000],
        }
    }
}

/// Function record keyed by entry VRAM in [`Program::functions`].
#[derive(Clone, Debug, Default)]
pub struct Function {
    /// Delay-slot addresses of each `JR $ra`.
    pub returns: Vec<u32>,
    /// Exclusive upper bound in VRAM.
    pub end_addr: u32,
    /// Number of `$a0..$a3` arguments.
    pub nargs: u32,
    /// 0 = void, 1 = `$v0`, 2 = `$v0:$v1`.
    pub nret: u32,
    /// `$v0` is an input (non-address-taken functions only).
    pub v0_in: bool,
    pub referenced_by_function_pointer: bool,
}

/// The accumulated analysis state.
pub struct Program<'a> {
    pub image: &'a BinaryImage,
    pub config: AnalysisConfig,
    pub insns: Vec<RInsn>,
    pub functions: BTreeMap<u32, Function>,
    pub label_addresses: FxHashSet<u32>,
    /// (location in data section, code address) pairs.
    pub data_function_pointers: Vec<(u32, u32)>,
    /// Code addresses materialized by `LI` rewrites.
    pub li_function_pointers: FxHashSet<u32>,
}

impl<'a> Program<'a> {
    /// Set up the analysis state; functions and labels are seeded from the
    /// symbol table and the GOT.
    pub fn new(image: &'a BinaryImage, config: AnalysisConfig) -> Result<Program<'a>> {
        if image.main_addr == 0 {
            return Err(AnalysisError::MissingSymbol("main"));
        }

        let mut program = Program {
            image,
            config,
            insns: Vec::new(),
            functions: BTreeMap::new(),
            label_addresses: FxHashSet::default(),
            data_function_pointers: Vec::new(),
            li_function_pointers: FxHashSet::default(),
        };

        for &addr in &image.text_function_syms {
            program.add_function(addr);
        }
        program.label_addresses.extend(&image.got_text_labels);

        Ok(program)
    }

    pub fn addr_to_index(&self, vram: u32) -> usize {
        (vram.wrapping_sub(self.image.text.vaddr) / 4) as usize
    }

    pub fn index_to_vram(&self, index: usize) -> u32 {
        self.image.text.vaddr + index as u32 * 4
    }

    pub fn text_contains(&self, vram: u32) -> bool {
        self.image.text_contains(vram)
    }

    /// Register a function entry if it lands in `.text`.
    pub fn add_function(&mut self, addr: u32) {
        if self.text_contains(addr) {
            self.functions.entry(addr).or_default();
        }
    }

    /// Entry address of the function containing `addr`.
    pub fn find_function_entry(&self, addr: u32) -> Option<u32> {
        self.functions.range(..=addr).next_back().map(|(&a, _)| a)
    }
}
