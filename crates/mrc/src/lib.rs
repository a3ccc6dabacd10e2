//! MRC - MIPS recompiler.
//!
//! Translates a big-endian 32-bit MIPS (O32) ELF executable into a C
//! compilation unit that reproduces the program's behavior against the
//! companion runtime.
//!
//! # Example
//!
//! ```ignore
//! let data = std::fs::read("ido/cc")?;
//! let output = mrc::translate_elf(&data, mrc::Options::default())?;
//! print!("{output}");
//! ```

mod pipeline;

pub use pipeline::*;

// Re-export from sub-crates
pub use mrc_cfg::{AnalysisConfig, AnalysisError, Function, Program};
pub use mrc_elf::{BinaryImage, ElfError, Section};
pub use mrc_emit::EmitError;
pub use mrc_isa::{Instr, Op, RegMask};

use thiserror::Error;

/// Recompiler errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ELF error: {0}")]
    Elf(#[from] mrc_elf::ElfError),
    #[error("analysis error: {0}")]
    Analysis(#[from] mrc_cfg::AnalysisError),
    #[error("emission error: {0}")]
    Emit(#[from] mrc_emit::EmitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Translation options.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Declare callee-saved registers at module scope so they survive
    /// longjmp-style returns.
    pub conservative: bool,
    /// Per-binary analysis quirks.
    pub config: AnalysisConfig,
}

/// Parse an ELF image from raw bytes and translate it.
pub fn translate_elf(data: &[u8], options: Options) -> Result<String> {
    let image = BinaryImage::parse(data)?;
    translate_image(&image, options)
}

/// Translate an already-parsed binary image.
pub fn translate_image(image: &BinaryImage, options: Options) -> Result<String> {
    let mut pipeline = Pipeline::new(image, options.config)?;
    pipeline.analyze()?;
    Ok(pipeline.emit(options.conservative)?)
}
