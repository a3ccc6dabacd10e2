//! ELF parser for big-endian MIPS (O32) executables.
//!
//! Produces a [`BinaryImage`]: section buffers with their virtual address
//! ranges, the GOT split into local and global entries, the `$gp` base
//! value, and the symbol map the analysis passes consume.

mod constants;
mod file;
mod image;

pub use constants::*;
pub use image::*;

use thiserror::Error;

/// ELF parsing errors. All are fatal: the recompiler refuses inputs it
/// cannot fully model.
#[derive(Error, Debug)]
pub enum ElfError {
    #[error("not an ELF file")]
    NotElf,
    #[error("not big-endian MIPS")]
    NotBigEndianMips,
    #[error("missing section headers; stripped binaries are not supported")]
    Stripped,
    #[error("missing {0} section")]
    MissingSection(&'static str),
    #[error(".symtab-only binaries are not supported; a .dynsym is required")]
    SymtabOnly,
    #[error("section data out of bounds")]
    SectionOutOfBounds,
    #[error("GOT start missing from .dynamic")]
    NoGotStart,
    #[error("gp adjustment 0x{0:x} does not fit in 16 bits")]
    GpAdjustTooLarge(u32),
    #[error("relocations present without a .symtab section")]
    RelocWithoutSymtab,
    #[error("consecutive R_MIPS_HI16 relocations")]
    ConsecutiveHi16,
    #[error("R_MIPS_HI16 without matching R_MIPS_LO16")]
    UnmatchedHi16,
    #[error("unsupported relocation type {0}")]
    BadRelocationType(u32),
}

pub type Result<T> = std::result::Result<T, ElfError>;
