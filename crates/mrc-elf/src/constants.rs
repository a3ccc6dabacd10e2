//! ELF constants for the subset of the format this parser understands.

pub const ELF_DATA_MSB: u8 = 2;
pub const EM_MIPS: u16 = 8;

// sh_type
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_REL: u32 = 9;
pub const SHT_DYNSYM: u32 = 11;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_MIPS_REGINFO: u32 = 0x7000_0006;

// d_tag
pub const DT_PLTGOT: u32 = 3;
pub const DT_MIPS_LOCAL_GOTNO: u32 = 0x7000_000a;
pub const DT_MIPS_SYMTABNO: u32 = 0x7000_0011;
pub const DT_MIPS_GOTSYM: u32 = 0x7000_0013;

// st_shndx special values
pub const SHN_UNDEF: u16 = 0;
pub const SHN_MIPS_ACOMMON: u16 = 0xff00;
pub const SHN_MIPS_TEXT: u16 = 0xff01;
pub const SHN_MIPS_DATA: u16 = 0xff02;
pub const SHN_COMMON: u16 = 0xfff2;

// st_info type nibble
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

// relocation types on .text
pub const R_MIPS_HI16: u32 = 5;
pub const R_MIPS_LO16: u32 = 6;
pub const R_MIPS_26: u32 = 4;

pub const SYM_ENTSIZE: usize = 16;
pub const DYN_ENTSIZE: usize = 8;
pub const REL_ENTSIZE: usize = 8;
/// Offset of `ri_gp_value` inside `.reginfo`.
pub const REGINFO_GP_OFFSET: usize = 20;
