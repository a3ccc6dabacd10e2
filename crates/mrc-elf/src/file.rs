//! Big-endian ELF32 parsing.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::constants::*;
use crate::image::*;
use crate::{ElfError, Result};

fn be16(data: &[u8], offset: usize) -> Result<u16> {
    if offset + 2 > data.len() {
        return Err(ElfError::SectionOutOfBounds);
    }
    Ok(u16::from_be_bytes([data[offset], data[offset + 1]]))
}

fn be32(data: &[u8], offset: usize) -> Result<u32> {
    if offset + 4 > data.len() {
        return Err(ElfError::SectionOutOfBounds);
    }
    Ok(u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]))
}

fn byte(data: &[u8], offset: usize) -> Result<u8> {
    data.get(offset).copied().ok_or(ElfError::SectionOutOfBounds)
}

/// NUL-terminated string starting at `offset`.
fn cstr(data: &[u8], offset: usize) -> String {
    let bytes = &data[offset.min(data.len())..];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[derive(Clone, Debug, Default)]
struct SectionHeader {
    name: String,
    sh_type: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    entsize: u32,
}

fn parse_section_headers(data: &[u8]) -> Result<Vec<SectionHeader>> {
    let shoff = be32(data, 32)? as usize;
    let shentsize = be16(data, 46)? as usize;
    let shnum = be16(data, 48)? as usize;
    let shstrndx = be16(data, 50)? as usize;

    if shstrndx == 0 {
        // (We could look at program headers instead in this case.)
        return Err(ElfError::Stripped);
    }

    let mut raw = Vec::with_capacity(shnum);
    for i in 0..shnum {
        let off = shoff + i * shentsize;
        raw.push(SectionHeader {
            name: String::new(),
            sh_type: be32(data, off + 4)?,
            addr: be32(data, off + 12)?,
            offset: be32(data, off + 16)?,
            size: be32(data, off + 20)?,
            link: be32(data, off + 24)?,
            info: be32(data, off + 28)?,
            entsize: be32(data, off + 36)?,
        });
    }

    let str_off = raw
        .get(shstrndx)
        .ok_or(ElfError::SectionOutOfBounds)?
        .offset as usize;
    let name_offsets: Vec<usize> = (0..shnum)
        .map(|i| be32(data, shoff + i * shentsize).map(|v| v as usize))
        .collect::<Result<_>>()?;
    for (shdr, name_off) in raw.iter_mut().zip(name_offsets) {
        shdr.name = cstr(data, str_off + name_off);
    }

    Ok(raw)
}

fn load_section(data: &[u8], shdr: &SectionHeader) -> Result<Section> {
    let start = shdr.offset as usize;
    let end = start + shdr.size as usize;
    if end > data.len() {
        return Err(ElfError::SectionOutOfBounds);
    }
    Ok(Section {
        vaddr: shdr.addr,
        data: data[start..end].to_vec(),
    })
}

impl BinaryImage {
    /// Parse a big-endian MIPS ELF32 executable.
    pub fn parse(data: &[u8]) -> Result<BinaryImage> {
        if data.len() < 52 || data[0] != 0x7f || &data[1..4] != b"ELF" {
            return Err(ElfError::NotElf);
        }
        if data[5] != ELF_DATA_MSB || be16(data, 18)? != EM_MIPS {
            return Err(ElfError::NotBigEndianMips);
        }

        let sections = parse_section_headers(data)?;

        let find = |name: &str| sections.iter().position(|s| s.name == name);
        let find_type = |t: u32| sections.iter().position(|s| s.sh_type == t);

        let text_index = find(".text").ok_or(ElfError::MissingSection(".text"))?;
        let symtab_index = find_type(SHT_SYMTAB);
        let dynsym_index = find_type(SHT_DYNSYM);

        let Some(dynsym_index) = dynsym_index else {
            return if symtab_index.is_some() {
                Err(ElfError::SymtabOnly)
            } else {
                Err(ElfError::MissingSection(".dynsym"))
            };
        };
        let reginfo_index =
            find_type(SHT_MIPS_REGINFO).ok_or(ElfError::MissingSection(".reginfo"))?;
        let dynamic_index = find_type(SHT_DYNAMIC).ok_or(ElfError::MissingSection(".dynamic"))?;
        let got_index = find(".got").ok_or(ElfError::MissingSection(".got"))?;

        let mut image = BinaryImage {
            text: load_section(data, &sections[text_index])?,
            ..BinaryImage::default()
        };
        if let Some(i) = find(".rodata") {
            image.rodata = Some(load_section(data, &sections[i])?);
        }
        if let Some(i) = find(".data") {
            image.data = Some(load_section(data, &sections[i])?);
        }
        if let Some(i) = find(".bss") {
            image.bss = Some(BssRange {
                vaddr: sections[i].addr,
                len: sections[i].size,
            });
        }

        parse_dynamic_symbols(
            data,
            &sections,
            dynsym_index,
            reginfo_index,
            dynamic_index,
            got_index,
            &mut image,
        )?;

        validate_text_relocations(data, &sections, text_index, symtab_index)?;

        debug!(
            text_vaddr = format_args!("{:#x}", image.text.vaddr),
            text_len = image.text.len(),
            got_locals = image.got_locals.len(),
            got_globals = image.got_globals.len(),
            symbols = image.symbol_names.len(),
            "parsed image"
        );

        Ok(image)
    }
}

fn parse_dynamic_symbols(
    data: &[u8],
    sections: &[SectionHeader],
    dynsym_index: usize,
    reginfo_index: usize,
    dynamic_index: usize,
    got_index: usize,
    image: &mut BinaryImage,
) -> Result<()> {
    let dynsym = &sections[dynsym_index];
    let dynstr = sections
        .get(dynsym.link as usize)
        .ok_or(ElfError::SectionOutOfBounds)?;
    let reginfo = &sections[reginfo_index];
    let dynamic = &sections[dynamic_index];
    let got = &sections[got_index];

    // gp holds this value throughout the program run
    let gp_base = be32(data, reginfo.offset as usize + REGINFO_GP_OFFSET)?;

    let mut got_start = 0u32;
    let mut local_got_no = 0u32;
    let mut first_got_sym = 0u32;
    let mut dynsym_no = 0u32; // section size can't be used due to alignment padding

    let mut off = dynamic.offset as usize;
    let dyn_end = off + dynamic.size as usize;
    while off + DYN_ENTSIZE <= dyn_end {
        let tag = be32(data, off)?;
        let val = be32(data, off + 4)?;
        match tag {
            DT_PLTGOT => got_start = val,
            DT_MIPS_LOCAL_GOTNO => local_got_no = val,
            DT_MIPS_GOTSYM => first_got_sym = val,
            DT_MIPS_SYMTABNO => dynsym_no = val,
            _ => {}
        }
        off += DYN_ENTSIZE;
    }

    if got_start == 0 {
        return Err(ElfError::NoGotStart);
    }

    // value to add to an asm gp offset so that -adj(gp) lands on GOT entry 0
    let gp_adj = gp_base.wrapping_sub(got_start);
    if gp_adj >= 0x10000 {
        return Err(ElfError::GpAdjustTooLarge(gp_adj));
    }

    let global_got_no = dynsym_no.saturating_sub(first_got_sym) as usize;
    image.got_globals = vec![0u32; global_got_no];

    let mut symbol_names = FxHashMap::default();

    for i in 0..dynsym_no {
        let sym_off = dynsym.offset as usize + i as usize * SYM_ENTSIZE;
        let name = cstr(data, dynstr.offset as usize + be32(data, sym_off)? as usize);
        let addr = be32(data, sym_off + 4)?;
        let info = byte(data, sym_off + 12)?;
        let shndx = be16(data, sym_off + 14)?;
        let sym_type = info & 0xf;

        if name == "_procedure_table" {
            image.procedure_table_start = addr;
        } else if name == "_procedure_table_size" {
            image.procedure_table_len = 40 * addr;
        }

        if shndx == SHN_MIPS_TEXT && sym_type == STT_FUNC {
            image.text_function_syms.push(addr);
            if name == "main" {
                image.main_addr = addr;
            }
            if name == "_mcount" {
                image.mcount_addr = addr;
            }
            symbol_names.insert(addr, name.clone());
        }

        if i >= first_got_sym {
            let idx = (i - first_got_sym) as usize;
            let got_off =
                got.offset as usize + (local_got_no + (i - first_got_sym)) as usize * 4;
            let got_value = be32(data, got_off)?;

            image.got_globals[idx] = if shndx == SHN_MIPS_TEXT && sym_type == STT_FUNC {
                // the symbol address keeps the 3-instruction gp prologue
                image.got_text_labels.push(addr);
                addr
            } else if sym_type == STT_OBJECT && (shndx == SHN_UNDEF || shndx == SHN_COMMON) {
                // symbol defined externally (for example in libc)
                got_value
            } else {
                addr
            };

            symbol_names.insert(image.got_globals[idx], name);
        }
    }

    image.got_locals = (0..local_got_no)
        .map(|i| be32(data, got.offset as usize + i as usize * 4))
        .collect::<Result<_>>()?;

    image.gp_value = gp_base;
    image.gp_value_adj = gp_adj;
    image.symbol_names = symbol_names;

    Ok(())
}

/// The recompiler does not apply text relocations (PIC binaries carry
/// none), but malformed relocation sections are still rejected.
fn validate_text_relocations(
    data: &[u8],
    sections: &[SectionHeader],
    text_index: usize,
    symtab_index: Option<usize>,
) -> Result<()> {
    for shdr in sections {
        if shdr.sh_type != SHT_REL || shdr.info as usize != text_index {
            continue;
        }
        if symtab_index.is_none() {
            return Err(ElfError::RelocWithoutSymtab);
        }

        let mut prev_hi = false;
        let mut off = shdr.offset as usize;
        let end = off + shdr.size as usize;
        while off + REL_ENTSIZE <= end {
            let rtype = be32(data, off + 4)? & 0xff;
            match rtype {
                R_MIPS_HI16 => {
                    if prev_hi {
                        return Err(ElfError::ConsecutiveHi16);
                    }
                    prev_hi = true;
                }
                R_MIPS_LO16 => prev_hi = false,
                R_MIPS_26 => {}
                other => return Err(ElfError::BadRelocationType(other)),
            }
            off += REL_ENTSIZE;
        }
        if prev_hi {
            return Err(ElfError::UnmatchedHi16);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_non_elf() {
        assert!(matches!(
            BinaryImage::parse(&[0u8; 64]),
            Err(ElfError::NotElf)
        ));
    }

    #[test]
    fn test_reject_little_endian() {
        let mut data = vec![0u8; 64];
        data[0] = 0x7f;
        data[1..4].copy_from_slice(b"ELF");
        data[4] = 1; // ELFCLASS32
        data[5] = 1; // little endian
        data[18] = 0;
        data[19] = 8; // EM_MIPS, big-endian position would be byte 18
        assert!(matches!(
            BinaryImage::parse(&data),
            Err(ElfError::NotBigEndianMips)
        ));
    }

    #[test]
    fn test_reject_stripped() {
        let mut data = vec![0u8; 64];
        data[0] = 0x7f;
        data[1..4].copy_from_slice(b"ELF");
        data[5] = ELF_DATA_MSB;
        data[19] = EM_MIPS as u8; // big-endian e_machine at offset 18..20
        // e_shstrndx stays 0
        assert!(matches!(BinaryImage::parse(&data), Err(ElfError::Stripped)));
    }

    #[test]
    fn test_cstr() {
        let data = b"abc\0def";
        assert_eq!(cstr(data, 0), "abc");
        assert_eq!(cstr(data, 4), "def");
        assert_eq!(cstr(data, 20), "");
    }
}
