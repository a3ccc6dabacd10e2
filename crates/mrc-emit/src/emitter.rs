//! The emitter: one pass over the function table producing the complete
//! compilation unit.

use tracing::{debug, info};

use mrc_cfg::{Function, Program};
use mrc_elf::Section;
use mrc_isa::{reg_name, REG_A0};

use crate::{EmitError, Result};

/// Host page granularity assumed for the guest data mapping.
const PAGE_SIZE: u32 = 0x1000;
/// Guest stack carved out below the data sections.
const STACK_SIZE: u32 = 1024 * 1024;

/// Lower the analyzed program to C.
///
/// Emission appends labels for call continuations as it goes, so it takes
/// the program mutably; everything else is read-only by this point.
pub fn emit(program: &mut Program, conservative: bool) -> Result<String> {
    let emitter = Emitter {
        program,
        conservative,
        out: String::with_capacity(1 << 20),
    };
    emitter.run()
}

pub(crate) struct Emitter<'e, 'a> {
    pub(crate) program: &'e mut Program<'a>,
    pub(crate) conservative: bool,
    pub(crate) out: String,
}

/// GPR name in the emitted code.
pub(crate) fn r(reg: u8) -> &'static str {
    reg_name(reg)
}

/// Word view of an FP register.
pub(crate) fn wr(reg: u8) -> String {
    format!("f{}.w[{}]", reg & !1, reg & 1)
}

/// Float view of an FP register.
pub(crate) fn fr(reg: u8) -> String {
    format!("f{}.f[{}]", reg & !1, reg & 1)
}

/// Double view of an even FP register pair.
pub(crate) fn dr(reg: u8) -> String {
    format!("f{}", reg & !1)
}

impl<'e, 'a> Emitter<'e, 'a> {
    pub(crate) fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn run(mut self) -> Result<String> {
        let (min_addr, max_addr, stack_bottom) = self.data_range();

        self.push("#include \"header.h\"\n");
        if self.conservative {
            self.push("static uint32_t s0, s1, s2, s3, s4, s5, s6, s7, fp;\n");
        }

        self.data_array("rodata", self.program.image.rodata.clone());
        self.data_array("data", self.program.image.data.clone());

        self.forward_declarations();
        self.trampoline();
        self.entry_harness(min_addr, max_addr, stack_bottom)?;
        self.function_bodies()?;

        info!(bytes = self.out.len(), "emitted compilation unit");
        Ok(self.out)
    }

    /// Page-aligned guest data range plus the stack bottom below it.
    fn data_range(&self) -> (u32, u32, u32) {
        let image = self.program.image;
        let mut min_addr = u32::MAX;
        let mut max_addr = 0u32;

        let mut widen = |vaddr: u32, len: u32| {
            if len > 0 {
                min_addr = min_addr.min(vaddr);
                max_addr = max_addr.max(vaddr + len);
            }
        };
        if let Some(s) = &image.data {
            widen(s.vaddr, s.len());
        }
        if let Some(s) = &image.rodata {
            widen(s.vaddr, s.len());
        }
        if let Some(b) = &image.bss {
            widen(b.vaddr, b.len);
        }
        if min_addr == u32::MAX {
            min_addr = image.text_end();
            max_addr = image.text_end();
        }

        min_addr &= !(PAGE_SIZE - 1);
        max_addr = (max_addr + (PAGE_SIZE - 1)) & !(PAGE_SIZE - 1);

        let stack_bottom = min_addr.wrapping_sub(16);
        (min_addr.wrapping_sub(STACK_SIZE), max_addr, stack_bottom)
    }

    fn data_array(&mut self, name: &str, section: Option<Section>) {
        self.push(&format!("static const uint32_t {name}[] = {{\n"));
        if let Some(section) = section.as_ref() {
            let mut offset = 0usize;
            while offset < section.data.len() {
                self.push(&format!("0x{:x},", section.word_at(offset)));
                if offset % 32 == 28 {
                    self.push("\n");
                }
                offset += 4;
            }
        }
        self.push("};\n");
    }

    pub(crate) fn function_name(&self, addr: u32) -> String {
        match self.program.image.symbol(addr) {
            Some(name) => format!("f_{name}"),
            None => format!("func_{addr:x}"),
        }
    }

    fn function_signature(&self, addr: u32, f: &Function) -> String {
        let mut s = String::from("static ");
        s.push_str(match f.nret {
            0 => "void ",
            1 => "uint32_t ",
            _ => "uint64_t ",
        });
        s.push_str(&self.function_name(addr));
        s.push_str("(uint8_t *mem, uint32_t sp");
        if f.v0_in {
            s.push_str(", uint32_t v0");
        }
        for i in 0..f.nargs {
            s.push_str(&format!(", uint32_t {}", r(REG_A0 + i as u8)));
        }
        s.push(')');
        s
    }

    fn is_function_emitted(&self, addr: u32) -> bool {
        let index = self.program.addr_to_index(addr);
        !self.program.insns[index].f_livein.is_empty()
    }

    fn forward_declarations(&mut self) {
        let decls: Vec<String> = self
            .program
            .functions
            .iter()
            .filter(|(&addr, _)| self.is_function_emitted(addr))
            .map(|(&addr, f)| self.function_signature(addr, f))
            .collect();
        for d in decls {
            self.push(&d);
            self.push(";\n");
        }
    }

    /// The indirect-call dispatcher over every address-taken function.
    fn trampoline(&mut self) {
        if self.program.data_function_pointers.is_empty()
            && self.program.li_function_pointers.is_empty()
        {
            return;
        }

        self.push(
            "uint64_t trampoline(uint8_t *mem, uint32_t sp, uint32_t a0, uint32_t a1, \
             uint32_t a2, uint32_t a3, uint32_t fp_dest) {\n",
        );
        self.push("switch (fp_dest) {\n");

        let cases: Vec<(u32, Function)> = self
            .program
            .functions
            .iter()
            .filter(|(_, f)| f.referenced_by_function_pointer)
            .map(|(&addr, f)| (addr, f.clone()))
            .collect();
        for (addr, f) in cases {
            self.push(&format!("case 0x{addr:x}: "));
            match f.nret {
                1 => self.push("return (uint64_t)"),
                2 => self.push("return "),
                _ => {}
            }
            self.push(&self.function_name(addr));
            self.push("(mem, sp");
            for i in 0..f.nargs {
                self.push(&format!(", a{i}"));
            }
            self.push(")");
            if f.nret == 1 {
                self.push(" << 32");
            }
            self.push(";");
            if f.nret == 0 {
                self.push(" return 0;");
            }
            self.push("\n");
        }

        self.push("default: abort();");
        self.push("}\n");
        self.push("}\n");
    }

    fn symbol_address(&self, name: &'static str) -> Result<u32> {
        self.program
            .image
            .symbol_names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(&addr, _)| addr)
            .ok_or(EmitError::MissingSymbol(name))
    }

    /// `run(mem, argc, argv)`: map the data range, copy the initialized
    /// sections, synthesize argv in guest memory and call into `main`.
    fn entry_harness(&mut self, min_addr: u32, max_addr: u32, stack_bottom: u32) -> Result<()> {
        let image = self.program.image;
        let argc_addr = self.symbol_address("__Argc")?;
        let argv_addr = self.symbol_address("__Argv")?;
        let (rodata_vaddr, rodata_len) = image
            .rodata
            .as_ref()
            .map(|s| (s.vaddr, s.len()))
            .unwrap_or((0, 0));
        let (data_vaddr, data_len) = image
            .data
            .as_ref()
            .map(|s| (s.vaddr, s.len()))
            .unwrap_or((0, 0));

        self.push("int run(uint8_t *mem, int argc, char *argv[]) {\n");
        self.push(&format!(
            "mmap_initial_data_range(mem, 0x{min_addr:x}, 0x{max_addr:x});\n"
        ));
        self.push(&format!(
            "memcpy(mem + 0x{rodata_vaddr:x}, rodata, 0x{rodata_len:x});\n"
        ));
        self.push(&format!(
            "memcpy(mem + 0x{data_vaddr:x}, data, 0x{data_len:x});\n"
        ));

        self.push(&format!("MEM_S32(0x{argc_addr:x}) = argc;\n"));
        self.push(&format!("MEM_S32(0x{stack_bottom:x}) = argc;\n"));
        self.push("uint32_t al = argc * 4; for (int i = 0; i < argc; i++) al += strlen(argv[i]) + 1;\n");
        self.push("uint32_t arg_addr = wrapper_malloc(mem, al);\n");
        self.push(&format!("MEM_U32(0x{argv_addr:x}) = arg_addr;\n"));
        self.push(&format!("MEM_U32(0x{:x}) = arg_addr;\n", stack_bottom + 4));
        self.push("uint32_t arg_strpos = arg_addr + argc * 4;\n");
        self.push(
            "for (int i = 0; i < argc; i++) {MEM_U32(arg_addr + i * 4) = arg_strpos; \
             uint32_t p = 0; do { MEM_S8(arg_strpos) = argv[i][p]; ++arg_strpos; } \
             while (argv[i][p++] != '\\0');}\n",
        );
        self.push("setup_libc_data(mem);\n");

        let main_name = self.function_name(image.main_addr);
        let main_func = self
            .program
            .functions
            .get(&image.main_addr)
            .ok_or(EmitError::MissingSymbol("main"))?;
        let nargs = main_func.nargs;
        self.push(&format!("int ret = {main_name}(mem, 0x{stack_bottom:x}"));
        if nargs >= 1 {
            self.push(", argc");
        }
        if nargs >= 2 {
            self.push(", arg_addr");
        }
        self.push(");\n");
        self.push("return ret;\n");
        self.push("}\n");
        Ok(())
    }

    fn function_bodies(&mut self) -> Result<()> {
        let order: Vec<(u32, Function)> = self
            .program
            .functions
            .iter()
            .map(|(&addr, f)| (addr, f.clone()))
            .collect();

        for (start_addr, f) in order {
            if !self.is_function_emitted(start_addr) {
                debug!(addr = format_args!("{start_addr:#x}"), "skipping unused function");
                continue;
            }

            self.push("\n");
            let sig = self.function_signature(start_addr, &f);
            self.push(&sig);
            self.push(" {\n");
            self.push("const uint32_t zero = 0;\n");

            if !self.conservative {
                self.push("uint32_t at = 0, v1 = 0, t0 = 0, t1 = 0, t2 = 0,\n");
                self.push("t3 = 0, t4 = 0, t5 = 0, t6 = 0, t7 = 0, s0 = 0, s1 = 0, s2 = 0, s3 = 0, s4 = 0, s5 = 0,\n");
                self.push("s6 = 0, s7 = 0, t8 = 0, t9 = 0, gp = 0, fp = 0, s8 = 0, ra = 0;\n");
            } else {
                self.push("uint32_t at = 0, v1 = 0, t0 = 0, t1 = 0, t2 = 0,\n");
                self.push("t3 = 0, t4 = 0, t5 = 0, t6 = 0, t7 = 0, t8 = 0, t9 = 0, gp = 0x10000, ra = 0x10000;\n");
            }

            self.push("uint32_t lo = 0, hi = 0;\n");
            self.push("int cf = 0;\n");
            self.push("uint64_t temp64;\n");
            self.push("double tempf64;\n");
            self.push("uint32_t fp_dest;\n");
            self.push("void *dest;\n");

            if !f.v0_in {
                self.push("uint32_t v0 = 0;\n");
            }
            for j in f.nargs..4 {
                self.push(&format!("uint32_t {} = 0;\n", r(REG_A0 + j as u8)));
            }

            let start = self.program.addr_to_index(start_addr);
            let end = self.program.addr_to_index(f.end_addr);
            for i in start..end {
                let vaddr = self.program.index_to_vram(i);
                if self.program.label_addresses.contains(&vaddr) {
                    self.push(&format!("L{vaddr:x}:\n"));
                }
                self.dump_instr(i)?;
            }

            self.push("}\n");
        }
        Ok(())
    }
}
