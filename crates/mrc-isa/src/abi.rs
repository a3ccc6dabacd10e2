//! O32 extern-function catalog and calling-convention walker.
//!
//! `params` is a signature string: the first character is the return type,
//! the rest are argument types.
//!
//! - `v` void
//! - `i` signed int (int32_t)
//! - `u` unsigned int (uint32_t)
//! - `p` pointer (uintptr_t)
//! - `f` float
//! - `d` double
//! - `l` signed long long (int64_t)
//! - `j` unsigned long long (uint64_t)
//! - `t` trampoline (guest function pointer)
//!
//! The walker below is the single source of truth for where each argument
//! lives: the backward liveness pass consumes the register mask, the
//! lowerer consumes the marshal directives.

use crate::regmask::RegMask;
use crate::types::{REG_A0, REG_SP};

pub const FLAG_NO_MEM: u32 = 1;
pub const FLAG_VARARG: u32 = 2;

/// An external callable handled by a `wrapper_*` shim in the runtime.
#[derive(Clone, Copy, Debug)]
pub struct ExternFunction {
    pub name: &'static str,
    pub params: &'static str,
    pub flags: u32,
}

impl ExternFunction {
    pub fn is_vararg(&self) -> bool {
        self.flags & FLAG_VARARG != 0
    }

    pub fn takes_mem(&self) -> bool {
        self.flags & FLAG_NO_MEM == 0
    }

    pub fn ret(&self) -> RetKind {
        match self.params.as_bytes()[0] {
            b'v' => RetKind::Void,
            b'i' | b'u' | b'p' => RetKind::Word,
            b'f' => RetKind::Float,
            b'd' => RetKind::Double,
            b'l' | b'j' => RetKind::Pair,
            c => unreachable!("bad return type {c}"),
        }
    }
}

/// Return-value classification of an extern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetKind {
    Void,
    /// 32-bit in `$v0`.
    Word,
    /// Single float in `$f0`.
    Float,
    /// Double in `$f0:$f1`.
    Double,
    /// 64-bit in `$v0:$v1`.
    Pair,
}

impl RetKind {
    /// GPRs defined by the call, as seen by the forward liveness pass.
    pub fn result_mask(self) -> RegMask {
        match self {
            RetKind::Word => RegMask::reg(crate::types::REG_V0),
            RetKind::Pair => {
                RegMask::reg(crate::types::REG_V0) | RegMask::reg(crate::types::REG_V1)
            }
            _ => RegMask::EMPTY,
        }
    }
}

/// Where one argument is fetched from at the call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgLoc {
    /// `$a0 + n`.
    Gpr(u8),
    /// Stack word at `sp + pos`; `signed` selects `MEM_S32` over `MEM_U32`.
    Stack { pos: u32, signed: bool },
    /// Float in `$f12 + pos_float`.
    FloatFpr { pos_float: u8 },
    /// Float bit-cast out of `$a0 + n`.
    FloatGpr(u8),
    /// Float bit-cast out of a stack word.
    FloatStack { pos: u32 },
    /// Double in the even FP pair `$f12 + pos_float`.
    DoubleFpr { pos_float: u8 },
    /// Double assembled from `$a(n):$a(n+1)`.
    DoubleGprPair(u8),
    /// Double assembled from two stack words.
    DoubleStackPair { pos: u32 },
    /// 64-bit integer from `$a(n):$a(n+1)`.
    PairGpr { idx: u8, signed: bool },
    /// 64-bit integer from two stack words.
    PairStack { pos: u32, signed: bool },
}

/// One marshalled argument; `trampoline` arguments additionally pass the
/// trampoline itself and force `$sp` onto the wrapper call.
#[derive(Clone, Copy, Debug)]
pub struct ArgSlot {
    pub loc: ArgLoc,
    pub trampoline: bool,
}

/// The full call plan for an extern: argument-register liveness and the
/// per-argument marshal directives.
#[derive(Clone, Debug)]
pub struct CallPlan {
    pub ret: RetKind,
    pub args: Vec<ArgSlot>,
    /// Registers read by the call (includes the reachability bit and `$sp`).
    pub arg_mask: RegMask,
    /// The wrapper takes a trailing `$sp` (vararg or trampoline bridge).
    pub needs_sp: bool,
}

/// Walk an extern signature, assigning each argument its O32 slot.
///
/// Integer positions consume one slot each; doubles and 64-bit integers
/// align to an even slot and consume two. A leading run of FP arguments
/// rides in `$f12`/`$f14` and does not touch the integer registers.
pub fn call_plan(f: &ExternFunction) -> CallPlan {
    let mut mask = RegMask::REACHABLE;
    let mut args = Vec::new();
    let mut pos: u8 = 0;
    let mut pos_float: u8 = 0;
    let mut only_floats_so_far = true;
    let mut needs_sp = f.is_vararg();

    if f.is_vararg() {
        // Assume the worst, that all four registers are used.
        for j in 0..4 {
            mask |= RegMask::reg(REG_A0 + j);
        }
    }

    for &c in f.params.as_bytes()[1..].iter() {
        let mut trampoline = false;
        let loc = match c {
            b'i' | b'u' | b'p' | b't' => {
                only_floats_so_far = false;
                trampoline = c == b't';
                if trampoline {
                    needs_sp = true;
                }
                let loc = if pos < 4 {
                    mask |= RegMask::reg(REG_A0 + pos);
                    ArgLoc::Gpr(pos)
                } else {
                    ArgLoc::Stack {
                        pos: pos as u32 * 4,
                        signed: c == b'i',
                    }
                };
                pos += 1;
                loc
            }
            b'f' => {
                let loc = if only_floats_so_far && pos_float < 4 {
                    let loc = ArgLoc::FloatFpr { pos_float };
                    pos_float += 2;
                    loc
                } else if pos < 4 {
                    mask |= RegMask::reg(REG_A0 + pos);
                    ArgLoc::FloatGpr(pos)
                } else {
                    ArgLoc::FloatStack {
                        pos: pos as u32 * 4,
                    }
                };
                pos += 1;
                loc
            }
            b'd' => {
                if pos % 2 != 0 {
                    pos += 1;
                }
                let loc = if only_floats_so_far && pos_float < 4 {
                    let loc = ArgLoc::DoubleFpr { pos_float };
                    pos_float += 2;
                    loc
                } else if pos < 4 {
                    mask |= RegMask::reg(REG_A0 + pos) | RegMask::reg(REG_A0 + pos + 1);
                    ArgLoc::DoubleGprPair(pos)
                } else {
                    ArgLoc::DoubleStackPair {
                        pos: pos as u32 * 4,
                    }
                };
                pos += 2;
                loc
            }
            b'l' | b'j' => {
                if pos % 2 != 0 {
                    pos += 1;
                }
                only_floats_so_far = false;
                let signed = c == b'l';
                let loc = if pos < 4 {
                    mask |= RegMask::reg(REG_A0 + pos) | RegMask::reg(REG_A0 + pos + 1);
                    ArgLoc::PairGpr { idx: pos, signed }
                } else {
                    ArgLoc::PairStack {
                        pos: pos as u32 * 4,
                        signed,
                    }
                };
                pos += 2;
                loc
            }
            c => unreachable!("bad parameter type {c}"),
        };
        args.push(ArgSlot { loc, trampoline });
    }

    mask |= RegMask::reg(REG_SP);

    CallPlan {
        ret: f.ret(),
        args,
        arg_mask: mask,
        needs_sp,
    }
}

/// Look up an extern by symbol name.
pub fn find_extern(name: &str) -> Option<&'static ExternFunction> {
    EXTERN_FUNCTIONS.iter().find(|f| f.name == name)
}

macro_rules! externs {
    ($(($name:literal, $params:literal, $flags:expr),)*) => {
        &[$(ExternFunction { name: $name, params: $params, flags: $flags },)*]
    };
}

/// Catalog of libc, stdio, math and IRIX helpers dispatched through the
/// runtime wrappers.
pub const EXTERN_FUNCTIONS: &[ExternFunction] = externs![
    ("exit", "vi", 0), // override exit from application
    ("abort", "v", 0),
    ("sbrk", "pi", 0),
    ("malloc", "pu", 0),
    ("calloc", "puu", 0),
    ("realloc", "ppu", 0),
    ("free", "vp", 0),
    ("fscanf", "ipp", FLAG_VARARG),
    ("printf", "ip", FLAG_VARARG),
    ("sprintf", "ipp", FLAG_VARARG),
    ("fprintf", "ipp", FLAG_VARARG),
    ("_doprnt", "ippp", 0),
    ("strlen", "up", 0),
    ("open", "ipii", 0),
    ("creat", "ipi", 0),
    ("access", "ipi", 0),
    ("rename", "ipp", 0),
    ("utime", "ipp", 0),
    ("flock", "iii", 0),
    ("chmod", "ipu", 0),
    ("umask", "ii", FLAG_NO_MEM),
    ("ecvt", "pdipp", 0),
    ("fcvt", "pdipp", 0),
    ("sqrt", "dd", FLAG_NO_MEM),
    ("sqrtf", "ff", FLAG_NO_MEM),
    ("atoi", "ip", 0),
    ("atol", "ip", 0),
    ("atof", "dp", 0),
    ("strtol", "ippi", 0),
    ("strtoul", "uppi", 0),
    ("strtoll", "lppi", 0),
    ("strtoull", "jppi", 0),
    ("strtod", "dpp", 0),
    ("strchr", "ppi", 0),
    ("strrchr", "ppi", 0),
    ("strcspn", "upp", 0),
    ("strpbrk", "ppp", 0),
    ("fstat", "iip", 0),
    ("stat", "ipp", 0),
    ("ftruncate", "iii", 0),
    ("bcopy", "vppu", 0),
    ("memcpy", "pppu", 0),
    ("memccpy", "pppiu", 0),
    ("read", "iipu", 0),
    ("write", "iipu", 0),
    ("fopen", "ppp", 0),
    ("freopen", "pppp", 0),
    ("fclose", "ip", 0),
    ("ftell", "ip", 0),
    ("rewind", "vp", 0),
    ("fseek", "ipii", 0),
    ("lseek", "iiii", 0),
    ("fflush", "ip", 0),
    ("dup", "ii", 0),
    ("dup2", "iii", 0),
    ("pipe", "ip", 0),
    ("perror", "vp", 0),
    ("fdopen", "iip", 0),
    ("memset", "ppiu", 0),
    ("bcmp", "ippu", 0),
    ("memcmp", "ippu", 0),
    ("getpid", "i", FLAG_NO_MEM),
    ("getpgrp", "i", 0),
    ("remove", "ip", 0),
    ("unlink", "ip", 0),
    ("close", "ii", 0),
    ("strcmp", "ipp", 0),
    ("strncmp", "ippu", 0),
    ("strcpy", "ppp", 0),
    ("strncpy", "pppu", 0),
    ("strcat", "ppp", 0),
    ("strncat", "pppu", 0),
    ("strtok", "ppp", 0),
    ("strstr", "ppp", 0),
    ("strdup", "pp", 0),
    ("toupper", "ii", FLAG_NO_MEM),
    ("tolower", "ii", FLAG_NO_MEM),
    ("gethostname", "ipu", 0),
    ("isatty", "ii", 0),
    ("strftime", "upupp", 0),
    ("times", "ip", 0),
    ("clock", "i", FLAG_NO_MEM),
    ("ctime", "pp", 0),
    ("localtime", "pp", 0),
    ("setvbuf", "ippiu", 0),
    ("__semgetc", "ip", 0),
    ("__semputc", "iip", 0),
    ("fgetc", "ip", 0),
    ("fgets", "ipip", 0),
    ("__filbuf", "ip", 0),
    ("__flsbuf", "iip", 0),
    ("ungetc", "iip", 0),
    ("gets", "pp", 0),
    ("fread", "upuup", 0),
    ("fwrite", "upuup", 0),
    ("fputs", "ipp", 0),
    ("puts", "ip", 0),
    ("getcwd", "ppu", 0),
    ("time", "ip", 0),
    ("bzero", "vpu", 0),
    ("fp_class_d", "id", FLAG_NO_MEM),
    ("ldexp", "ddi", FLAG_NO_MEM),
    ("__ll_mul", "lll", FLAG_NO_MEM),
    ("__ll_div", "lll", FLAG_NO_MEM),
    ("__ll_rem", "ljl", FLAG_NO_MEM),
    ("__ll_lshift", "llj", FLAG_NO_MEM),
    ("__ll_rshift", "llj", FLAG_NO_MEM),
    ("__ull_div", "jjj", FLAG_NO_MEM),
    ("__ull_rem", "jjj", FLAG_NO_MEM),
    ("__ull_rshift", "jjj", FLAG_NO_MEM),
    ("__d_to_ull", "jd", FLAG_NO_MEM),
    ("__d_to_ll", "ld", FLAG_NO_MEM),
    ("__f_to_ull", "jf", FLAG_NO_MEM),
    ("__f_to_ll", "lf", FLAG_NO_MEM),
    ("__ull_to_f", "fj", FLAG_NO_MEM),
    ("__ll_to_f", "fl", FLAG_NO_MEM),
    ("__ull_to_d", "dj", FLAG_NO_MEM),
    ("__ll_to_d", "dl", FLAG_NO_MEM),
    ("_exit", "vi", 0),
    ("_cleanup", "v", 0),
    ("_rld_new_interface", "pu", FLAG_VARARG),
    ("_exithandle", "v", 0),
    ("_prctl", "ii", FLAG_VARARG),
    ("_atod", "dpii", 0),
    ("pathconf", "ipi", 0),
    ("getenv", "pp", 0),
    ("gettxt", "ppp", 0),
    ("setlocale", "pip", 0),
    ("mmap", "ppuiiii", 0),
    ("munmap", "ipu", 0),
    ("mprotect", "ipui", 0),
    ("sysconf", "ii", 0),
    ("getpagesize", "i", 0),
    ("strerror", "pi", 0),
    ("ioctl", "iiu", FLAG_VARARG),
    ("fcntl", "iii", FLAG_VARARG),
    ("signal", "pit", 0),
    ("sigset", "pit", 0),
    ("get_fpc_csr", "i", 0),
    ("set_fpc_csr", "ii", 0),
    ("setjmp", "ip", 0),
    ("longjmp", "vpi", 0),
    ("tempnam", "ppp", 0),
    ("tmpnam", "pp", 0),
    ("mktemp", "pp", 0),
    ("mkstemp", "ip", 0),
    ("tmpfile", "p", 0),
    ("wait", "ip", 0),
    ("kill", "iii", 0),
    ("execlp", "ip", FLAG_VARARG),
    ("execv", "ipp", 0),
    ("execvp", "ipp", 0),
    ("fork", "i", 0),
    ("system", "ip", 0),
    ("tsearch", "pppp", 0),
    ("tfind", "pppp", 0),
    ("qsort", "vpuut", 0),
    ("regcmp", "pp", FLAG_VARARG),
    ("regex", "ppp", FLAG_VARARG),
    ("__assert", "vppi", 0),
];
