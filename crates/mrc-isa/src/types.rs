//! Core register definitions for the O32 GPR file.

// Register numbers (O32 names)
pub const REG_ZERO: u8 = 0;
pub const REG_AT: u8 = 1;
pub const REG_V0: u8 = 2;
pub const REG_V1: u8 = 3;
pub const REG_A0: u8 = 4;
pub const REG_A1: u8 = 5;
pub const REG_A2: u8 = 6;
pub const REG_A3: u8 = 7;
pub const REG_T0: u8 = 8;
pub const REG_T7: u8 = 15;
pub const REG_S0: u8 = 16;
pub const REG_S7: u8 = 23;
pub const REG_T8: u8 = 24;
pub const REG_T9: u8 = 25;
pub const REG_K0: u8 = 26;
pub const REG_K1: u8 = 27;
pub const REG_GP: u8 = 28;
pub const REG_SP: u8 = 29;
pub const REG_FP: u8 = 30;
pub const REG_RA: u8 = 31;

/// Synthetic register numbers for the multiply/divide result registers.
/// They sit past the GPR file so they can share the same bitmask space.
pub const REG_HI: u8 = 32;
pub const REG_LO: u8 = 33;

/// First FP argument register (doubles go in f12/f14).
pub const FPR_FA0: u8 = 12;
/// FP return register.
pub const FPR_FV0: u8 = 0;

/// Get the O32 ABI name for a GPR.
pub fn reg_name(reg: u8) -> &'static str {
    const NAMES: [&str; 32] = [
        "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
        "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp",
        "fp", "ra",
    ];
    NAMES.get(reg as usize).copied().unwrap_or("??")
}
