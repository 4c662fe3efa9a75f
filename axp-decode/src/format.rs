//! Raw 32-bit word <-> structured instruction-format extraction, per
//! spec.md §4.1. Alpha is little-endian 32-bit words; the six encodings
//! below are the architectural formats.

use axp_types::{sign_extend32, sign_extend};

/// Rb operand for operate-format instructions: either a register or an
/// 8-bit zero-extended literal (`raw[12] == 1`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RbOrLit {
    Reg(u8),
    Literal(u8),
}

/// One of Alpha's six instruction-word layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Loads/stores: `Ra`, `Rb`, 16-bit sign-extended displacement.
    Memory { ra: u8, rb: u8, disp16: i32 },
    /// Integer operate: `Ra`, `Rb`-or-literal, 7-bit function, `Rc`.
    Operate { ra: u8, rb: RbOrLit, function: u8, rc: u8 },
    /// FP operate: `Fa`, `Fb`, 11-bit function, `Fc`.
    FpOperate { fa: u8, fb: u8, function: u16, fc: u8 },
    /// Conditional/unconditional branch: `Ra`, 21-bit sign-extended
    /// displacement (already `<<2`).
    Branch { ra: u8, disp21: i64 },
    /// `JMP`/`JSR`/`RET`/`JSR_COROUTINE`: `Ra`, `Rb`, 2-bit hint/function,
    /// 14-bit displacement (already `<<2`, architecturally unused by the
    /// execute semantics but preserved for encode round-tripping).
    Jump { ra: u8, rb: u8, hint: u8, disp14: u16 },
    /// `CALL_PAL` (opcode 0): 26-bit PAL function code.
    Pal { function: u32 },
    /// Miscellaneous (opcode 0x18): `MB`, `WMB`, `TRAPB`, `FETCH`, ... .
    /// `Ra`/`Rb` are present in the word but architecturally unused by
    /// most misc grains; the 16-bit function selects the operation.
    Misc { ra: u8, rb: u8, function: u16 },
}

#[inline]
pub const fn opcode(raw: u32) -> u8 {
    ((raw >> 26) & 0x3F) as u8
}

/// Which architectural format an opcode uses. Opcode ranges per the Alpha
/// Architecture Reference Manual / spec.md §4.1.
pub fn format_for_opcode(op: u8) -> FormatKind {
    match op {
        0x00 => FormatKind::Pal,
        0x18 => FormatKind::Misc,
        0x1A => FormatKind::Jump,
        0x30..=0x3F => FormatKind::Branch,
        0x10..=0x13 => FormatKind::Operate,
        0x14..=0x17 => FormatKind::FpOperate,
        // Memory format covers integer/FP loads and stores (0x08-0x0F,
        // 0x20-0x2F) and, by construction, anything else unallocated:
        // an unallocated opcode still decodes structurally as Memory so
        // the grain registry can resolve it to ILLEGAL (spec.md §4.2).
        _ => FormatKind::Memory,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatKind {
    Memory,
    Operate,
    FpOperate,
    Branch,
    Jump,
    Pal,
    Misc,
}

/// Split a raw word into its structured format, given the opcode's kind.
pub fn extract_format(raw: u32, kind: FormatKind) -> Format {
    let ra = ((raw >> 21) & 0x1F) as u8;
    let rb = ((raw >> 16) & 0x1F) as u8;
    match kind {
        FormatKind::Memory => Format::Memory {
            ra,
            rb,
            disp16: sign_extend32(raw & 0xFFFF, 16),
        },
        FormatKind::Operate => {
            let rb_or_lit = if (raw >> 12) & 1 != 0 {
                RbOrLit::Literal(((raw >> 13) & 0xFF) as u8)
            } else {
                RbOrLit::Reg(rb)
            };
            Format::Operate {
                ra,
                rb: rb_or_lit,
                function: ((raw >> 5) & 0x7F) as u8,
                rc: (raw & 0x1F) as u8,
            }
        }
        FormatKind::FpOperate => Format::FpOperate {
            fa: ra,
            fb: rb,
            function: ((raw >> 5) & 0x7FF) as u16,
            fc: (raw & 0x1F) as u8,
        },
        FormatKind::Branch => Format::Branch {
            ra,
            disp21: sign_extend(((raw & 0x1F_FFFF) as u64) << 2, 23),
        },
        FormatKind::Jump => Format::Jump {
            ra,
            rb,
            hint: ((raw >> 14) & 0x3) as u8,
            disp14: (raw & 0x3FFF) as u16,
        },
        FormatKind::Pal => Format::Pal {
            function: raw & 0x03FF_FFFF,
        },
        FormatKind::Misc => Format::Misc {
            ra,
            rb,
            function: (raw & 0xFFFF) as u16,
        },
    }
}

/// Reassemble the raw 32-bit word from `(opcode, format)`. Exact inverse of
/// [`extract_format`]: `encode(decode(raw)) == raw` (spec.md §8).
pub fn encode_format(op: u8, fmt: Format) -> u32 {
    let op_bits = (op as u32 & 0x3F) << 26;
    op_bits
        | match fmt {
            Format::Memory { ra, rb, disp16 } => {
                ((ra as u32 & 0x1F) << 21) | ((rb as u32 & 0x1F) << 16) | (disp16 as u32 & 0xFFFF)
            }
            Format::Operate { ra, rb, function, rc } => {
                let (rb_bits, lit_bit) = match rb {
                    RbOrLit::Reg(r) => ((r as u32 & 0x1F) << 16, 0u32),
                    RbOrLit::Literal(l) => ((l as u32 & 0xFF) << 13, 1u32 << 12),
                };
                ((ra as u32 & 0x1F) << 21)
                    | rb_bits
                    | lit_bit
                    | ((function as u32 & 0x7F) << 5)
                    | (rc as u32 & 0x1F)
            }
            Format::FpOperate { fa, fb, function, fc } => {
                ((fa as u32 & 0x1F) << 21)
                    | ((fb as u32 & 0x1F) << 16)
                    | ((function as u32 & 0x7FF) << 5)
                    | (fc as u32 & 0x1F)
            }
            Format::Branch { ra, disp21 } => {
                ((ra as u32 & 0x1F) << 21) | (((disp21 >> 2) as u32) & 0x1F_FFFF)
            }
            Format::Jump { ra, rb, hint, disp14 } => {
                ((ra as u32 & 0x1F) << 21)
                    | ((rb as u32 & 0x1F) << 16)
                    | ((hint as u32 & 0x3) << 14)
                    | (disp14 as u32 & 0x3FFF)
            }
            Format::Pal { function } => function & 0x03FF_FFFF,
            Format::Misc { ra, rb, function } => {
                ((ra as u32 & 0x1F) << 21) | ((rb as u32 & 0x1F) << 16) | (function as u32 & 0xFFFF)
            }
        }
}
