//! Static opcode/function -> mnemonic + semantics classification.
//!
//! This is the decoder's half of spec.md §4.1's "semantics bitmask" and
//! §4.2's "(opcode, function) lookup key"; the grain registry consumes
//! the `(opcode, function)` key this module derives, but mnemonic/flag
//! classification belongs to decode, not to grain dispatch, so that
//! `decode()` stays total and side-effect-free per the contract.

use crate::format::{Format, FormatKind, RbOrLit};
use bitflags::bitflags;

bitflags! {
    /// `spec.md` §4.1's semantics bitmask.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Semantics: u16 {
        const IS_LOAD        = 1 << 0;
        const IS_STORE       = 1 << 1;
        const IS_BRANCH      = 1 << 2;
        const IS_JUMP        = 1 << 3;
        const WRITES_LINK    = 1 << 4;
        const IS_FP          = 1 << 5;
        const IS_FP_WRITE    = 1 << 6;
        const NEEDS_BARRIER  = 1 << 7;
        const IS_SERIALIZING = 1 << 8;
        const READS_PAL_REG  = 1 << 9;
        const WRITES_PAL_REG = 1 << 10;
        const WRITES_REGISTER = 1 << 11;
        const IS_CALL_PAL     = 1 << 12;
        /// Load-locked / store-conditional: routed through the
        /// reservation manager (spec.md §4.5) rather than a plain access.
        const IS_LOCKED       = 1 << 13;
        const IS_CONDITIONAL  = 1 << 14;
    }
}

/// The (opcode, function) pair the grain registry looks entries up by
/// (spec.md §4.2). `function` is widened to `u32` to uniformly carry the
/// 7-bit integer-operate, 11-bit FP-operate, 2-bit jump-hint, or 16-bit
/// misc function fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GrainKey {
    pub opcode: u8,
    pub function: u32,
}

pub struct Classified {
    pub mnemonic: &'static str,
    pub semantics: Semantics,
    pub grain_key: GrainKey,
}

/// Classify a decoded format into mnemonic + semantics. Unknown
/// (opcode, function) pairs fall through to `"ILLEGAL"` with empty
/// semantics; the grain registry resolves that to its ILLEGAL grain
/// (spec.md §4.2), which raises `OPCDEC`.
pub fn classify(op: u8, kind: FormatKind, fmt: Format) -> Classified {
    use Semantics as S;
    match (kind, fmt) {
        (FormatKind::Memory, Format::Memory { .. }) => classify_memory(op),
        (FormatKind::Operate, Format::Operate { function, .. }) => classify_operate(op, function),
        (FormatKind::FpOperate, Format::FpOperate { function, .. }) => classify_fp(op, function),
        (FormatKind::Branch, Format::Branch { .. }) => classify_branch(op),
        (FormatKind::Jump, Format::Jump { hint, .. }) => classify_jump(hint),
        (FormatKind::Pal, Format::Pal { function }) => Classified {
            mnemonic: "CALL_PAL",
            semantics: S::IS_CALL_PAL | S::IS_SERIALIZING | S::READS_PAL_REG | S::WRITES_PAL_REG,
            grain_key: GrainKey { opcode: op, function },
        },
        (FormatKind::Misc, Format::Misc { function, .. }) => classify_misc(function),
        _ => unreachable!("format kind must match the extracted format variant"),
    }
}

fn illegal(op: u8, function: u32) -> Classified {
    Classified {
        mnemonic: "ILLEGAL",
        semantics: Semantics::empty(),
        grain_key: GrainKey { opcode: op, function },
    }
}

fn classify_memory(op: u8) -> Classified {
    use Semantics as S;
    let (mnemonic, sem): (&'static str, S) = match op {
        0x08 => ("LDA", S::WRITES_REGISTER),
        0x09 => ("LDAH", S::WRITES_REGISTER),
        0x0A => ("LDBU", S::IS_LOAD | S::WRITES_REGISTER),
        0x0B => ("LDQ_U", S::IS_LOAD | S::WRITES_REGISTER),
        0x0C => ("LDWU", S::IS_LOAD | S::WRITES_REGISTER),
        0x0D => ("STW", S::IS_STORE),
        0x0E => ("STB", S::IS_STORE),
        0x0F => ("STQ_U", S::IS_STORE),
        0x20 => ("LDF", S::IS_LOAD | S::IS_FP | S::IS_FP_WRITE),
        0x21 => ("LDG", S::IS_LOAD | S::IS_FP | S::IS_FP_WRITE),
        0x22 => ("LDS", S::IS_LOAD | S::IS_FP | S::IS_FP_WRITE),
        0x23 => ("LDT", S::IS_LOAD | S::IS_FP | S::IS_FP_WRITE),
        0x24 => ("STF", S::IS_STORE | S::IS_FP),
        0x25 => ("STG", S::IS_STORE | S::IS_FP),
        0x26 => ("STS", S::IS_STORE | S::IS_FP),
        0x27 => ("STT", S::IS_STORE | S::IS_FP),
        0x28 => ("LDL", S::IS_LOAD | S::WRITES_REGISTER),
        0x29 => ("LDQ", S::IS_LOAD | S::WRITES_REGISTER),
        0x2A => ("LDL_L", S::IS_LOAD | S::WRITES_REGISTER | S::IS_LOCKED),
        0x2B => ("LDQ_L", S::IS_LOAD | S::WRITES_REGISTER | S::IS_LOCKED),
        0x2C => ("STL", S::IS_STORE),
        0x2D => ("STQ", S::IS_STORE),
        0x2E => ("STL_C", S::IS_STORE | S::WRITES_REGISTER | S::IS_LOCKED | S::IS_CONDITIONAL),
        0x2F => ("STQ_C", S::IS_STORE | S::WRITES_REGISTER | S::IS_LOCKED | S::IS_CONDITIONAL),
        _ => return illegal(op, 0),
    };
    Classified {
        mnemonic,
        semantics: sem,
        grain_key: GrainKey { opcode: op, function: 0 },
    }
}

fn classify_operate(op: u8, function: u8) -> Classified {
    use Semantics as S;
    let wr = S::WRITES_REGISTER;
    let mnemonic = match (op, function) {
        (0x10, 0x00) => "ADDL",
        (0x10, 0x02) => "S4ADDL",
        (0x10, 0x09) => "SUBL",
        (0x10, 0x0B) => "S4SUBL",
        (0x10, 0x0F) => "CMPBGE",
        (0x10, 0x12) => "S8ADDL",
        (0x10, 0x1B) => "S8SUBL",
        (0x10, 0x1D) => "CMPULT",
        (0x10, 0x20) => "ADDQ",
        (0x10, 0x22) => "S4ADDQ",
        (0x10, 0x29) => "SUBQ",
        (0x10, 0x2B) => "S4SUBQ",
        (0x10, 0x2D) => "CMPEQ",
        (0x10, 0x32) => "S8ADDQ",
        (0x10, 0x3B) => "S8SUBQ",
        (0x10, 0x3D) => "CMPULE",
        (0x10, 0x40) => "ADDLV",
        (0x10, 0x49) => "SUBLV",
        (0x10, 0x4D) => "CMPLT",
        (0x10, 0x60) => "ADDQV",
        (0x10, 0x69) => "SUBQV",
        (0x10, 0x6D) => "CMPLE",
        (0x11, 0x00) => "AND",
        (0x11, 0x08) => "BIC",
        (0x11, 0x14) => "CMOVLBS",
        (0x11, 0x16) => "CMOVLBC",
        (0x11, 0x20) => "BIS",
        (0x11, 0x24) => "CMOVEQ",
        (0x11, 0x26) => "CMOVNE",
        (0x11, 0x28) => "ORNOT",
        (0x11, 0x40) => "XOR",
        (0x11, 0x44) => "CMOVLT",
        (0x11, 0x46) => "CMOVGE",
        (0x11, 0x48) => "EQV",
        (0x11, 0x61) => "AMASK",
        (0x11, 0x68) => "XORNOT",
        (0x11, 0x6C) => "IMPLVER",
        (0x12, 0x02) => "MSKBL",
        (0x12, 0x06) => "EXTBL",
        (0x12, 0x0B) => "INSBL",
        (0x12, 0x12) => "MSKWL",
        (0x12, 0x16) => "EXTWL",
        (0x12, 0x1B) => "INSWL",
        (0x12, 0x22) => "MSKLL",
        (0x12, 0x26) => "EXTLL",
        (0x12, 0x2B) => "INSLL",
        (0x12, 0x30) => "ZAP",
        (0x12, 0x31) => "ZAPNOT",
        (0x12, 0x32) => "MSKQL",
        (0x12, 0x34) => "SRL",
        (0x12, 0x36) => "EXTQL",
        (0x12, 0x39) => "SLL",
        (0x12, 0x3B) => "INSQL",
        (0x12, 0x3C) => "SRA",
        (0x12, 0x52) => "MSKWH",
        (0x12, 0x57) => "INSWH",
        (0x12, 0x5A) => "EXTWH",
        (0x12, 0x62) => "MSKLH",
        (0x12, 0x67) => "INSLH",
        (0x12, 0x6A) => "EXTLH",
        (0x12, 0x72) => "MSKQH",
        (0x12, 0x77) => "INSQH",
        (0x12, 0x7A) => "EXTQH",
        (0x13, 0x00) => "MULL",
        (0x13, 0x20) => "MULQ",
        (0x13, 0x30) => "UMULH",
        (0x13, 0x40) => "MULLV",
        (0x13, 0x60) => "MULQV",
        _ => return illegal(op, function as u32),
    };
    Classified {
        mnemonic,
        semantics: wr,
        grain_key: GrainKey { opcode: op, function: function as u32 },
    }
}

fn classify_fp(op: u8, function: u16) -> Classified {
    use Semantics as S;
    let mnemonic = match (op, function) {
        (0x16, 0x080) => "ADDT",
        (0x16, 0x081) => "SUBT",
        (0x16, 0x082) => "MULT",
        (0x16, 0x083) => "DIVT",
        (0x16, 0x0A0) => "CMPTUN",
        (0x16, 0x0A4) => "CMPTLT",
        (0x16, 0x0A5) => "CMPTEQ",
        (0x16, 0x0A7) => "CMPTLE",
        (0x17, 0x010) => "CVTLQ",
        (0x17, 0x030) => "CVTQL",
        (0x17, 0x00C) => "CVTQS",
        (0x17, 0x0B0) => "CVTQT",
        (0x17, 0x02F) => "CVTTQ",
        (0x14, _) => "VAX_FP_OP",
        (0x15, _) => "IEEE_S_FP_OP",
        _ => return illegal(op, function as u32),
    };
    Classified {
        mnemonic,
        semantics: S::IS_FP | S::IS_FP_WRITE,
        grain_key: GrainKey { opcode: op, function: function as u32 },
    }
}

fn classify_branch(op: u8) -> Classified {
    use Semantics as S;
    let (mnemonic, extra) = match op {
        0x30 => ("BR", S::WRITES_LINK),
        0x31 => ("FBEQ", S::empty()),
        0x32 => ("FBLT", S::empty()),
        0x33 => ("FBLE", S::empty()),
        0x34 => ("BSR", S::WRITES_LINK),
        0x35 => ("FBNE", S::empty()),
        0x36 => ("FBGE", S::empty()),
        0x37 => ("FBGT", S::empty()),
        0x38 => ("BLBC", S::empty()),
        0x39 => ("BEQ", S::empty()),
        0x3A => ("BLT", S::empty()),
        0x3B => ("BLE", S::empty()),
        0x3C => ("BLBS", S::empty()),
        0x3D => ("BNE", S::empty()),
        0x3E => ("BGE", S::empty()),
        0x3F => ("BGT", S::empty()),
        _ => return illegal(op, 0),
    };
    Classified {
        mnemonic,
        semantics: S::IS_BRANCH | extra,
        grain_key: GrainKey { opcode: op, function: 0 },
    }
}

fn classify_jump(hint: u8) -> Classified {
    use Semantics as S;
    let mnemonic = match hint {
        0 => "JMP",
        1 => "JSR",
        2 => "RET",
        _ => "JSR_COROUTINE",
    };
    let writes_link = matches!(hint, 1 | 3);
    Classified {
        mnemonic,
        semantics: S::IS_JUMP | if writes_link { S::WRITES_LINK } else { S::empty() },
        grain_key: GrainKey { opcode: 0x1A, function: hint as u32 },
    }
}

fn classify_misc(function: u16) -> Classified {
    use Semantics as S;
    let (mnemonic, sem) = match function {
        0x0000 => ("TRAPB", S::IS_SERIALIZING),
        0x0400 => ("EXCB", S::IS_SERIALIZING),
        0x4000 => ("MB", S::NEEDS_BARRIER),
        0x4400 => ("WMB", S::NEEDS_BARRIER),
        0x8000 => ("FETCH", S::empty()),
        0xA000 => ("FETCH_M", S::empty()),
        0xC000 => ("RPCC", S::WRITES_REGISTER),
        0xE000 => ("RC", S::WRITES_REGISTER),
        0xE800 => ("ECB", S::empty()),
        0xF000 => ("RS", S::WRITES_REGISTER),
        0xF800 => ("WH64", S::empty()),
        0xFC00 => ("WH64EN", S::empty()),
        _ => return illegal(0x18, function as u32),
    };
    Classified {
        mnemonic,
        semantics: sem,
        grain_key: GrainKey { opcode: 0x18, function: function as u32 },
    }
}

/// Destination-register derivation, per spec.md §4.1: "a pure function of
/// (opcode, function, semantics)". Returns `None` when the instruction
/// writes nothing (or the destination is `Rc`/`Ra` encoded in `fmt`, which
/// callers already have from the decoded format).
pub fn destination_is_rc(op: u8, kind: FormatKind) -> bool {
    matches!(kind, FormatKind::Operate | FormatKind::FpOperate) && op != 0x18
}

pub fn rb_or_lit_value(rb: RbOrLit, regs: &[u64; 32]) -> u64 {
    match rb {
        RbOrLit::Reg(r) => regs[r as usize & 0x1F],
        RbOrLit::Literal(l) => l as u64,
    }
}
