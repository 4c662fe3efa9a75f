//! Instruction decoder: `decode(raw: u32) -> DecodedInstruction`.
//! Total, never fails (spec.md §4.1): unrecognized encodings decode
//! structurally fine and simply carry empty semantics / mnemonic
//! `"ILLEGAL"`, which the grain registry resolves to its ILLEGAL grain.

pub mod format;
pub mod table;

pub use format::{encode_format, Format, FormatKind, RbOrLit};
pub use table::{classify, destination_is_rc, rb_or_lit_value, Classified, GrainKey, Semantics};

/// A decoded instruction. `Copy`, since the pipeline slot holds one per
/// in-flight instruction without indirection (spec.md's data model table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub raw: u32,
    pub opcode: u8,
    pub format: Format,
    pub mnemonic: &'static str,
    pub semantics: Semantics,
    pub grain_key: GrainKey,
}

impl DecodedInstruction {
    /// `Ra` field, present in every format except `CALL_PAL`.
    pub fn ra(&self) -> Option<u8> {
        match self.format {
            Format::Memory { ra, .. }
            | Format::Operate { ra, .. }
            | Format::Branch { ra, .. }
            | Format::Jump { ra, .. }
            | Format::Misc { ra, .. } => Some(ra),
            Format::FpOperate { fa, .. } => Some(fa),
            Format::Pal { .. } => None,
        }
    }

    /// `Rb` field when the format carries one as a plain register (not a
    /// literal).
    pub fn rb_reg(&self) -> Option<u8> {
        match self.format {
            Format::Memory { rb, .. } | Format::Jump { rb, .. } | Format::Misc { rb, .. } => {
                Some(rb)
            }
            Format::Operate { rb: RbOrLit::Reg(r), .. } => Some(r),
            Format::FpOperate { fb, .. } => Some(fb),
            _ => None,
        }
    }

    /// The 16-bit displacement for memory-format instructions.
    pub fn disp16(&self) -> Option<i32> {
        match self.format {
            Format::Memory { disp16, .. } => Some(disp16),
            _ => None,
        }
    }

    /// Branch target displacement, already `<<2` (spec.md §4.1).
    pub fn branch_disp(&self) -> Option<i64> {
        match self.format {
            Format::Branch { disp21, .. } => Some(disp21),
            _ => None,
        }
    }

    /// `JMP`/`JSR`/`RET`/`JSR_COROUTINE` hint field.
    pub fn jump_hint(&self) -> Option<u8> {
        match self.format {
            Format::Jump { hint, .. } => Some(hint),
            _ => None,
        }
    }

    /// The architectural destination register for this instruction, or
    /// `None` if it writes nothing (spec.md §4.1's "pure function of
    /// (opcode, function, semantics)").
    pub fn destination_register(&self) -> Option<u8> {
        if !self.semantics.contains(Semantics::WRITES_REGISTER)
            && !self.semantics.contains(Semantics::WRITES_LINK)
            && !self.semantics.contains(Semantics::IS_FP_WRITE)
        {
            return None;
        }
        match self.format {
            Format::Operate { rc, .. } | Format::FpOperate { fc: rc, .. } => Some(rc),
            // Loads, LDA/LDAH, STx_C (success flag), JSR/BSR link, RPCC/RC/RS:
            // the destination is Ra in every other writing format.
            _ => self.ra(),
        }
    }

    pub fn is_load(&self) -> bool {
        self.semantics.contains(Semantics::IS_LOAD)
    }
    pub fn is_store(&self) -> bool {
        self.semantics.contains(Semantics::IS_STORE)
    }
    pub fn is_locked(&self) -> bool {
        self.semantics.contains(Semantics::IS_LOCKED)
    }
}

/// Decode a raw 32-bit instruction word. Total; never fails.
pub fn decode(raw: u32) -> DecodedInstruction {
    let opcode = format::opcode(raw);
    let kind = format::format_for_opcode(opcode);
    let fmt = format::extract_format(raw, kind);
    let Classified { mnemonic, semantics, grain_key } = classify(opcode, kind, fmt);
    DecodedInstruction {
        raw,
        opcode,
        format: fmt,
        mnemonic,
        semantics,
        grain_key,
    }
}
