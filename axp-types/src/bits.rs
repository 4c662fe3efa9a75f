//! Small inline bitfield accessors.
//!
//! The original C++ source leaned on macro-based bitfield helpers
//! (`pteLib/AlphaPTE_Core.h`'s `extract<Start, Len>`/`insert<Start, Len>`
//! templates). Rust has no equivalent macro-time bit arithmetic we'd want
//! to keep, so this module is the generalized, runtime version of the same
//! idea: every IPR/PTE/instruction-word field in this workspace goes
//! through `extract`/`insert` rather than hand-rolled shifts scattered
//! across call sites.

/// Extract a `len`-bit field starting at bit `start` of a 64-bit word.
#[inline]
pub const fn extract(word: u64, start: u32, len: u32) -> u64 {
    debug_assert!(start + len <= 64);
    let mask = if len == 64 { u64::MAX } else { (1u64 << len) - 1 };
    (word >> start) & mask
}

/// Extract a `len`-bit field starting at bit `start` of a 32-bit word.
#[inline]
pub const fn extract32(word: u32, start: u32, len: u32) -> u32 {
    debug_assert!(start + len <= 32);
    let mask = if len == 32 { u32::MAX } else { (1u32 << len) - 1 };
    (word >> start) & mask
}

/// Set a `len`-bit field starting at bit `start` of `word` to `value`,
/// leaving the remaining bits untouched.
#[inline]
pub const fn insert(word: u64, start: u32, len: u32, value: u64) -> u64 {
    debug_assert!(start + len <= 64);
    let mask_core = if len == 64 { u64::MAX } else { (1u64 << len) - 1 };
    let mask = mask_core << start;
    (word & !mask) | ((value << start) & mask)
}

/// Sign-extend the low `bits` bits of `value` to a full `i64`.
#[inline]
pub const fn sign_extend(value: u64, bits: u32) -> i64 {
    debug_assert!(bits > 0 && bits <= 64);
    if bits == 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Sign-extend the low `bits` bits of a 32-bit `value` to `i32`.
#[inline]
pub const fn sign_extend32(value: u32, bits: u32) -> i32 {
    debug_assert!(bits > 0 && bits <= 32);
    if bits == 32 {
        return value as i32;
    }
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// `VA[63:48]` (48-bit mode) or `VA[63:43]` (43-bit mode) sign-extension
/// check used by translation canonicality (spec.md §4.4 step 1).
#[inline]
pub const fn is_canonical_va(va: u64, va_bits: u32) -> bool {
    let sext = sign_extend(va, va_bits) as u64;
    sext == va
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extract_insert_roundtrip() {
        let w = insert(0, 32, 28, 0x1234_567);
        assert_eq!(extract(w, 32, 28), 0x1234_567);
    }

    #[test]
    fn sign_extend_47() {
        // VA[47] = 1 propagated into VA[63:48].
        let va = 0x0000_8000_0000_0000u64;
        assert_eq!(sign_extend(va, 48) as u64, 0xFFFF_8000_0000_0000);
    }

    #[test]
    fn canonical_va_examples() {
        assert!(is_canonical_va(0x0000_1234_0000_0000, 48));
        assert!(!is_canonical_va(0x0001_0000_0000_0000, 48));
        assert!(is_canonical_va(0xFFFF_8000_0000_0000, 48));
    }

    proptest! {
        #[test]
        fn extract_insert_any_field(start in 0u32..60, len in 1u32..4, value in 0u64..16) {
            let w = insert(0xDEAD_BEEF_0000_0000, start, len, value & ((1 << len) - 1));
            prop_assert_eq!(extract(w, start, len), value & ((1 << len) - 1));
        }
    }
}
