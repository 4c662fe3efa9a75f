//! Bit/arch primitives shared by every other crate in this workspace:
//! fixed-width bitfield helpers, sign extension, IEEE-754/FPCR adapters,
//! and the small identifier newtypes (`Va`, `Pa`, `Asn`, `Ipl`, ...).

pub mod bits;
pub mod fp;
pub mod ids;

pub use bits::{extract, extract32, insert, is_canonical_va, sign_extend, sign_extend32};
pub use fp::{ExcSum, Fpcr};
pub use ids::{Access, Asn, CpuId, Ipl, Mode, Pa, Realm, Va};

/// Alpha's base page size: `PAGE_SHIFT = 13` (8KB), spec.md §4.4.
pub const PAGE_SHIFT: u32 = 13;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Granularity-Hint block size in base pages: `8.pow(gh)`.
pub const fn gh_block_pages(gh: u8) -> u64 {
    8u64.pow(gh as u32)
}

/// Page shift for a given size class / GH value: `PAGE_SHIFT + 3*gh`.
pub const fn page_shift_for_gh(gh: u8) -> u32 {
    PAGE_SHIFT + 3 * gh as u32
}
