//! `translate()`: spec.md §4.4's 8-step algorithm, driving a [`Tlb`] and
//! a guest-physical page-table walk rooted at a per-realm PTBR.
//!
//! Grounded on `examples/original_source/EBoxLib/validateVirtualAddressInASN_inl.h`
//! for the canonicality/ASN-validation ordering and on
//! `pteLib/pte_l2_helpers.h`'s `checkAccess` for the permission-check
//! shape; the level-walk arithmetic (VPN slicing, GH superpage skip) is
//! grounded on `pteLib/AlphaPTE_Core.h`'s PFN/GH fields.

use axp_types::bits::is_canonical_va;
use axp_types::{gh_block_pages, page_shift_for_gh, Access, Asn, Mode, Pa, Realm, Va, PAGE_SHIFT};

use crate::bus::{MemoryBus, MemStatus};
use crate::pte::CanonicalPte;
use crate::tlb::{Lookup, Tlb};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TranslationFault {
    #[error("non-canonical virtual address")]
    NonCanonical,
    #[error("translation not valid (PTE.V == 0)")]
    NotValid,
    #[error("access violation: mode/permission mismatch")]
    AccessViolation,
    #[error("fault-on-{0:?} bit set in PTE")]
    FaultOnAccess(Access),
    #[error("guest memory error while walking the page table: {0}")]
    Memory(MemStatus),
}

impl From<MemStatus> for TranslationFault {
    fn from(e: MemStatus) -> Self {
        TranslationFault::Memory(e)
    }
}

/// Per-realm translation configuration: PTBR plus the VA-width bit
/// carried from Open Question #1's resolution (see SPEC_FULL.md §5).
#[derive(Clone, Copy, Debug)]
pub struct TranslationContext {
    pub ptbr: Pa,
    pub va_bits: u32,
    pub mode: Mode,
    pub asn: Asn,
}

const PTE_SIZE: u64 = 8;
const PT_ENTRIES: u64 = 1 << 10;

/// VPN bit slicing per spec.md's three-level walk: L1 = VPN[29:22] (8
/// bits), L2 = VPN[21:10] (12 bits), L3 = VPN[9:0] (10 bits). L1 and L2
/// are wider than a single page table's 1024 entries can index, but the
/// walker only ever uses `PT_ENTRIES` of each field per level; the extra
/// L1/L2 bits are a consequence of the 43-bit VA space and are masked
/// the same way the original page-table format does.
fn vpn_fields(va: u64, page_shift: u32) -> (u64, u64, u64) {
    let vpn = va >> page_shift;
    let l3 = vpn & 0x3FF;
    let l2 = (vpn >> 10) & 0xFFF;
    let l1 = (vpn >> 22) & 0xFF;
    (l1, l2, l3)
}

/// Walk the guest page table for `va`, consulting `tlb` first and
/// inserting on a walk-resolved hit. Returns the physical address of the
/// first byte of the access plus the `CanonicalPte` that authorized it
/// (callers use the PTE to know the superpage size for subsequent
/// adjacent accesses).
pub fn translate(
    mem: &mut dyn MemoryBus,
    tlb: &mut Tlb,
    ctx: &TranslationContext,
    realm: Realm,
    access: Access,
    va: Va,
) -> Result<Pa, TranslationFault> {
    // Step 1: canonicality.
    if !is_canonical_va(va.0, ctx.va_bits) {
        return Err(TranslationFault::NonCanonical);
    }
    let _ = realm; // realm selects which Tlb/walker root the caller passed in.

    // Step 2: TLB probe at the base page size; superpage hits are also
    // tagged at PAGE_SHIFT granularity by `insert`, since the TLB stores
    // the GH-adjusted `page_shift` per entry it was inserted with. We try
    // the base size first, then progressively larger GH block sizes,
    // mirroring how EV6 hardware probes a multi-size SPAM.
    for gh in [0u8, 1, 2, 3] {
        let page_shift = page_shift_for_gh(gh);
        if let Lookup::Hit { pfn, perm, foe, fow, for_ } = tlb.lookup(va, page_shift, ctx.asn) {
            check_fault_bits(access, foe, fow, for_)?;
            check_permission(access, perm, ctx.mode)?;
            return Ok(assemble_pa(pfn, va.0, page_shift));
        }
    }

    // Step 3 onward: miss, walk from PTBR.
    let (l1, l2, l3) = vpn_fields(va.0, PAGE_SHIFT);

    let l1_pte = read_pte(mem, ctx.ptbr, l1)?;
    if !l1_pte.valid() {
        return Err(TranslationFault::NotValid);
    }
    let l2_table = Pa(l1_pte.pfn() << PAGE_SHIFT);

    let l2_pte = read_pte(mem, l2_table, l2)?;
    if !l2_pte.valid() {
        return Err(TranslationFault::NotValid);
    }

    // A GH value in the L2 PTE marks a superpage: the L3 level is
    // skipped and the PFN/page size come straight from L2.
    let gh = l2_pte.gh();
    let leaf = if gh != 0 {
        l2_pte
    } else {
        let l3_table = Pa(l2_pte.pfn() << PAGE_SHIFT);
        read_pte(mem, l3_table, l3)?
    };

    if !leaf.valid() {
        return Err(TranslationFault::NotValid);
    }

    let foe = leaf.fault_on_execute();
    let fow = leaf.fault_on_write();
    let for_ = leaf.fault_on_read();
    check_fault_bits(access, foe, fow, for_)?;

    let perm = leaf.perm_mask();
    check_permission(access, perm, ctx.mode)?;

    let page_shift = page_shift_for_gh(leaf.gh());
    let _ = gh_block_pages(leaf.gh());
    tlb.insert(va, page_shift, ctx.asn, leaf);

    Ok(assemble_pa(leaf.pfn(), va.0, page_shift))
}

fn read_pte(mem: &mut dyn MemoryBus, table_base: Pa, index: u64) -> Result<CanonicalPte, TranslationFault> {
    let addr = table_base.0 + index * PTE_SIZE;
    let raw = mem.read_u64(addr)?;
    Ok(CanonicalPte(raw))
}

fn check_fault_bits(access: Access, foe: bool, fow: bool, for_: bool) -> Result<(), TranslationFault> {
    let triggered = match access {
        Access::Execute => foe,
        Access::Write => fow,
        Access::Read => for_,
    };
    if triggered {
        Err(TranslationFault::FaultOnAccess(access))
    } else {
        Ok(())
    }
}

fn check_permission(
    access: Access,
    perm: crate::pte::PermMask,
    mode: Mode,
) -> Result<(), TranslationFault> {
    let allowed = match access {
        Access::Read | Access::Execute => perm.can_read(mode),
        Access::Write => perm.can_write(mode),
    };
    if allowed {
        Ok(())
    } else {
        Err(TranslationFault::AccessViolation)
    }
}

fn assemble_pa(pfn: u64, va: u64, page_shift: u32) -> Pa {
    let page_base = pfn << PAGE_SHIFT;
    let offset = va & ((1u64 << page_shift) - 1);
    Pa(page_base + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FlatMemory;
    use crate::tlb::EvictionPolicy;
    use axp_types::{Asn, Mode, Realm, Va};

    fn write_pte(mem: &mut FlatMemory, table: Pa, index: u64, pte: CanonicalPte) {
        mem.write_u64(table.0 + index * PTE_SIZE, pte.0).unwrap();
    }

    #[test]
    fn three_level_walk_resolves_and_caches() {
        let mut mem = FlatMemory::new(1 << 20);
        let mut tlb = Tlb::new(8, 2, EvictionPolicy::Clock);

        let l1_table = Pa(0x1000);
        let l2_table = Pa(0x2000);
        let l3_table = Pa(0x3000);
        let data_pfn = 0x100u64;

        let mut l1_pte = CanonicalPte::zero();
        l1_pte.set_valid(true);
        l1_pte.set_pfn(l2_table.0 >> PAGE_SHIFT);
        write_pte(&mut mem, l1_table, 0, l1_pte);

        let mut l2_pte = CanonicalPte::zero();
        l2_pte.set_valid(true);
        l2_pte.set_pfn(l3_table.0 >> PAGE_SHIFT);
        write_pte(&mut mem, l2_table, 0, l2_pte);

        let mut l3_pte = CanonicalPte::zero();
        l3_pte.set_valid(true);
        l3_pte.set_pfn(data_pfn);
        l3_pte.set_read_permissions(true, true, true, true);
        write_pte(&mut mem, l3_table, 0, l3_pte);

        let ctx = TranslationContext { ptbr: l1_table, va_bits: 48, mode: Mode::Kernel, asn: Asn(0) };
        let va = Va(0);
        let pa = translate(&mut mem, &mut tlb, &ctx, Realm::Data, Access::Read, va).unwrap();
        assert_eq!(pa.0, data_pfn << PAGE_SHIFT);

        // Second access should now be a TLB hit (no further memory walk
        // needed); verify it still yields the same PA.
        let pa2 = translate(&mut mem, &mut tlb, &ctx, Realm::Data, Access::Read, va).unwrap();
        assert_eq!(pa2, pa);
    }

    #[test]
    fn non_canonical_va_faults_before_any_walk() {
        let mut mem = FlatMemory::new(4096);
        let mut tlb = Tlb::new(4, 2, EvictionPolicy::Clock);
        let ctx = TranslationContext { ptbr: Pa(0), va_bits: 48, mode: Mode::Kernel, asn: Asn(0) };
        let bad_va = Va(0x0001_0000_0000_0000);
        let err = translate(&mut mem, &mut tlb, &ctx, Realm::Data, Access::Read, bad_va).unwrap_err();
        assert_eq!(err, TranslationFault::NonCanonical);
    }

    #[test]
    fn invalid_leaf_pte_faults_not_valid() {
        let mut mem = FlatMemory::new(1 << 16);
        let mut tlb = Tlb::new(4, 2, EvictionPolicy::Clock);
        let l1_table = Pa(0x0);
        // l1 entry left zeroed => not valid.
        let ctx = TranslationContext { ptbr: l1_table, va_bits: 48, mode: Mode::Kernel, asn: Asn(0) };
        let err = translate(&mut mem, &mut tlb, &ctx, Realm::Data, Access::Read, Va(0)).unwrap_err();
        assert_eq!(err, TranslationFault::NotValid);
    }
}
