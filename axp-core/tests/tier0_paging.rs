//! End-to-end scenarios 1 and 4 (spec.md §8): a clean load through a
//! freshly-walked mapping, and a DTB miss that routes into PAL.

use std::sync::Arc;

use axp_core::cpu::Cpu;
use axp_core::exceptions::{ExceptionClass, MemoryFaultType};
use axp_core::{vector_offset, Config, PendingEvent};
use axp_interrupts::IrqController;
use axp_mmu::{CanonicalPte, FlatMemory, MemoryBus};
use axp_types::{Access, Asn, CpuId, Pa, Realm, Va, PAGE_SHIFT};

fn config() -> Config {
    Config::builder(1, axp_types::PAGE_SIZE * 16, 0x4000_0000).build().unwrap()
}

fn vpn_indices(va: u64) -> (u64, u64, u64) {
    let vpn = va >> PAGE_SHIFT;
    (vpn & 0x3FF, (vpn >> 10) & 0xFFF, (vpn >> 22) & 0xFF)
}

/// Writes valid L1/L2 entries rooted at `ptbr`, pointing at a dedicated
/// L3 table, but leaves the L3 entry itself exactly as the caller left
/// `write_leaf` it (so a walk can still either resolve or miss).
fn map_tables(mem: &mut FlatMemory, ptbr: Pa, va: u64) -> Pa {
    let l2_table = Pa(ptbr.0 + 0x1000);
    let l3_table = Pa(ptbr.0 + 0x2000);
    let (l3, l2, l1) = vpn_indices(va);

    let mut l1_pte = CanonicalPte::zero();
    l1_pte.set_valid(true);
    l1_pte.set_pfn(l2_table.0 >> PAGE_SHIFT);
    mem.write_u64(ptbr.0 + l1 * 8, l1_pte.0).unwrap();

    let mut l2_pte = CanonicalPte::zero();
    l2_pte.set_valid(true);
    l2_pte.set_pfn(l3_table.0 >> PAGE_SHIFT);
    mem.write_u64(l2_table.0 + l2 * 8, l2_pte.0).unwrap();

    Pa(l3_table.0 + l3 * 8)
}

/// Scenario 1: `LDQ R1, 0(R2)` with `R2 = VA 0x200000`, `VA 0x200000 ->
/// PA 0x100000`, KRE=1, ASN=7, Kernel mode. R1 gets the loaded quadword;
/// the D-TLB now holds PFN `0x100000 >> 13 == 0x80` for that VPN/ASN.
#[test]
fn scenario_1_ldq_from_aligned_mapped_page() {
    let cfg = config();
    let irq = Arc::new(IrqController::new());
    let mut cpu = Cpu::new(CpuId(0), &cfg, irq);
    let mut mem = FlatMemory::new(1 << 21);

    let ptbr = Pa(0x1_0000);
    cpu.mtpr_ptbr(ptbr.0);
    cpu.mtpr_asn(7);

    let leaf_addr = map_tables(&mut mem, ptbr, 0x20_0000);
    let mut leaf = CanonicalPte::zero();
    leaf.set_valid(true);
    leaf.set_pfn(0x80); // 0x100000 >> 13
    leaf.set_read_permissions(true, false, false, false);
    mem.write_u64(leaf_addr.0, leaf.0).unwrap();

    mem.write_u64(0x10_0000, 0xDEAD_BEEF_CAFE_BABE).unwrap();

    let value = cpu.load(&mut mem, 0x20_0000, true).unwrap();
    assert_eq!(value, 0xDEAD_BEEF_CAFE_BABE);

    match cpu.tu.dtb.lookup(Va(0x20_0000), PAGE_SHIFT, Asn(7)) {
        axp_mmu::Lookup::Hit { pfn, .. } => assert_eq!(pfn, 0x80),
        axp_mmu::Lookup::Miss => panic!("expected the walk to have cached a D-TLB entry"),
    }
}

/// Scenario 4: the page table's leaf entry is not yet valid (modeling a
/// TLB miss against a still-being-populated mapping). The resulting
/// `NotValid` walk failure routes through `DTB_MISS_SINGLE`, carrying
/// VA/ASN/fault-type/PC in the R16-R20 argument pack, and leaves the CPU
/// in PAL mode at `PAL_BASE + DTB_MISS_SINGLE_offset`.
#[test]
fn scenario_4_dtb_miss_triggers_pal_entry() {
    let cfg = config();
    let irq = Arc::new(IrqController::new());
    let mut cpu = Cpu::new(CpuId(0), &cfg, irq);
    cpu.reset(0x4000_0000);
    let mut mem = FlatMemory::new(1 << 21);

    let ptbr = Pa(0x1_0000);
    cpu.mtpr_ptbr(ptbr.0);
    cpu.mtpr_asn(7);
    let va = 0x20_0000u64;
    map_tables(&mut mem, ptbr, va); // leaf left zeroed: PTE.V == 0.

    let err = cpu.load(&mut mem, va, true).unwrap_err();
    let axp_core::cpu::MemAccessError::Translation(fault) = err else {
        panic!("expected a translation fault, got {err:?}")
    };
    assert_eq!(fault, axp_mmu::TranslationFault::NotValid);

    cpu.raise_translation_fault(fault, Realm::Data, va, Access::Read).unwrap();

    let event: PendingEvent = *cpu.dispatcher.pending().expect("a DTB_MISS_SINGLE event must be pending");
    assert_eq!(event.class, ExceptionClass::DtbMissSingle);
    assert_eq!(event.faulting_va, va);
    assert_eq!(event.asn, Asn(7));
    assert_eq!(event.fault_type, Some(MemoryFaultType::LoadAccess));
    assert!(!event.is_write);
    assert_eq!(event.faulting_pc, 0x4000_0000);

    assert!(cpu.state.hot.ps.in_pal_mode);
    assert_eq!(cpu.state.read_int(16), va);
    assert_eq!(cpu.state.read_int(17), 7);
    assert_eq!(cpu.state.read_int(18), 0); // LOAD_ACCESS
    assert_eq!(cpu.state.read_int(19), 0); // not a write
    assert_eq!(cpu.state.read_int(20), 0x4000_0000);
    assert_eq!(
        cpu.state.hot.pc,
        0x4000_0000 + vector_offset(ExceptionClass::DtbMissSingle, None)
    );
}
