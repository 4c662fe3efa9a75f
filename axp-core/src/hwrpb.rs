//! HWRPB (Hardware Restart Parameter Block) typed writer (spec.md §6,
//! SPEC_FULL.md §4.3).
//!
//! Grounded on `coreLib/HWRPB_str.h`/`HWRPB_core.h`: a fixed-layout,
//! little-endian structure written once at init and read-only to the
//! core thereafter. ROM/firmware loading is out of scope, but the core
//! still needs to produce a self-consistent HWRPB for the boundary
//! contract, so this is a typed view over the guest-memory interface
//! rather than a byte-twiddled blob.

use axp_mmu::MemStatus;
use axp_mmu::MemoryBus;

/// Fixed guest physical address of the HWRPB (spec.md §6).
pub const HWRPB_BASE: u64 = 0x2000;

const HWRPB_SIGNATURE: u64 = 0x4242_5048; // "HPBB" little-endian-ish marker.
const HWRPB_REVISION: u64 = 7;

#[derive(Clone, Copy, Debug)]
pub struct HwrpbParams {
    pub cpu_count: u32,
    pub memory_size: u64,
    pub memory_base: u64,
    pub console_entry: u64,
    pub console_base: u64,
    pub console_size: u64,
    pub pal_revision: u64,
    pub pal_base: u64,
    pub pal_size: u64,
    pub system_type: u64,
    pub system_variation: u64,
    pub system_revision: u64,
    pub serial: [u8; 16],
    pub interrupt_entry: u64,
    pub call_pal_entry: u64,
    pub per_cpu_descriptor_offset: u64,
    pub per_cpu_descriptor_size: u64,
}

/// Field offsets within the HWRPB, per spec.md §6 ("Exact offsets per
/// the Alpha firmware specification"); this workspace fixes one
/// consistent internal layout since no external ROM consumes it
/// (firmware loading is out of scope).
mod offsets {
    pub const SIGNATURE: u64 = 0x00;
    pub const REVISION: u64 = 0x08;
    pub const SIZE: u64 = 0x10;
    pub const CPU_COUNT: u64 = 0x18;
    pub const PAGE_SIZE: u64 = 0x20;
    pub const PA_SIZE: u64 = 0x28;
    pub const ASN_MAX: u64 = 0x30;
    pub const MEMORY_SIZE: u64 = 0x38;
    pub const MEMORY_BASE: u64 = 0x40;
    pub const CONSOLE_ENTRY: u64 = 0x48;
    pub const CONSOLE_BASE: u64 = 0x50;
    pub const CONSOLE_SIZE: u64 = 0x58;
    pub const PAL_REVISION: u64 = 0x60;
    pub const PAL_BASE: u64 = 0x68;
    pub const PAL_SIZE: u64 = 0x70;
    pub const SYSTEM_TYPE: u64 = 0x78;
    pub const SYSTEM_VARIATION: u64 = 0x80;
    pub const SYSTEM_REVISION: u64 = 0x88;
    pub const SERIAL: u64 = 0x90; // 16 bytes, 0x90..0xA0
    pub const INTERRUPT_ENTRY: u64 = 0xA0;
    pub const CALL_PAL_ENTRY: u64 = 0xA8;
    pub const PER_CPU_DESC_OFFSET: u64 = 0xB0;
    pub const PER_CPU_DESC_SIZE: u64 = 0xB8;
    pub const PER_CPU_DESC_COUNT: u64 = 0xC0;
    pub const TOTAL_SIZE: u64 = 0xC8;
}

/// Write a complete HWRPB at [`HWRPB_BASE`]. Called once during
/// `Cpu::init` per spec.md §4's ownership note ("content owned by guest
/// OS" thereafter).
pub fn write_hwrpb(mem: &mut dyn MemoryBus, params: &HwrpbParams) -> Result<(), MemStatus> {
    let base = HWRPB_BASE;
    let w = |mem: &mut dyn MemoryBus, off: u64, val: u64| mem.write_u64(base + off, val);

    w(mem, offsets::SIGNATURE, HWRPB_SIGNATURE)?;
    w(mem, offsets::REVISION, HWRPB_REVISION)?;
    w(mem, offsets::SIZE, offsets::TOTAL_SIZE)?;
    w(mem, offsets::CPU_COUNT, params.cpu_count as u64)?;
    w(mem, offsets::PAGE_SIZE, axp_types::PAGE_SIZE)?;
    w(mem, offsets::PA_SIZE, 44)?;
    w(mem, offsets::ASN_MAX, axp_types::Asn::MAX as u64)?;
    w(mem, offsets::MEMORY_SIZE, params.memory_size)?;
    w(mem, offsets::MEMORY_BASE, params.memory_base)?;
    w(mem, offsets::CONSOLE_ENTRY, params.console_entry)?;
    w(mem, offsets::CONSOLE_BASE, params.console_base)?;
    w(mem, offsets::CONSOLE_SIZE, params.console_size)?;
    w(mem, offsets::PAL_REVISION, params.pal_revision)?;
    w(mem, offsets::PAL_BASE, params.pal_base)?;
    w(mem, offsets::PAL_SIZE, params.pal_size)?;
    w(mem, offsets::SYSTEM_TYPE, params.system_type)?;
    w(mem, offsets::SYSTEM_VARIATION, params.system_variation)?;
    w(mem, offsets::SYSTEM_REVISION, params.system_revision)?;
    for (i, chunk) in params.serial.chunks(8).enumerate() {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        w(mem, offsets::SERIAL + (i as u64) * 8, u64::from_le_bytes(buf))?;
    }
    w(mem, offsets::INTERRUPT_ENTRY, params.interrupt_entry)?;
    w(mem, offsets::CALL_PAL_ENTRY, params.call_pal_entry)?;
    w(mem, offsets::PER_CPU_DESC_OFFSET, params.per_cpu_descriptor_offset)?;
    w(mem, offsets::PER_CPU_DESC_SIZE, params.per_cpu_descriptor_size)?;
    w(mem, offsets::PER_CPU_DESC_COUNT, params.cpu_count as u64)?;

    tracing::debug!(cpu_count = params.cpu_count, "HWRPB written at {:#x}", base);
    Ok(())
}

/// HWPCB layout (pointed to by `PCBB`): KSP/ESP/SSP/USP, PTBR, ASN,
/// packed ASTEN/ASTSR, FEN, cycle counter (spec.md §6).
pub mod hwpcb {
    pub const KSP: u64 = 0x00;
    pub const ESP: u64 = 0x08;
    pub const SSP: u64 = 0x10;
    pub const USP: u64 = 0x18;
    pub const PTBR: u64 = 0x20;
    pub const ASN: u64 = 0x28;
    pub const ASTEN_ASTSR: u64 = 0x30;
    pub const FEN: u64 = 0x38;
    pub const CYCLE_COUNTER: u64 = 0x40;
    pub const SIZE: u64 = 0x48;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axp_mmu::FlatMemory;

    #[test]
    fn hwrpb_round_trips_key_fields() {
        let mut mem = FlatMemory::new(1 << 16);
        let params = HwrpbParams {
            cpu_count: 4,
            memory_size: 1 << 30,
            memory_base: 0,
            console_entry: 0x1000,
            console_base: 0x2000_0000,
            console_size: 0x1_0000,
            pal_revision: 1,
            pal_base: 0x4000_0000,
            pal_size: 0x1_0000,
            system_type: 1,
            system_variation: 0,
            system_revision: 1,
            serial: *b"EV6-TESTBOARD-01",
            interrupt_entry: 0x4000_0600,
            call_pal_entry: 0x4000_0000,
            per_cpu_descriptor_offset: 0x200,
            per_cpu_descriptor_size: 0x40,
        };
        write_hwrpb(&mut mem, &params).unwrap();
        assert_eq!(mem.read_u64(HWRPB_BASE + offsets::SIGNATURE).unwrap(), HWRPB_SIGNATURE);
        assert_eq!(mem.read_u64(HWRPB_BASE + offsets::CPU_COUNT).unwrap(), 4);
        assert_eq!(
            mem.read_u64(HWRPB_BASE + offsets::PAGE_SIZE).unwrap(),
            axp_types::PAGE_SIZE
        );
        assert_eq!(mem.read_u64(HWRPB_BASE + offsets::PAL_BASE).unwrap(), 0x4000_0000);
    }
}
