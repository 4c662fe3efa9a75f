//! PAL vector table & argument builder (spec.md §2 component 8, §4.7).
//!
//! Grounded on `palLib_EV6/PalAugmentPackClass.h` (the argument-pack
//! builder as a pure function of a pending event) and
//! `palLib_EV6/executePalReset_iface.h` (`PALRESET`'s zero-args/PC=PAL_BASE
//! convention, supplemental behavior feeding [`crate::cpu::Cpu::reset`]).

use axp_types::{Ipl, Mode};

use crate::exceptions::{ExceptionClass, PendingEvent};
use crate::state::ProcessorStatus;

/// Saved-PC/saved-PS/saved-mode record stashed on PAL entry and restored
/// by REI (spec.md §4.7 step 1). Corresponds to the original's
/// `AlphaTrapFrame`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrapFrame {
    pub saved_pc: u64,
    pub saved_ps: ProcessorStatus,
}

/// `(exception class, PAL function) -> entry offset from PAL_BASE`.
/// spec.md §4.7: "PAL_BASE is 16KB-aligned; each vector is at a fixed
/// offset." CALL_PAL's function code selects the offset directly; other
/// classes use a fixed per-class offset.
pub fn vector_offset(class: ExceptionClass, call_pal_function: Option<u8>) -> u64 {
    match class {
        ExceptionClass::CallPal => (call_pal_function.unwrap_or(0) as u64) * 0x40,
        ExceptionClass::DtbMissSingle => 0x0100,
        ExceptionClass::DtbMissDouble => 0x0180,
        ExceptionClass::ItbMiss => 0x0200,
        ExceptionClass::Dfault => 0x0280,
        ExceptionClass::ItbAcv => 0x0300,
        ExceptionClass::Unalign => 0x0380,
        ExceptionClass::Opcdec => 0x0400,
        ExceptionClass::Fen => 0x0480,
        ExceptionClass::Arith => 0x0500,
        ExceptionClass::Ast => 0x0580,
        ExceptionClass::Interrupt => 0x0600,
        ExceptionClass::Mchk => 0x0700,
    }
}

/// `PALRESET`: the power-up PAL entry. Not a faulting-context entry (no
/// `PendingEvent` exists yet), so it gets its own constructor rather than
/// going through [`build_argument_pack`] (SPEC_FULL.md §4.7, supplemental).
pub fn reset_entry_state(pal_base: u64) -> (u64, ProcessorStatus, [u64; 6]) {
    let ps = ProcessorStatus {
        current_mode: crate::state::CurrentMode(Mode::Kernel),
        ipl: Ipl(31),
        in_pal_mode: true,
    };
    (pal_base, ps, [0; 6])
}

/// R16..R21 argument pack, a pure function of the pending event
/// (spec.md §4.7 table; trailing unused slots zeroed per
/// SPEC_FULL.md §4.7 to avoid leaking a previous event's registers).
pub fn build_argument_pack(event: &PendingEvent) -> [u64; 6] {
    let mut r = [0u64; 6];
    match event.class {
        ExceptionClass::DtbMissSingle
        | ExceptionClass::DtbMissDouble
        | ExceptionClass::ItbMiss
        | ExceptionClass::Dfault
        | ExceptionClass::ItbAcv => {
            r[0] = event.faulting_va;
            r[1] = event.asn.0 as u64;
            r[2] = memory_fault_type_code(event.fault_type);
            r[3] = event.is_write as u64;
            r[4] = event.faulting_pc;
        }
        ExceptionClass::Ast => {
            r[0] = event.interrupt_vector as u64; // pending ASTSR bits
            r[1] = event.faulting_pc;
        }
        ExceptionClass::Arith => {
            r[0] = event.interrupt_vector as u64; // EXC_SUM, reusing the field
            r[1] = event.faulting_pc;
        }
        ExceptionClass::Interrupt => {
            r[0] = event.interrupt_vector as u64;
            r[1] = event.ipl.0 as u64;
            r[2] = event.faulting_pc;
        }
        ExceptionClass::Mchk => {
            r[0] = event.interrupt_vector as u64; // syndrome
            r[1] = event.access_size as u64; // MC reason code
            r[2] = event.faulting_va; // fault address
            r[3] = event.faulting_pc;
        }
        ExceptionClass::Opcdec | ExceptionClass::Fen => {
            r[0] = event.faulting_pc;
            r[1] = event.interrupt_vector as u64; // opcode
        }
        ExceptionClass::Unalign => {
            r[0] = event.faulting_va;
            r[1] = event.faulting_pc;
            r[2] = event.is_write as u64;
            r[3] = event.access_size as u64;
        }
        ExceptionClass::CallPal => {
            // CALL_PAL itself carries no fault context; arguments are
            // whatever the guest placed in R16..R21 before the call,
            // left untouched by this builder.
        }
    }
    r
}

fn memory_fault_type_code(ty: Option<crate::exceptions::MemoryFaultType>) -> u64 {
    use crate::exceptions::MemoryFaultType as M;
    match ty {
        Some(M::LoadAccess) => 0,
        Some(M::StoreAccess) => 1,
        Some(M::FetchAccess) => 2,
        Some(M::Alignment) => 3,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axp_types::Asn;

    fn dfault_event() -> PendingEvent {
        PendingEvent {
            kind: crate::exceptions::EventKind::Exception,
            class: ExceptionClass::Dfault,
            pal_vector: 0,
            faulting_pc: 0x1000,
            faulting_va: 0x200003,
            asn: Asn(7),
            fault_type: Some(crate::exceptions::MemoryFaultType::LoadAccess),
            is_write: false,
            access_size: 8,
            interrupt_vector: 0,
            ipl: Ipl(0),
        }
    }

    #[test]
    fn unalign_argument_pack_matches_scenario_5() {
        let mut event = dfault_event();
        event.class = ExceptionClass::Unalign;
        let pack = build_argument_pack(&event);
        assert_eq!(pack[0], 0x200003);
        assert_eq!(pack[1], 0x1000);
        assert_eq!(pack[2], 0); // read
        assert_eq!(pack[3], 8);
    }

    #[test]
    fn trailing_slots_are_zeroed() {
        let event = dfault_event();
        let pack = build_argument_pack(&event);
        assert_eq!(pack[5], 0);
    }

    #[test]
    fn call_pal_vector_offset_is_function_times_64() {
        assert_eq!(vector_offset(ExceptionClass::CallPal, Some(0x83)), 0x83 * 0x40);
    }

    #[test]
    fn reset_entry_forces_kernel_ipl31_palmode() {
        let (pc, ps, args) = reset_entry_state(0x4000_0000);
        assert_eq!(pc, 0x4000_0000);
        assert_eq!(ps.ipl, Ipl(31));
        assert!(ps.in_pal_mode);
        assert_eq!(args, [0; 6]);
    }
}
