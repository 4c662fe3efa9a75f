//! Fault dispatcher & pending-event queue (spec.md §2 component 7, §4.6),
//! plus the MCES machine-check summary (SPEC_FULL.md §4.3).
//!
//! Grounded on `faultLib/AlphaTrapFrame.h`,
//! `faultLib/makeAlignmentFaultEvent_inl.h`,
//! `faultLib/isVAAddressTranslationFault.h` for the syndrome shape, and
//! `coreLib/enum_MCES.h`/`MCES_helpers.h` for the machine-check summary
//! bits. Precedence ordering is spec.md §4.6's own rule, since x86 has
//! no AST/IPL nesting equivalent to borrow from.

use bitflags::bitflags;
use thiserror::Error;

use axp_types::{Asn, Ipl};

bitflags! {
    /// Machine Check Error Summary IPR bits (spec.md §7).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Mces: u8 {
        /// Machine check in progress.
        const MIP = 1 << 0;
        /// Write-error recorded.
        const WRE = 1 << 1;
        /// System-correctable-error summary.
        const SCE = 1 << 2;
        /// Correctable-memory-error summary.
        const CME = 1 << 3;
        /// Machine-check-mask-enable (gates delivery; not a summary bit
        /// but kept alongside since it lives in the same IPR).
        const MME = 1 << 7;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum McheckReason {
    CacheError,
    MemoryError,
    BusError,
    TlbInsertionFailure,
    SmpBarrierTimeout,
    DoubleMachineCheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryFaultType {
    LoadAccess,
    StoreAccess,
    FetchAccess,
    Alignment,
}

/// `spec.md` §4.6's exception class taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionClass {
    Arith,
    Fen,
    Opcdec,
    Unalign,
    DtbMissSingle,
    DtbMissDouble,
    ItbMiss,
    Dfault,
    ItbAcv,
    Ast,
    Interrupt,
    Mchk,
    CallPal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    HardwareIrq,
    SoftwareIrq,
    Ast,
    Exception,
    MachineCheck,
    CallPal,
}

/// One pending event per CPU (spec.md's "Pending event" data-model row).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingEvent {
    pub kind: EventKind,
    pub class: ExceptionClass,
    pub pal_vector: u16,
    pub faulting_pc: u64,
    pub faulting_va: u64,
    pub asn: Asn,
    pub fault_type: Option<MemoryFaultType>,
    pub is_write: bool,
    pub access_size: u8,
    pub interrupt_vector: u16,
    pub ipl: Ipl,
}

impl PendingEvent {
    /// `IPL` this event will run at once delivered, used for the
    /// nesting-eligibility check (spec.md §4.6: "strictly higher IPL").
    pub fn delivery_ipl(&self) -> Ipl {
        self.ipl
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("fatal double-fault: pending event at IPL {pending:?} cannot be preempted by new event at IPL {incoming:?}")]
    FatalDoubleFault { pending: Ipl, incoming: Ipl },
}

/// One pending event slot per CPU, with spec.md §4.6's nesting rule.
#[derive(Default)]
pub struct FaultDispatcher {
    pending: Option<PendingEvent>,
}

impl FaultDispatcher {
    pub fn pending(&self) -> Option<&PendingEvent> {
        self.pending.as_ref()
    }

    /// Raise a new event. Succeeds immediately if nothing is pending;
    /// if something is pending, the new event must be strictly higher
    /// IPL to preempt it, else this is a fatal double-fault.
    pub fn raise(&mut self, event: PendingEvent) -> Result<(), DispatchError> {
        if let Some(existing) = self.pending {
            if event.delivery_ipl() <= existing.delivery_ipl() {
                return Err(DispatchError::FatalDoubleFault {
                    pending: existing.delivery_ipl(),
                    incoming: event.delivery_ipl(),
                });
            }
            tracing::warn!(
                old_ipl = ?existing.delivery_ipl(),
                new_ipl = ?event.delivery_ipl(),
                "nesting a higher-IPL event over a pending one"
            );
        }
        self.pending = Some(event);
        Ok(())
    }

    /// Consumed on PAL entry (spec.md's data model: "consumed on PAL
    /// entry").
    pub fn take(&mut self) -> Option<PendingEvent> {
        self.pending.take()
    }
}
