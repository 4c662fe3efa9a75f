//! FPCR state and the IEEE-754 trap-cause encoding used by `ARITH` faults.
//!
//! Scope is deliberately narrow: this core's non-goal list excludes
//! instruction-level FP semantics beyond what's needed to build the
//! `ARITH` exception summary (spec.md §4.9, §4.7's EXC_SUM argument).

use bitflags::bitflags;

bitflags! {
    /// Floating Point Control Register. Bit positions follow the Alpha
    /// architecture's FPCR layout (high half carries the summary/trap-enable
    /// bits actually used by this core).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Fpcr: u64 {
        /// Invalid operation trap enable.
        const INVD = 1 << 49;
        /// Division by zero trap enable.
        const DZED = 1 << 50;
        /// Overflow trap enable.
        const OVFD = 1 << 51;
        /// Underflow trap enable.
        const UNFD = 1 << 52;
        /// Inexact trap enable.
        const INED = 1 << 53;
        /// Integer overflow trap enable (used by IEEE IOV on conversions).
        const IOVD = 1 << 54;
        /// Dynamic rounding mode, low bit.
        const DYN0 = 1 << 58;
        /// Dynamic rounding mode, high bit.
        const DYN1 = 1 << 59;
        /// Summary bit: an enabled trap condition occurred.
        const SUM = 1 << 63;
    }
}

bitflags! {
    /// Cause bits encoded into EXC_SUM / R16 for an `ARITH` PAL entry
    /// (spec.md §4.7 table, §4.9 "Arithmetic overflow/underflow").
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ExcSum: u64 {
        const INV = 1 << 0;
        const DZE = 1 << 1;
        const OVF = 1 << 2;
        const UNF = 1 << 3;
        const INE = 1 << 4;
        const IOV = 1 << 5;
    }
}

impl Fpcr {
    /// Whether any cause in `cause` has its corresponding trap enabled.
    pub fn traps_enabled(self, cause: ExcSum) -> bool {
        (cause.contains(ExcSum::INV) && self.contains(Fpcr::INVD))
            || (cause.contains(ExcSum::DZE) && self.contains(Fpcr::DZED))
            || (cause.contains(ExcSum::OVF) && self.contains(Fpcr::OVFD))
            || (cause.contains(ExcSum::UNF) && self.contains(Fpcr::UNFD))
            || (cause.contains(ExcSum::INE) && self.contains(Fpcr::INED))
            || (cause.contains(ExcSum::IOV) && self.contains(Fpcr::IOVD))
    }
}
