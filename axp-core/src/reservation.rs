//! LDx_L / STx_C reservation manager (spec.md §4.5).
//!
//! Grounded on `aero-cpu-core/tests/tier0_atomics.rs`'s naming for
//! load-linked/store-conditional semantics, adapted from
//! x86's `cmpxchg`-style single-instruction atomic to Alpha's two-
//! instruction reservation protocol.

use axp_types::{CpuId, Pa};

/// `{owner_cpu, physical_granule_base, valid}`: spec.md's "Reservation"
/// data-model row.
#[derive(Clone, Copy, Debug, Default)]
pub struct Reservation {
    valid: bool,
    granule_base: u64,
    owner: Option<CpuId>,
}

impl Reservation {
    pub fn granule_mask(granule_bytes: u64) -> u64 {
        !(granule_bytes - 1)
    }

    /// `LDx_L`: arm the reservation over the granule containing `pa`.
    pub fn arm(&mut self, owner: CpuId, pa: Pa, granule_bytes: u64) {
        self.valid = true;
        self.owner = Some(owner);
        self.granule_base = pa.0 & Self::granule_mask(granule_bytes);
    }

    /// `STx_C`: does this reservation cover `pa`'s granule for `owner`?
    pub fn covers(&self, owner: CpuId, pa: Pa, granule_bytes: u64) -> bool {
        self.valid
            && self.owner == Some(owner)
            && self.granule_base == pa.0 & Self::granule_mask(granule_bytes)
    }

    /// Cleared unconditionally: by STx_C (success or failure), MB/WMB,
    /// exception entry, or an explicit `clear_reservation` call.
    pub fn clear(&mut self) {
        self.valid = false;
        self.owner = None;
    }

    /// A remote CPU's store into this granule invalidates the
    /// reservation (spec.md §5's coherence callback).
    pub fn observe_remote_store(&mut self, writer: CpuId, pa: Pa, granule_bytes: u64) {
        if self.valid
            && self.owner != Some(writer)
            && self.granule_base == pa.0 & Self::granule_mask(granule_bytes)
        {
            self.clear();
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
