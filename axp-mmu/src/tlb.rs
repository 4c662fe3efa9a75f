//! SPAM: the set-associative TLB shared shape for ITB/DTB (spec.md's
//! "TLB entry (SPAM)" data-model row and §4.4 step 2). One [`Tlb`] per
//! realm per CPU; the walker owns probing and refill.
//!
//! Grounded on `examples/original_source/pteLib/pte_l2_helpers.h`'s
//! `checkAccess`/prefetch helpers for the tag-match and permission-check
//! shape, generalized from its ad hoc per-call checks into a proper
//! associative structure, since the original performs lookup inline at
//! each access rather than through a reusable cache structure.

use axp_types::{Asn, Va};

use crate::pte::{CanonicalPte, PermMask};

/// `VA[47:13]` (or `VA[42:13]` in 43-bit mode) page number, tagged with
/// the owning ASN unless the entry is global (`ASM`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Tag {
    vpn: u64,
    asn: Option<Asn>,
    page_shift: u32,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    tag: Tag,
    pfn: u64,
    perm: PermMask,
    fault_on_execute: bool,
    fault_on_write: bool,
    fault_on_read: bool,
    epoch: u64,
    recently_used: bool,
    /// Re-reference prediction value for `EvictionPolicy::Srrip`; unused
    /// under the other two policies.
    rrpv: u8,
}

/// Eviction policy. The real EV6 uses a pseudo-LRU/random scheme per
/// associativity way; we expose all three so a host can pick determinism
/// for test replay vs. a closer hardware match. SRRIP is the default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Static re-reference interval prediction, per
    /// `examples/original_source/pteLib/TemplatePolicyBase.h`'s
    /// `SRRIPPolicy`: new entries are inserted with a long predicted
    /// reuse distance (`RRPV_MAX - 1`); a hit promotes an entry to
    /// immediate reuse (`rrpv = 0`). On eviction the way with the
    /// longest predicted distance (`rrpv == RRPV_MAX`) is chosen; if none
    /// is at the max, every way's `rrpv` is aged by one and the search
    /// repeats.
    Srrip,
    Clock,
    Random { seed: u64 },
}

const SRRIP_RRPV_MAX: u8 = 3;

/// Outcome of a TLB probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    Hit { pfn: u64, perm: PermMask, foe: bool, fow: bool, for_: bool },
    Miss,
}

pub struct Tlb {
    ways: usize,
    sets: Vec<Vec<Option<Entry>>>,
    set_mask: u64,
    policy: EvictionPolicy,
    /// Bumped on every ASN-scoped invalidation (TBIAP/IAP); entries
    /// stamped with a stale epoch are treated as misses without being
    /// physically evicted, matching the original's lazy-invalidate IAP.
    epoch: u64,
    clock_hand: usize,
}

impl Tlb {
    pub fn new(num_sets: usize, ways: usize, policy: EvictionPolicy) -> Self {
        assert!(num_sets.is_power_of_two());
        Self {
            ways,
            sets: vec![vec![None; ways]; num_sets],
            set_mask: (num_sets as u64) - 1,
            policy,
            epoch: 0,
            clock_hand: 0,
        }
    }

    fn set_index(&self, vpn: u64) -> usize {
        (vpn & self.set_mask) as usize
    }

    pub fn lookup(&mut self, va: Va, page_shift: u32, asn: Asn) -> Lookup {
        let vpn = va.0 >> page_shift;
        let idx = self.set_index(vpn);
        for slot in self.sets[idx].iter_mut() {
            if let Some(e) = slot {
                if e.epoch != self.epoch {
                    continue;
                }
                let tag_matches = e.tag.vpn == vpn
                    && e.tag.page_shift == page_shift
                    && (e.tag.asn.is_none() || e.tag.asn == Some(asn));
                if tag_matches {
                    e.recently_used = true;
                    e.rrpv = 0;
                    return Lookup::Hit {
                        pfn: e.pfn,
                        perm: e.perm,
                        foe: e.fault_on_execute,
                        fow: e.fault_on_write,
                        for_: e.fault_on_read,
                    };
                }
            }
        }
        Lookup::Miss
    }

    /// Insert a translation, evicting per `self.policy` if the set is full.
    pub fn insert(&mut self, va: Va, page_shift: u32, asn: Asn, pte: CanonicalPte) {
        let vpn = va.0 >> page_shift;
        let idx = self.set_index(vpn);
        let tag = Tag { vpn, asn: if pte.asm() { None } else { Some(asn) }, page_shift };
        let entry = Entry {
            tag,
            pfn: pte.pfn(),
            perm: pte.perm_mask(),
            fault_on_execute: pte.fault_on_execute(),
            fault_on_write: pte.fault_on_write(),
            fault_on_read: pte.fault_on_read(),
            epoch: self.epoch,
            recently_used: true,
            rrpv: SRRIP_RRPV_MAX - 1,
        };

        let set = &mut self.sets[idx];
        if let Some(free) = set.iter_mut().find(|s| s.is_none() || s.unwrap().epoch != self.epoch)
        {
            *free = Some(entry);
            return;
        }

        let victim = match self.policy {
            EvictionPolicy::Srrip => loop {
                if let Some(hand) = set.iter().position(|s| s.map_or(false, |e| e.rrpv >= SRRIP_RRPV_MAX)) {
                    break hand;
                }
                for slot in set.iter_mut() {
                    if let Some(e) = slot {
                        e.rrpv = e.rrpv.saturating_add(1);
                    }
                }
            },
            EvictionPolicy::Clock => {
                let ways = self.ways;
                loop {
                    let hand = self.clock_hand % ways;
                    self.clock_hand = (self.clock_hand + 1) % ways;
                    match &mut set[hand] {
                        Some(e) if e.recently_used => e.recently_used = false,
                        _ => break hand,
                    }
                }
            }
            EvictionPolicy::Random { seed } => {
                // xorshift; deterministic given the TLB's seed so tests
                // can replay eviction decisions.
                let mut x = seed ^ (self.epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15) + vpn);
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                (x as usize) % self.ways
            }
        };
        set[victim] = Some(entry);
    }

    /// TBIA: invalidate everything (non-ASM entries in the real hardware,
    /// but spec.md §4.4's invalidation taxonomy treats TBIA as total).
    pub fn invalidate_all(&mut self) {
        self.epoch += 1;
    }

    /// TBIAP / IAP: invalidate all entries tagged with a (non-global) ASN,
    /// across every CPU's copy of this TLB; the epoch bump here is local;
    /// the SMP coordinator fans IAP out to every CPU's `Tlb::invalidate_asn`.
    pub fn invalidate_asn(&mut self, asn: Asn) {
        for set in self.sets.iter_mut() {
            for slot in set.iter_mut() {
                if let Some(e) = slot {
                    if e.tag.asn == Some(asn) {
                        *slot = None;
                    }
                }
            }
        }
    }

    /// TBIS/TBISI/TBISD: invalidate a single VA (all ASN matches, since
    /// the instruction doesn't carry one).
    pub fn invalidate_va(&mut self, va: Va, page_shift: u32) {
        let vpn = va.0 >> page_shift;
        let idx = self.set_index(vpn);
        for slot in self.sets[idx].iter_mut() {
            if let Some(e) = slot {
                if e.tag.vpn == vpn && e.tag.page_shift == page_shift {
                    *slot = None;
                }
            }
        }
    }
}
